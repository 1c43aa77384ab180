//! JSON-RPC 2.0 envelope.
//!
//! One struct covers requests, notifications, and responses; `is_valid`
//! enforces the shape rules that distinguish them. The correlation `id` is
//! opaque (string, number, or the null literal) and survives parsing
//! byte-for-byte: a present-but-null `id` is kept distinct from an absent
//! one, which is what decides whether a message is a notification.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "2.0";

// ─── Error codes ──────────────────────────────────────────────────────────────

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// Authentication required. Also used for "no shell available" — callers
/// cannot disambiguate from the code alone and must rely on the message.
pub const AUTH_REQUIRED: i32 = -32001;
/// Invalid token / authorization failed.
pub const INVALID_TOKEN: i32 = -32002;
pub const RATE_LIMITED: i32 = -32003;
/// Session expired: the token epoch changed after this session authenticated.
pub const SESSION_EXPIRED: i32 = -32004;

// ─── Envelope ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub jsonrpc: String,
    /// Present-but-null is kept distinct from absent: `Some(Value::Null)`
    /// round-trips as `"id": null`, `None` serializes nothing.
    #[serde(
        default,
        deserialize_with = "preserve_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// `"result": null` is a legal success payload, so null is preserved
    /// here too — shape validation counts it as present.
    #[serde(
        default,
        deserialize_with = "preserve_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

fn preserve_null<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Message {
    /// Parse one wire frame.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn request(id: Value, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_string(),
            id: Some(id),
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_string(),
            id: None,
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn make_result(id: Value, value: Value) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(value),
            error: None,
        }
    }

    pub fn make_error(id: Value, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(RpcErrorBody {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    /// True iff the id is absent or the null literal.
    pub fn is_notification(&self) -> bool {
        matches!(self.id, None | Some(Value::Null))
    }

    /// The id to echo on a reply: the caller's id, or null when it sent none.
    pub fn reply_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }

    /// Version and shape invariants.
    ///
    /// A request has a method (and an id); a notification has a method and
    /// no id; a response has an id and exactly one of result/error. Any
    /// other combination is an invalid envelope.
    pub fn is_valid(&self) -> bool {
        if self.jsonrpc != PROTOCOL_VERSION {
            return false;
        }
        if self.result.is_some() && self.error.is_some() {
            return false;
        }
        match &self.method {
            Some(_) => self.result.is_none() && self.error.is_none(),
            None => {
                // Response shape: exactly one of result/error, id present.
                (self.result.is_some() ^ self.error.is_some()) && self.id.is_some()
            }
        }
    }
}
