//! Named methods and their dispatch policy.
//!
//! Every method the runtime will dispatch is registered up front with its
//! auth requirement, notification allowance, and optional payload cap.
//! Unknown methods are rejected before any adapter code runs.

use std::collections::HashMap;
use std::sync::Arc;

use super::message::Message;
use super::session::ClientSession;

/// Payload cap for `getMetadata` requests.
const GET_METADATA_MAX_PAYLOAD_BYTES: usize = 2 * 1024 * 1024;

/// Extra per-method authorization hook over (session, message).
pub type AuthorizeFn = Arc<dyn Fn(&ClientSession, &Message) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct MethodDef {
    pub name: String,
    pub requires_auth: bool,
    pub allow_notifications: bool,
    pub max_payload_bytes: Option<usize>,
    pub authorize: Option<AuthorizeFn>,
}

impl MethodDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            requires_auth: true,
            allow_notifications: false,
            max_payload_bytes: None,
            authorize: None,
        }
    }

    pub fn open(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn max_payload(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = Some(bytes);
        self
    }

    pub fn authorize(mut self, f: AuthorizeFn) -> Self {
        self.authorize = Some(f);
        self
    }
}

impl std::fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("requires_auth", &self.requires_auth)
            .field("allow_notifications", &self.allow_notifications)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("authorize", &self.authorize.is_some())
            .finish()
    }
}

/// Registry of dispatchable methods. Built at startup, immutable afterwards.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodDef>,
}

impl MethodRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard method table.
    pub fn with_builtin_methods() -> Self {
        let mut reg = Self::default();
        reg.register(MethodDef::new("handshake").open());
        reg.register(MethodDef::new("getState"));
        reg.register(MethodDef::new("listActions"));
        reg.register(MethodDef::new("listShells"));
        reg.register(MethodDef::new("getMetadata").max_payload(GET_METADATA_MAX_PAYLOAD_BYTES));
        reg.register(MethodDef::new("navigate"));
        reg.register(MethodDef::new("executeAction"));
        reg
    }

    /// Register a method. A duplicate name overwrites the earlier entry.
    pub fn register(&mut self, def: MethodDef) {
        self.methods.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&MethodDef> {
        self.methods.get(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
