//! Request coordinator: routes validated requests onto shell adapters.
//!
//! Target resolution prefers the caller's explicit choice over ambient
//! focus: `targetShellId`, then the active shell of an explicit `windowId`,
//! then the active shell of the focused window, then any registered shell.
//! Adapter failures are converted to JSON-RPC errors here — domain codes
//! preserved, everything else scrubbed — so raw host detail never reaches
//! a client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::error;

use super::path::validate_path;
use super::registry::ShellRegistry;
use super::{AdapterError, ShellDescriptor};
use crate::config::IpcConfig;
use crate::rpc::message::{AUTH_REQUIRED, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};
use crate::rpc::session::ClientSession;
use crate::rpc::{DispatchError, RequestHandler};
use crate::sanitize;
use crate::uiqueue::UiQueue;

pub struct Coordinator {
    shells: Arc<ShellRegistry>,
    config: Arc<IpcConfig>,
    /// When present, UI-state operations are marshaled through the host's
    /// UI queue; `getMetadata` stays on worker threads.
    ui: Option<Arc<UiQueue>>,
}

impl Coordinator {
    pub fn new(shells: Arc<ShellRegistry>, config: Arc<IpcConfig>, ui: Option<Arc<UiQueue>>) -> Self {
        Self { shells, config, ui }
    }

    fn resolve_target(&self, params: &Value) -> Result<ShellDescriptor, DispatchError> {
        if let Some(id) = params.get("targetShellId").and_then(Value::as_str) {
            if let Some(d) = self.shells.get_by_id(id) {
                return Ok(d);
            }
        }
        if let Some(window_id) = params.get("windowId").and_then(Value::as_u64) {
            if let Some(d) = self.shells.get_active_for_window(window_id) {
                return Ok(d);
            }
        }
        if let Some(window_id) = self.shells.focused_window() {
            if let Some(d) = self.shells.get_active_for_window(window_id) {
                return Ok(d);
            }
        }
        let shells = self.shells.list();
        shells
            .iter()
            .find(|d| d.active)
            .or_else(|| shells.first())
            .cloned()
            .ok_or_else(|| DispatchError::new(AUTH_REQUIRED, "No shell available"))
    }

    /// Run a UI-state adapter call, marshaled through the UI queue when the
    /// host provided one.
    async fn run_on_ui(
        &self,
        fut: impl std::future::Future<Output = Result<Value, AdapterError>> + Send + 'static,
    ) -> Result<Value, AdapterError> {
        match &self.ui {
            Some(ui) => match ui.submit(fut).await {
                Ok(result) => result,
                Err(e) => Err(AdapterError::Other(anyhow::anyhow!(e))),
            },
            None => fut.await,
        }
    }

    async fn get_metadata(
        &self,
        session: &Arc<ClientSession>,
        target: ShellDescriptor,
        params: &Value,
    ) -> Result<Value, DispatchError> {
        let paths = params
            .get("paths")
            .and_then(Value::as_array)
            .ok_or_else(|| DispatchError::new(INVALID_PARAMS, "Invalid params: paths required"))?;
        let paths: Vec<String> = paths
            .iter()
            .map(|p| {
                p.as_str().map(str::to_string).ok_or_else(|| {
                    DispatchError::new(INVALID_PARAMS, "Invalid params: paths must be strings")
                })
            })
            .collect::<Result<_, _>>()?;
        if paths.len() > self.config.get_metadata_max_items {
            return Err(DispatchError::new(
                INVALID_PARAMS,
                format!(
                    "Invalid params: at most {} paths per call",
                    self.config.get_metadata_max_items
                ),
            ));
        }

        let timeout_secs = self.config.get_metadata_timeout_secs;
        let adapter = target.adapter.clone();
        let call = adapter.get_metadata(paths);
        // Dropping the call future at the deadline or on session
        // cancellation is what cancels the in-flight adapter work.
        tokio::select! {
            _ = session.cancel_token().cancelled() => {
                Err(map_adapter_error(AdapterError::Cancelled))
            }
            outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), call) => {
                match outcome {
                    Ok(result) => result.map_err(map_adapter_error),
                    Err(_) => Err(DispatchError::new(
                        INTERNAL_ERROR,
                        format!("getMetadata timed out after {timeout_secs}s"),
                    )),
                }
            }
        }
    }
}

#[async_trait]
impl RequestHandler for Coordinator {
    async fn handle(
        &self,
        session: &Arc<ClientSession>,
        method: &str,
        params: Value,
    ) -> Result<Value, DispatchError> {
        // listShells needs no target resolution.
        if method == "listShells" {
            let shells: Vec<Value> = self
                .shells
                .list()
                .iter()
                .map(|d| {
                    json!({
                        "shellId": d.shell_id,
                        "windowId": d.window_id,
                        "tabId": d.tab_id,
                        "active": d.active,
                    })
                })
                .collect();
            return Ok(json!({ "shells": shells }));
        }

        let target = self.resolve_target(&params)?;

        let result = match method {
            "getState" => {
                let adapter = target.adapter.clone();
                self.run_on_ui(async move { adapter.get_state().await }).await
            }
            "listActions" => {
                let adapter = target.adapter.clone();
                self.run_on_ui(async move { adapter.list_actions().await })
                    .await
            }
            "navigate" => {
                let raw = params.get("path").and_then(Value::as_str).ok_or_else(|| {
                    DispatchError::new(INVALID_PARAMS, "Invalid params: path required")
                })?;
                let path = validate_path(raw)
                    .map_err(|_| DispatchError::new(INVALID_PARAMS, "Invalid path"))?;
                let adapter = target.adapter.clone();
                self.run_on_ui(async move { adapter.navigate(path).await })
                    .await
            }
            "getMetadata" => {
                return self
                    .get_metadata(session, target, &params)
                    .await
                    .map(null_to_ok);
            }
            "executeAction" => {
                let action_id = params
                    .get("actionId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        DispatchError::new(INVALID_PARAMS, "Invalid params: actionId required")
                    })?;
                let target_shell_id = params
                    .get("targetShellId")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let adapter = target.adapter.clone();
                self.run_on_ui(async move { adapter.execute_action(action_id, target_shell_id).await })
                    .await
            }
            other => {
                return Err(DispatchError::new(
                    METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                ))
            }
        };

        result.map(null_to_ok).map_err(map_adapter_error)
    }
}

/// A null adapter result serializes as a neutral success object.
fn null_to_ok(value: Value) -> Value {
    if value.is_null() {
        json!({ "status": "ok" })
    } else {
        value
    }
}

fn map_adapter_error(e: AdapterError) -> DispatchError {
    match e {
        AdapterError::Domain { code, message } => {
            DispatchError::new(code, sanitize::scrub(&message))
        }
        AdapterError::AccessDenied => DispatchError::new(INTERNAL_ERROR, sanitize::access_denied()),
        AdapterError::Cancelled => DispatchError::new(INTERNAL_ERROR, "Operation cancelled"),
        AdapterError::Other(err) => {
            // The full form goes to the host log only.
            error!(err = %err, "adapter failure");
            DispatchError::new(INTERNAL_ERROR, sanitize::scrub(&err.to_string()))
        }
    }
}
