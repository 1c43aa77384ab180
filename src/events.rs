//! Typed state-change notifications.
//!
//! The host adapter reports view changes here; each emitter shapes the
//! payload and hands it to the runtime's lossy broadcast. Working-directory
//! changes are coalesced to at most one per 100 ms per shell so a fast
//! directory walk cannot flood every subscriber.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::IpcConfig;
use crate::rpc::SessionRuntime;

/// Minimum spacing between workingDirectoryChanged broadcasts per shell.
const DIR_CHANGE_DEBOUNCE: Duration = Duration::from_millis(100);

/// One selected item in a `selectionChanged` payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionItem {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
}

pub struct ShellEvents {
    runtime: Arc<SessionRuntime>,
    config: Arc<IpcConfig>,
    last_dir_change: Mutex<HashMap<String, Instant>>,
}

impl ShellEvents {
    pub fn new(runtime: Arc<SessionRuntime>) -> Self {
        let config = runtime.config().clone();
        Self {
            runtime,
            config,
            last_dir_change: Mutex::new(HashMap::new()),
        }
    }

    /// The view's working directory changed. Returns false when the event
    /// was swallowed by the per-shell debounce window.
    pub fn working_directory_changed(
        &self,
        shell_id: &str,
        path: &str,
        name: Option<&str>,
        is_library: Option<bool>,
    ) -> bool {
        {
            let mut last = self.last_dir_change.lock();
            let now = Instant::now();
            if let Some(previous) = last.get(shell_id) {
                if now.duration_since(*previous) < DIR_CHANGE_DEBOUNCE {
                    return false;
                }
            }
            last.insert(shell_id.to_string(), now);
        }
        let mut params = serde_json::json!({ "path": path });
        if let Some(name) = name {
            params["name"] = serde_json::json!(name);
        }
        if let Some(is_library) = is_library {
            params["isLibrary"] = serde_json::json!(is_library);
        }
        self.runtime.broadcast("workingDirectoryChanged", params);
        true
    }

    pub fn navigation_state_changed(
        &self,
        can_navigate_back: bool,
        can_navigate_forward: bool,
        path: &str,
    ) {
        self.runtime.broadcast(
            "navigationStateChanged",
            serde_json::json!({
                "canNavigateBack": can_navigate_back,
                "canNavigateForward": can_navigate_forward,
                "path": path,
            }),
        );
    }

    /// Selection changed; items beyond the configured cap are dropped and
    /// the payload says so.
    pub fn selection_changed(&self, items: Vec<SelectionItem>) {
        let (items, truncated) = truncate_selection(items, self.config.selection_notification_cap);
        self.runtime.broadcast(
            "selectionChanged",
            serde_json::json!({ "items": items, "truncated": truncated }),
        );
    }

    /// Forget debounce history for a shell that went away.
    pub fn forget_shell(&self, shell_id: &str) {
        self.last_dir_change.lock().remove(shell_id);
    }
}

fn truncate_selection(mut items: Vec<SelectionItem>, cap: usize) -> (Vec<SelectionItem>, bool) {
    let truncated = items.len() > cap;
    if truncated {
        items.truncate(cap);
    }
    (items, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::registry::MethodRegistry;
    use crate::rpc::{DispatchError, RequestHandler};
    use crate::rpc::session::ClientSession;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NullHandler;

    #[async_trait]
    impl RequestHandler for NullHandler {
        async fn handle(
            &self,
            _session: &Arc<ClientSession>,
            _method: &str,
            _params: Value,
        ) -> Result<Value, DispatchError> {
            Ok(Value::Null)
        }
    }

    fn events() -> ShellEvents {
        let runtime = SessionRuntime::new(
            Arc::new(IpcConfig {
                selection_notification_cap: 3,
                ..IpcConfig::default()
            }),
            Arc::new(MethodRegistry::with_builtin_methods()),
            Arc::new(NullHandler),
        );
        ShellEvents::new(runtime)
    }

    #[tokio::test]
    async fn working_directory_changes_are_debounced_per_shell() {
        let events = events();
        assert!(events.working_directory_changed("s1", "/a", None, None));
        // Within the window for the same shell: swallowed.
        assert!(!events.working_directory_changed("s1", "/b", None, None));
        // A different shell has its own window.
        assert!(events.working_directory_changed("s2", "/c", None, None));
    }

    #[tokio::test]
    async fn forget_shell_resets_debounce() {
        let events = events();
        assert!(events.working_directory_changed("s1", "/a", None, None));
        events.forget_shell("s1");
        assert!(events.working_directory_changed("s1", "/b", None, None));
    }

    #[test]
    fn selection_truncates_at_cap() {
        let items: Vec<_> = (0..5)
            .map(|i| SelectionItem {
                path: format!("/tmp/{i}"),
                name: i.to_string(),
                is_dir: false,
            })
            .collect();
        let (kept, truncated) = truncate_selection(items.clone(), 3);
        assert_eq!(kept.len(), 3);
        assert!(truncated);
        assert_eq!(kept[0], items[0]);

        let (kept, truncated) = truncate_selection(items, 200);
        assert_eq!(kept.len(), 5);
        assert!(!truncated);
    }

    #[test]
    fn selection_items_serialize_camel_case() {
        let item = SelectionItem {
            path: "/tmp/x".to_string(),
            name: "x".to_string(),
            is_dir: true,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["isDir"], true);
        assert!(json.get("is_dir").is_none());
    }
}
