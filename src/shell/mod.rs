//! Host-shell adapter seam.
//!
//! The file-manager shell itself is out of scope; the runtime sees it only
//! through `ShellAdapter` (per-view operations) and the `ShellRegistry`
//! (which views exist, which is active). Adapter handles are registered
//! when a host view opens and unregistered before the view is destroyed,
//! and the runtime never retains one across a request boundary.

pub mod coordinator;
pub mod path;
pub mod registry;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A failure raised by the host adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Domain failure with a JSON-RPC error code to preserve.
    #[error("{message}")]
    Domain { code: i32, message: String },
    /// Access-control or cryptographic failure; detail never leaves the
    /// process.
    #[error("access denied")]
    AccessDenied,
    /// The call observed the session or deadline cancellation.
    #[error("operation cancelled")]
    Cancelled,
    /// Anything else; scrubbed before reporting.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AdapterError {
    pub fn domain(code: i32, message: impl Into<String>) -> Self {
        Self::Domain {
            code,
            message: message.into(),
        }
    }
}

/// Per-view operations provided by the host.
#[async_trait]
pub trait ShellAdapter: Send + Sync {
    /// Current view state (working directory, navigation flags, selection).
    async fn get_state(&self) -> Result<Value, AdapterError>;

    /// Commands the view can execute right now.
    async fn list_actions(&self) -> Result<Value, AdapterError>;

    /// Navigate the view to an already-validated absolute path.
    async fn navigate(&self, path: PathBuf) -> Result<Value, AdapterError>;

    /// Stat-like metadata for each path, in input order.
    async fn get_metadata(&self, paths: Vec<String>) -> Result<Value, AdapterError>;

    /// Execute a catalog action against this view. `target_shell_id` is the
    /// explicitly requested target, passed through so the adapter never has
    /// to consult ambient focus.
    async fn execute_action(
        &self,
        action_id: String,
        target_shell_id: Option<String>,
    ) -> Result<Value, AdapterError>;
}

/// One registered host view.
#[derive(Clone)]
pub struct ShellDescriptor {
    pub shell_id: String,
    pub window_id: u64,
    pub tab_id: String,
    pub adapter: Arc<dyn ShellAdapter>,
    pub active: bool,
}

impl std::fmt::Debug for ShellDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellDescriptor")
            .field("shell_id", &self.shell_id)
            .field("window_id", &self.window_id)
            .field("tab_id", &self.tab_id)
            .field("active", &self.active)
            .finish()
    }
}
