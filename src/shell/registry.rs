//! Registry of live host views.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use super::ShellDescriptor;

#[derive(Default)]
struct Inner {
    shells: HashMap<String, ShellDescriptor>,
    focused_window: Option<u64>,
}

/// Tracks registered shells and which one is active per window.
///
/// `list` returns a stable snapshot; holders of a returned descriptor keep
/// the adapter alive, but unregistration clears the registry's reference
/// before the host destroys the view.
#[derive(Default)]
pub struct ShellRegistry {
    inner: RwLock<Inner>,
}

impl ShellRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view. If the descriptor claims to be active it becomes the
    /// unique active shell of its window.
    pub fn register(&self, descriptor: ShellDescriptor) {
        let mut inner = self.inner.write();
        if descriptor.active {
            for other in inner.shells.values_mut() {
                if other.window_id == descriptor.window_id {
                    other.active = false;
                }
            }
        }
        debug!(shell = %descriptor.shell_id, window = descriptor.window_id, "shell registered");
        inner.shells.insert(descriptor.shell_id.clone(), descriptor);
    }

    pub fn unregister(&self, shell_id: &str) {
        let mut inner = self.inner.write();
        if inner.shells.remove(shell_id).is_some() {
            debug!(shell = %shell_id, "shell unregistered");
        }
    }

    pub fn get_by_id(&self, shell_id: &str) -> Option<ShellDescriptor> {
        self.inner.read().shells.get(shell_id).cloned()
    }

    pub fn get_active_for_window(&self, window_id: u64) -> Option<ShellDescriptor> {
        self.inner
            .read()
            .shells
            .values()
            .find(|d| d.window_id == window_id && d.active)
            .cloned()
    }

    /// Atomically make `shell_id` the unique active shell of its window.
    /// Returns false when the shell is not registered.
    pub fn set_active(&self, shell_id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(window_id) = inner.shells.get(shell_id).map(|d| d.window_id) else {
            return false;
        };
        for d in inner.shells.values_mut() {
            if d.window_id == window_id {
                d.active = d.shell_id == shell_id;
            }
        }
        true
    }

    pub fn set_focused_window(&self, window_id: Option<u64>) {
        self.inner.write().focused_window = window_id;
    }

    pub fn focused_window(&self) -> Option<u64> {
        self.inner.read().focused_window
    }

    /// Stable snapshot of every registered shell.
    pub fn list(&self) -> Vec<ShellDescriptor> {
        let mut shells: Vec<_> = self.inner.read().shells.values().cloned().collect();
        shells.sort_by(|a, b| a.shell_id.cmp(&b.shell_id));
        shells
    }

    pub fn len(&self) -> usize {
        self.inner.read().shells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().shells.is_empty()
    }
}
