//! Rendezvous descriptor file.
//!
//! Local clients discover the server through a small JSON file at a
//! well-known per-user path: which WebSocket port and pipe endpoint to dial,
//! the token to present, the epoch, and the server pid. The file is written
//! atomically (temp file + rename) with owner-only permissions; readers see
//! a complete descriptor or no file at all.
//!
//! The token in the descriptor is sticky for the process lifetime, and a
//! `delete` latches so the file is never resurrected by a late transport
//! update during shutdown.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::runtime_dir;
use crate::fsio::{ensure_private_dir, write_atomic_owner_only};
use crate::token::generate_token;

const DESCRIPTOR_FILE: &str = "descriptor.json";

/// On-disk descriptor. Field names are part of the client contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_socket_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe_name: Option<String>,
    pub token: String,
    pub epoch: u64,
    pub server_pid: u32,
    pub created_utc: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    /// Token embedded in the descriptor; fixed once chosen.
    sticky_token: Option<String>,
    /// Set by `delete`; later updates become no-ops until process restart.
    deleted: bool,
}

/// Writer/owner of the per-user descriptor file.
pub struct Rendezvous {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl Rendezvous {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Descriptor at the deterministic per-user path.
    pub fn at_default_path() -> Self {
        Self::new(runtime_dir().join(DESCRIPTOR_FILE))
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    /// Parse the descriptor on disk, if any. Corrupt content reads as absent.
    pub fn read(&self) -> Option<Descriptor> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Pin the token the descriptor will advertise. The server calls this
    /// with the token it actually accepts before publishing any endpoint.
    pub fn set_token(&self, token: &str) {
        self.inner.lock().sticky_token = Some(token.to_string());
    }

    /// The descriptor's token: the sticky one, else the one already on
    /// disk, else freshly generated. The file write is deferred to the
    /// next `update`.
    pub fn get_or_create_token(&self) -> String {
        let mut inner = self.inner.lock();
        if let Some(token) = &inner.sticky_token {
            return token.clone();
        }
        let token = self
            .read_unlocked()
            .map(|d| d.token)
            .unwrap_or_else(generate_token);
        inner.sticky_token = Some(token.clone());
        token
    }

    fn read_unlocked(&self) -> Option<Descriptor> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Merge the given transport fields into the descriptor and write it
    /// atomically. Newer transport fields override older ones; absent
    /// arguments keep whatever the file already advertises. A no-op after
    /// `delete` was called in this process.
    pub fn update(
        &self,
        ws_port: Option<u16>,
        pipe_name: Option<String>,
        epoch: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.deleted {
            debug!("rendezvous already deleted — skipping update");
            return Ok(());
        }

        let existing = self.read_unlocked();
        let token = match &inner.sticky_token {
            Some(token) => token.clone(),
            None => {
                let token = existing
                    .as_ref()
                    .map(|d| d.token.clone())
                    .unwrap_or_else(generate_token);
                inner.sticky_token = Some(token.clone());
                token
            }
        };

        let descriptor = Descriptor {
            web_socket_port: ws_port.or(existing.as_ref().and_then(|d| d.web_socket_port)),
            pipe_name: pipe_name.or(existing.as_ref().and_then(|d| d.pipe_name.clone())),
            token,
            epoch,
            server_pid: std::process::id(),
            created_utc: SystemTime::now().into(),
        };

        if let Some(parent) = self.path.parent() {
            ensure_private_dir(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&descriptor)?;
        write_atomic_owner_only(&self.path, &bytes)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        debug!(path = %self.path.display(), epoch, "rendezvous descriptor updated");
        Ok(())
    }

    /// Remove the descriptor and latch the deleted flag.
    pub fn delete(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.deleted = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", self.path.display())),
        }
    }
}
