//! Shared-secret lifecycle.
//!
//! The remote-control token is a random URL-safe string with at least 32
//! bytes of entropy, stored encrypted at rest next to the opt-in flag and a
//! monotonically increasing epoch. The encryption key is derived from
//! user-bound machine material, so copying the blob to another account or
//! machine yields garbage and simply forces a fresh token.
//!
//! Rotation persists the new token and the incremented epoch in one atomic
//! file replacement — an epoch bump without a persisted token cannot be
//! observed.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

use crate::fsio::write_atomic_owner_only;

const STORE_FILE: &str = "remote.json";
const TOKEN_ENTROPY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const HKDF_SALT: &[u8] = b"files-ipc token store v1";
const HKDF_INFO: &[u8] = b"token-at-rest";

/// On-disk layout of `{data_dir}/remote.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoreFile {
    enabled: bool,
    epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ciphertext: Option<String>,
}

/// Encrypt-at-rest shared secret plus epoch counter.
pub struct TokenStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STORE_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreFile {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return StoreFile::default();
        };
        match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), err = %e, "token store unreadable — starting fresh");
                StoreFile::default()
            }
        }
    }

    fn persist(&self, state: &StoreFile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic_owner_only(&self.path, &bytes)
            .with_context(|| format!("failed to persist {}", self.path.display()))
    }

    // ── Opt-in flag ───────────────────────────────────────────────────────────

    pub fn is_enabled(&self) -> bool {
        self.load().enabled
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut state = self.load();
        state.enabled = enabled;
        self.persist(&state)
    }

    // ── Epoch ─────────────────────────────────────────────────────────────────

    /// Current epoch; initializes to 1 on first read.
    pub fn get_epoch(&self) -> Result<u64> {
        let state = self.load();
        if state.epoch > 0 {
            return Ok(state.epoch);
        }
        let _guard = self.write_lock.lock();
        let mut state = self.load();
        if state.epoch == 0 {
            state.epoch = 1;
            self.persist(&state)?;
        }
        Ok(state.epoch)
    }

    // ── Token ─────────────────────────────────────────────────────────────────

    /// Decrypt and return the stored token. If the blob is absent or cannot
    /// be deciphered, generate a fresh token, persist it encrypted, and
    /// reset the epoch to 1.
    pub fn get_or_create_token(&self) -> Result<String> {
        let _guard = self.write_lock.lock();
        let mut state = self.load();
        if let Some(token) = decrypt_blob(&state) {
            return Ok(token);
        }
        let token = generate_token();
        let (nonce, ciphertext) = encrypt_token(&token)?;
        state.nonce = Some(nonce);
        state.ciphertext = Some(ciphertext);
        state.epoch = 1;
        self.persist(&state)?;
        Ok(token)
    }

    /// Generate and persist a new token and increment the epoch.
    ///
    /// The new blob and the bumped epoch land in one atomic write; if
    /// persistence fails, the previous token and epoch remain in force.
    pub fn rotate_token(&self) -> Result<String> {
        let _guard = self.write_lock.lock();
        let mut state = self.load();
        let token = generate_token();
        let (nonce, ciphertext) = encrypt_token(&token)?;
        state.nonce = Some(nonce);
        state.ciphertext = Some(ciphertext);
        state.epoch = state.epoch.max(1) + 1;
        self.persist(&state)
            .context("token rotation failed to persist — keeping previous token")?;
        Ok(token)
    }
}

// ─── Token material ───────────────────────────────────────────────────────────

/// Random URL-safe token with `TOKEN_ENTROPY_BYTES` of entropy,
/// base64-encoded without padding.
pub(crate) fn generate_token() -> String {
    let mut raw = [0u8; TOKEN_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

/// Constant-time string comparison so a token check never becomes a timing
/// oracle. Returns `true` iff `a == b` without short-circuiting on mismatch.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

// ─── At-rest encryption ───────────────────────────────────────────────────────

/// Key bound to the current user and machine: HKDF-SHA256 over the machine
/// id (when readable), the account name, and the numeric uid.
fn derive_key() -> Key {
    let mut ikm = Vec::new();
    if let Ok(machine_id) = std::fs::read_to_string("/etc/machine-id") {
        ikm.extend_from_slice(machine_id.trim().as_bytes());
    }
    ikm.extend_from_slice(current_user().as_bytes());
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let uid = unsafe { libc::geteuid() };
        ikm.extend_from_slice(&uid.to_le_bytes());
    }

    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &ikm);
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .expect("HKDF output length is valid");
    *Key::from_slice(&okm)
}

fn encrypt_token(token: &str) -> Result<(String, String)> {
    let cipher = ChaCha20Poly1305::new(&derive_key());
    let mut nonce_bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = match cipher.encrypt(nonce, token.as_bytes()) {
        Ok(ct) => ct,
        Err(_) => bail!("token encryption failed"),
    };
    Ok((
        URL_SAFE_NO_PAD.encode(nonce_bytes),
        URL_SAFE_NO_PAD.encode(ciphertext),
    ))
}

fn decrypt_blob(state: &StoreFile) -> Option<String> {
    let nonce_b64 = state.nonce.as_deref()?;
    let ct_b64 = state.ciphertext.as_deref()?;
    let nonce_bytes = URL_SAFE_NO_PAD.decode(nonce_b64).ok()?;
    if nonce_bytes.len() != NONCE_BYTES {
        return None;
    }
    let ciphertext = URL_SAFE_NO_PAD.decode(ct_b64).ok()?;
    let cipher = ChaCha20Poly1305::new(&derive_key());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .ok()?;
    String::from_utf8(plaintext).ok()
}

/// Current account name, used both for key derivation and endpoint naming.
pub(crate) fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
