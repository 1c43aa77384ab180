use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_WS_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_PIPE_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_QUEUE_CAP_BYTES: usize = 2 * 1024 * 1024;
const DEFAULT_RATE_LIMIT_PER_SECOND: u32 = 20;
const DEFAULT_RATE_LIMIT_BURST: u32 = 60;
const DEFAULT_SELECTION_NOTIFICATION_CAP: usize = 200;
const DEFAULT_GET_METADATA_MAX_ITEMS: usize = 500;
const DEFAULT_GET_METADATA_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SEND_LOOP_IDLE_MS: u64 = 10;
const DEFAULT_WS_PORT: u16 = 52345;

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: explicit constructor value  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Preferred WebSocket port (default: 52345).
    web_socket_port: Option<u16>,
    /// Upper bound on a reassembled WebSocket text message, in bytes.
    web_socket_max_message_bytes: Option<usize>,
    /// Upper bound on a framed pipe message, in bytes.
    pipe_max_message_bytes: Option<usize>,
    /// Soft cap on total queued payload bytes per session.
    per_session_queue_cap_bytes: Option<usize>,
    /// Steady token refill rate, requests per second.
    rate_limit_per_second: Option<u32>,
    /// Token bucket capacity.
    rate_limit_burst: Option<u32>,
    /// Truncation limit for selection broadcasts.
    selection_notification_cap: Option<usize>,
    /// Cap on paths accepted per getMetadata call.
    get_metadata_max_items: Option<usize>,
    /// Wall-clock deadline for a single getMetadata call, in seconds.
    get_metadata_timeout_secs: Option<u64>,
    /// Idle poll interval of the send loop, in milliseconds.
    send_loop_idle_ms: Option<u64>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── IpcConfig ────────────────────────────────────────────────────────────────

/// Explicit per-field overrides: CLI flags, env vars, or host settings.
/// The highest-priority config tier; anything left `None` falls through to
/// the TOML overlay and then the built-in default.
#[derive(Debug, Clone, Default)]
pub struct IpcConfigOverrides {
    pub web_socket_port: Option<u16>,
    pub web_socket_max_message_bytes: Option<usize>,
    pub pipe_max_message_bytes: Option<usize>,
    pub per_session_queue_cap_bytes: Option<usize>,
    pub rate_limit_per_second: Option<u32>,
    pub rate_limit_burst: Option<u32>,
    pub selection_notification_cap: Option<usize>,
    pub get_metadata_max_items: Option<usize>,
    pub get_metadata_timeout_secs: Option<u64>,
    pub send_loop_idle_ms: Option<u64>,
}

/// Runtime caps shared by every component of the IPC server.
///
/// Values are read from any thread through an `Arc<IpcConfig>`; the struct is
/// never mutated while sessions exist. Tests build their own instances with
/// whatever caps the scenario needs.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    pub web_socket_port: u16,
    pub web_socket_max_message_bytes: usize,
    pub pipe_max_message_bytes: usize,
    pub per_session_queue_cap_bytes: usize,
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    pub selection_notification_cap: usize,
    pub get_metadata_max_items: usize,
    pub get_metadata_timeout_secs: u64,
    pub send_loop_idle_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            web_socket_port: DEFAULT_WS_PORT,
            web_socket_max_message_bytes: DEFAULT_WS_MAX_MESSAGE_BYTES,
            pipe_max_message_bytes: DEFAULT_PIPE_MAX_MESSAGE_BYTES,
            per_session_queue_cap_bytes: DEFAULT_QUEUE_CAP_BYTES,
            rate_limit_per_second: DEFAULT_RATE_LIMIT_PER_SECOND,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            selection_notification_cap: DEFAULT_SELECTION_NOTIFICATION_CAP,
            get_metadata_max_items: DEFAULT_GET_METADATA_MAX_ITEMS,
            get_metadata_timeout_secs: DEFAULT_GET_METADATA_TIMEOUT_SECS,
            send_loop_idle_ms: DEFAULT_SEND_LOOP_IDLE_MS,
        }
    }
}

impl IpcConfig {
    /// Build config from the three tiers, per field:
    /// explicit override  >  TOML overlay at `{data_dir}/config.toml`  >
    /// built-in default.
    pub fn load(data_dir: &Path, explicit: IpcConfigOverrides) -> Self {
        let toml = load_toml(data_dir).unwrap_or_default();
        let d = Self::default();
        Self {
            web_socket_port: explicit
                .web_socket_port
                .or(toml.web_socket_port)
                .unwrap_or(d.web_socket_port),
            web_socket_max_message_bytes: explicit
                .web_socket_max_message_bytes
                .or(toml.web_socket_max_message_bytes)
                .unwrap_or(d.web_socket_max_message_bytes),
            pipe_max_message_bytes: explicit
                .pipe_max_message_bytes
                .or(toml.pipe_max_message_bytes)
                .unwrap_or(d.pipe_max_message_bytes),
            per_session_queue_cap_bytes: explicit
                .per_session_queue_cap_bytes
                .or(toml.per_session_queue_cap_bytes)
                .unwrap_or(d.per_session_queue_cap_bytes),
            rate_limit_per_second: explicit
                .rate_limit_per_second
                .or(toml.rate_limit_per_second)
                .unwrap_or(d.rate_limit_per_second),
            rate_limit_burst: explicit
                .rate_limit_burst
                .or(toml.rate_limit_burst)
                .unwrap_or(d.rate_limit_burst),
            selection_notification_cap: explicit
                .selection_notification_cap
                .or(toml.selection_notification_cap)
                .unwrap_or(d.selection_notification_cap),
            get_metadata_max_items: explicit
                .get_metadata_max_items
                .or(toml.get_metadata_max_items)
                .unwrap_or(d.get_metadata_max_items),
            get_metadata_timeout_secs: explicit
                .get_metadata_timeout_secs
                .or(toml.get_metadata_timeout_secs)
                .unwrap_or(d.get_metadata_timeout_secs),
            send_loop_idle_ms: explicit
                .send_loop_idle_ms
                .or(toml.send_loop_idle_ms)
                .unwrap_or(d.send_loop_idle_ms),
        }
    }
}

/// Default data directory for the token store and descriptor file.
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("files-ipc");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("files-ipc");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("files-ipc");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("files-ipc");
        }
    }
    // Fallback
    PathBuf::from(".files-ipc")
}

/// Per-user runtime directory for short-lived endpoints (rendezvous
/// descriptor, pipe socket). Prefers `$XDG_RUNTIME_DIR`, which is
/// user-owned with mode 0700 on every mainstream distro.
pub fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("files-ipc");
        }
    }
    default_data_dir().join("run")
}
