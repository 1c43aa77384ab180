//! Transport seam between listeners and the session runtime.
//!
//! Each transport turns an accepted connection into a `FrameSource` /
//! `FrameSink` pair carrying whole UTF-8 JSON payloads; the runtime never
//! sees sockets or framing. Framing violations are fatal to the session:
//! the runtime closes it and the reaper garbage-collects the state.

#[cfg(unix)]
pub mod pipe;
pub mod ws;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("frame of {len} bytes exceeds the {cap}-byte cap")]
    Oversize { len: usize, cap: usize },
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
}

/// Reader half of one connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next complete payload. `Ok(None)` is a clean close; an error is a
    /// framing or IO violation and ends the session.
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError>;
}

/// Writer half of one connection. The session's send loop is the only
/// caller, which is what serializes writes per connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, payload: String) -> Result<(), TransportError>;
}
