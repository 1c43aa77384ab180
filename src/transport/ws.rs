//! Loopback WebSocket listener.
//!
//! Binds IPv4 loopback only — remote reachability is a non-goal and the
//! bind address is the first line of defense. Non-upgrade HTTP requests are
//! answered with a plain 400 so that a stray browser or curl gets an
//! immediate answer instead of a hung socket.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tracing::{debug, error, info};

use super::{FrameSink, FrameSource, TransportError};
use crate::rpc::SessionRuntime;

/// Port scan range used when the preferred port is taken.
const FALLBACK_PORTS: std::ops::Range<u16> = 40000..40100;
/// How long to wait for the HTTP preamble before treating the connection
/// as a non-upgrade request.
const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct WsListener {
    listener: TcpListener,
    port: u16,
}

impl WsListener {
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Bind the loopback listener at the preferred port, falling back to a
/// scan of the reserved range.
pub async fn bind(preferred_port: u16) -> Result<WsListener> {
    if let Ok(listener) = TcpListener::bind(("127.0.0.1", preferred_port)).await {
        let port = listener.local_addr()?.port();
        return Ok(WsListener { listener, port });
    }
    for port in FALLBACK_PORTS {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)).await {
            debug!(preferred = preferred_port, port, "preferred port taken — using fallback");
            return Ok(WsListener { listener, port });
        }
    }
    bail!(
        "no free loopback port: preferred {} and fallback range {}..{} all taken",
        preferred_port,
        FALLBACK_PORTS.start,
        FALLBACK_PORTS.end
    )
}

/// Run the accept loop until the runtime's root cancellation fires.
pub fn serve(listener: WsListener, runtime: Arc<SessionRuntime>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cancel = runtime.root_token();
        info!(port = listener.port, "WebSocket transport listening on 127.0.0.1");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                conn = listener.listener.accept() => {
                    let (stream, peer) = match conn {
                        Ok(c) => c,
                        Err(e) => {
                            error!(err = %e, "websocket accept error");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "new websocket connection");
                    let runtime = runtime.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, runtime).await {
                            debug!(peer = %peer, err = %e, "websocket connection error");
                        }
                    });
                }
            }
        }
        info!("WebSocket transport stopped");
    })
}

async fn handle_connection(stream: TcpStream, runtime: Arc<SessionRuntime>) -> Result<()> {
    let preamble = peek_preamble(&stream).await;
    if !is_websocket_upgrade(&preamble) {
        return reject_with_400(stream).await;
    }

    let cap = runtime.config().web_socket_max_message_bytes;
    let ws_config = WebSocketConfig {
        max_message_size: Some(cap),
        max_frame_size: Some(cap),
        ..Default::default()
    };
    let ws = accept_async_with_config(stream, Some(ws_config)).await?;
    let (sink, source) = ws.split();
    runtime.attach(
        WsFrameSource { inner: source },
        WsFrameSink { inner: sink },
        "ws",
    );
    Ok(())
}

/// Peek the HTTP request head without consuming it, waiting briefly for
/// the headers to arrive.
async fn peek_preamble(stream: &TcpStream) -> String {
    let deadline = tokio::time::Instant::now() + PREAMBLE_TIMEOUT;
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.peek(&mut buf).await.unwrap_or(0);
        let head = String::from_utf8_lossy(&buf[..n]).to_string();
        if head.contains("\r\n\r\n") || n == buf.len() {
            return head;
        }
        if tokio::time::Instant::now() >= deadline {
            return head;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn is_websocket_upgrade(preamble: &str) -> bool {
    let lower = preamble.to_ascii_lowercase();
    lower.contains("upgrade:") && lower.contains("websocket")
}

async fn reject_with_400(mut stream: TcpStream) -> Result<()> {
    debug!("non-upgrade request on websocket port — responding 400");
    let body = "WebSocket upgrade required";
    let response = format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await.ok();
    Ok(())
}

// ─── Frame adapters ───────────────────────────────────────────────────────────

pub struct WsFrameSource {
    inner: SplitStream<WebSocketStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(_))) => {
                    return Err(TransportError::InvalidFrame("binary frame on text transport"))
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Control frames are transport-level noise here.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

pub struct WsFrameSink {
    inner: SplitSink<WebSocketStream<TcpStream>, Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&mut self, payload: String) -> Result<(), TransportError> {
        self.inner.send(Message::Text(payload)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_upgrade_requests() {
        let upgrade = "GET / HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n";
        assert!(is_websocket_upgrade(upgrade));
        // Header names and values are case-insensitive on the wire.
        let mixed = "GET / HTTP/1.1\r\nUpgrade: WebSocket\r\n\r\n";
        assert!(is_websocket_upgrade(mixed));
    }

    #[test]
    fn plain_http_is_not_an_upgrade() {
        assert!(!is_websocket_upgrade("GET /health HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(!is_websocket_upgrade(""));
        assert!(!is_websocket_upgrade("POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc"));
    }

    #[tokio::test]
    async fn bind_scans_past_a_taken_port() {
        let first = bind(0).await.unwrap();
        assert_ne!(first.port(), 0);
        // Asking for the port the first listener holds forces the fallback
        // scan into [40000, 40100).
        let second = bind(first.port()).await.unwrap();
        assert_ne!(second.port(), first.port());
        assert!(FALLBACK_PORTS.contains(&second.port()));
    }
}
