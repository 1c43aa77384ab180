//! Per-user duplex pipe listener.
//!
//! Rendered as a Unix domain socket: the endpoint lives in an owner-only
//! (0700) runtime directory and the socket itself is chmod 0600, so the
//! access control grants exactly the current user. There is deliberately no
//! deny rule anywhere — a broad deny would also match the owner through a
//! group and lock out the very user the endpoint exists for.
//!
//! Framing is a 4-byte little-endian length prefix followed by exactly that
//! many UTF-8 bytes. A zero or oversize length, EOF mid-body, or invalid
//! UTF-8 closes the session without dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand_core::{OsRng, RngCore};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{FrameSink, FrameSource, TransportError};
use crate::fsio::ensure_private_dir;
use crate::rpc::SessionRuntime;
use crate::token::current_user;

pub struct PipeListener {
    listener: UnixListener,
    name: String,
    path: PathBuf,
}

impl PipeListener {
    /// Endpoint name advertised in the rendezvous descriptor.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }
}

/// Per-user endpoint name with a random 128-bit suffix.
fn endpoint_name() -> String {
    let mut suffix = [0u8; 16];
    OsRng.fill_bytes(&mut suffix);
    format!("Files_IPC_{}_{}", current_user(), hex::encode(suffix))
}

/// Bind a fresh endpoint inside `dir`, restricting both the directory and
/// the socket to the current user.
pub fn bind(dir: &Path) -> Result<PipeListener> {
    ensure_private_dir(dir)?;
    let name = endpoint_name();
    let path = dir.join(format!("{name}.sock"));
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("failed to bind pipe endpoint {}", path.display()))?;
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(PipeListener {
        listener,
        name,
        path,
    })
}

/// Run the accept loop until the runtime's root cancellation fires, then
/// remove the socket file.
pub fn serve(listener: PipeListener, runtime: Arc<SessionRuntime>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cancel = runtime.root_token();
        info!(endpoint = %listener.name, "pipe transport listening");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                conn = listener.listener.accept() => {
                    let (stream, _addr) = match conn {
                        Ok(c) => c,
                        Err(e) => {
                            error!(err = %e, "pipe accept error");
                            continue;
                        }
                    };
                    debug!("new pipe connection");
                    let cap = runtime.config().pipe_max_message_bytes;
                    let (reader, writer) = stream.into_split();
                    runtime.attach(
                        PipeFrameSource {
                            reader: BufReader::new(reader),
                            cap,
                        },
                        PipeFrameSink {
                            writer: BufWriter::new(writer),
                            cap,
                        },
                        "pipe",
                    );
                }
            }
        }
        if let Err(e) = std::fs::remove_file(&listener.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(err = %e, "failed to remove pipe socket");
            }
        }
        info!("pipe transport stopped");
    })
}

// ─── Frame adapters ───────────────────────────────────────────────────────────

pub struct PipeFrameSource<R> {
    reader: BufReader<R>,
    cap: usize,
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for PipeFrameSource<R> {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        // A clean close happens between frames; EOF inside the prefix or
        // the body is a framing violation.
        let mut prefix = [0u8; 4];
        let mut filled = 0;
        while filled < prefix.len() {
            let n = self.reader.read(&mut prefix[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(TransportError::InvalidFrame("eof inside length prefix"));
            }
            filled += n;
        }
        let len = u32::from_le_bytes(prefix) as usize;
        if len == 0 {
            return Err(TransportError::InvalidFrame("zero-length frame"));
        }
        if len > self.cap {
            return Err(TransportError::Oversize { len, cap: self.cap });
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(|_| TransportError::InvalidFrame("eof inside frame body"))?;
        String::from_utf8(body)
            .map(Some)
            .map_err(|_| TransportError::InvalidFrame("frame body is not utf-8"))
    }
}

pub struct PipeFrameSink<W> {
    writer: BufWriter<W>,
    cap: usize,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for PipeFrameSink<W> {
    async fn send_frame(&mut self, payload: String) -> Result<(), TransportError> {
        let bytes = payload.as_bytes();
        if bytes.len() > self.cap {
            return Err(TransportError::Oversize {
                len: bytes.len(),
                cap: self.cap,
            });
        }
        self.writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
