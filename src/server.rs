//! Server composition root.
//!
//! Wires the token store, rendezvous descriptor, session runtime, and both
//! transports into one start/stop surface for the host. Starting refuses
//! when remote control is not enabled; stopping tears down the transports,
//! cancels every session, and deletes the descriptor. Rotation re-arms the
//! runtime so every pre-rotation session is expired on its next request.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::IpcConfig;
use crate::events::ShellEvents;
use crate::rendezvous::Rendezvous;
use crate::rpc::registry::MethodRegistry;
use crate::rpc::SessionRuntime;
use crate::shell::coordinator::Coordinator;
use crate::shell::registry::ShellRegistry;
use crate::token::TokenStore;
use crate::transport::ws;
use crate::uiqueue::UiQueue;

struct Running {
    ws_port: u16,
    pipe_name: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct IpcServer {
    config: Arc<IpcConfig>,
    token_store: Arc<TokenStore>,
    rendezvous: Arc<Rendezvous>,
    shells: Arc<ShellRegistry>,
    runtime: Arc<SessionRuntime>,
    events: Arc<ShellEvents>,
    /// Directory for the pipe endpoint; shares the descriptor's location.
    endpoint_dir: PathBuf,
    state: Mutex<Option<Running>>,
}

impl IpcServer {
    pub fn new(
        config: Arc<IpcConfig>,
        token_store: Arc<TokenStore>,
        rendezvous: Arc<Rendezvous>,
        shells: Arc<ShellRegistry>,
        ui: Option<Arc<UiQueue>>,
    ) -> Arc<Self> {
        let registry = Arc::new(MethodRegistry::with_builtin_methods());
        let coordinator = Arc::new(Coordinator::new(shells.clone(), config.clone(), ui));
        let runtime = SessionRuntime::new(config.clone(), registry, coordinator);
        let events = Arc::new(ShellEvents::new(runtime.clone()));
        let endpoint_dir = rendezvous
            .current_path()
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(crate::config::runtime_dir);
        Arc::new(Self {
            config,
            token_store,
            rendezvous,
            shells,
            runtime,
            events,
            endpoint_dir,
            state: Mutex::new(None),
        })
    }

    pub fn runtime(&self) -> &Arc<SessionRuntime> {
        &self.runtime
    }

    pub fn shells(&self) -> &Arc<ShellRegistry> {
        &self.shells
    }

    pub fn events(&self) -> &Arc<ShellEvents> {
        &self.events
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.token_store
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    pub async fn ws_port(&self) -> Option<u16> {
        self.state.lock().await.as_ref().map(|r| r.ws_port)
    }

    pub async fn pipe_name(&self) -> Option<String> {
        self.state.lock().await.as_ref().and_then(|r| r.pipe_name.clone())
    }

    /// Start both transports and the timers.
    ///
    /// Refuses when the user has not opted in. Snapshots the token and
    /// epoch, binds the listeners, then publishes the rendezvous
    /// descriptor — in that order, so the descriptor never advertises an
    /// endpoint that is not yet accepting.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            info!("ipc server already running");
            return Ok(());
        }
        if !self.token_store.is_enabled() {
            warn!("remote control is disabled — refusing to start");
            bail!("remote control is disabled");
        }

        let token = self.token_store.get_or_create_token()?;
        let epoch = self.token_store.get_epoch()?;
        self.runtime.arm(token.clone(), epoch);
        self.rendezvous.set_token(&token);

        let ws_listener = ws::bind(self.config.web_socket_port).await?;
        let ws_port = ws_listener.port();
        let mut tasks = vec![ws::serve(ws_listener, self.runtime.clone())];

        let mut pipe_name = None;
        #[cfg(unix)]
        {
            use crate::transport::pipe;
            match pipe::bind(&self.endpoint_dir) {
                Ok(listener) => {
                    pipe_name = Some(listener.name().to_string());
                    tasks.push(pipe::serve(listener, self.runtime.clone()));
                }
                Err(e) => {
                    warn!(err = %e, "pipe transport unavailable — continuing with WebSocket only");
                }
            }
        }

        self.rendezvous.update(Some(ws_port), pipe_name.clone(), epoch)?;
        tasks.extend(self.runtime.start_timers());

        info!(ws_port, pipe = pipe_name.as_deref().unwrap_or("-"), epoch, "ipc server started");
        *state = Some(Running {
            ws_port,
            pipe_name,
            tasks,
        });
        Ok(())
    }

    /// Stop the transports, cancel every session, delete the descriptor.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return;
        };
        self.runtime.shutdown();
        if let Err(e) = self.rendezvous.delete() {
            warn!(err = %e, "failed to delete rendezvous descriptor");
        }
        for mut task in running.tasks {
            // The loops exit on the root cancellation; abort is the backstop.
            if tokio::time::timeout(std::time::Duration::from_secs(2), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        info!("ipc server stopped");
    }

    /// Rotate the shared secret.
    ///
    /// Sessions authenticated under the previous epoch receive one
    /// session-expired error on their next request and are then closed.
    pub async fn rotate(&self) -> Result<String> {
        let token = self.token_store.rotate_token()?;
        let epoch = self.token_store.get_epoch()?;
        self.runtime.arm(token.clone(), epoch);
        self.rendezvous.set_token(&token);

        let state = self.state.lock().await;
        if let Some(running) = state.as_ref() {
            self.rendezvous
                .update(Some(running.ws_port), running.pipe_name.clone(), epoch)?;
        }
        info!(epoch, "token rotated");
        Ok(token)
    }
}
