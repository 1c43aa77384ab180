use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use files_ipc::config::{default_data_dir, IpcConfig, IpcConfigOverrides};
use files_ipc::shell::registry::ShellRegistry;
use files_ipc::uiqueue::UiQueue;
use files_ipc::{AdapterError, IpcServer, Rendezvous, ShellAdapter, ShellDescriptor, TokenStore};
use serde_json::{json, Value};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "files-ipcd",
    about = "Files remote-control IPC server (standalone demo host)",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Data directory for the token store and config
    #[arg(long, env = "FILES_IPC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Preferred WebSocket port (overrides config.toml)
    #[arg(long, env = "FILES_IPC_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FILES_IPC_LOG")]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the IPC server in the foreground with a demo filesystem shell
    /// (default when no subcommand is given).
    Serve,
    /// Opt in to remote control.
    Enable,
    /// Opt out: the server will refuse to start until re-enabled.
    Disable,
    /// Inspect or rotate the shared secret.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Print the current token and epoch (the Settings "Copy" action).
    Show,
    /// Rotate the token; existing sessions expire on their next request.
    Rotate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = args.log.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    let token_store = TokenStore::new(&data_dir);

    match args.command.unwrap_or(Command::Serve) {
        Command::Enable => {
            token_store.set_enabled(true)?;
            println!("remote control enabled");
        }
        Command::Disable => {
            token_store.set_enabled(false)?;
            println!("remote control disabled");
        }
        Command::Token { action } => match action {
            TokenAction::Show => {
                let token = token_store.get_or_create_token()?;
                let epoch = token_store.get_epoch()?;
                println!("token: {token}");
                println!("epoch: {epoch}");
            }
            TokenAction::Rotate => {
                let token = token_store.rotate_token()?;
                let epoch = token_store.get_epoch()?;
                println!("token: {token}");
                println!("epoch: {epoch}");
            }
        },
        Command::Serve => serve(data_dir, args.port).await?,
    }
    Ok(())
}

async fn serve(data_dir: PathBuf, port: Option<u16>) -> Result<()> {
    let token_store = Arc::new(TokenStore::new(&data_dir));
    if !token_store.is_enabled() {
        bail!("remote control is disabled — run `files-ipcd enable` first");
    }

    let config = Arc::new(IpcConfig::load(
        &data_dir,
        IpcConfigOverrides {
            web_socket_port: port,
            ..IpcConfigOverrides::default()
        },
    ));
    let rendezvous = Arc::new(Rendezvous::at_default_path());
    let shells = Arc::new(ShellRegistry::new());
    let ui = Arc::new(UiQueue::new());
    let server = IpcServer::new(config, token_store, rendezvous, shells.clone(), Some(ui));

    // Stand-in for a real host view: a read-only filesystem shell rooted
    // at the home directory.
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/"));
    shells.register(ShellDescriptor {
        shell_id: "demo-shell".to_string(),
        window_id: 1,
        tab_id: "tab-1".to_string(),
        adapter: Arc::new(FsShellAdapter::new(home)),
        active: true,
    });
    shells.set_focused_window(Some(1));

    server.start().await?;
    info!(descriptor = %files_ipc::config::runtime_dir().join("descriptor.json").display(),
        "serving — press Ctrl-C to stop");

    shutdown_signal().await;
    info!("shutdown signal received");
    server.stop().await;
    Ok(())
}

/// Resolves when a shutdown signal is received: SIGTERM or Ctrl-C on Unix,
/// Ctrl-C elsewhere.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

// ─── Demo adapter ─────────────────────────────────────────────────────────────

struct ViewState {
    current: PathBuf,
    back: Vec<PathBuf>,
    forward: Vec<PathBuf>,
}

/// Read-only filesystem shell used when running standalone.
struct FsShellAdapter {
    state: parking_lot::Mutex<ViewState>,
}

impl FsShellAdapter {
    fn new(root: PathBuf) -> Self {
        Self {
            state: parking_lot::Mutex::new(ViewState {
                current: root,
                back: Vec::new(),
                forward: Vec::new(),
            }),
        }
    }

    fn state_json(&self) -> Value {
        let state = self.state.lock();
        json!({
            "path": state.current.display().to_string(),
            "name": state.current.file_name().map(|n| n.to_string_lossy().to_string()),
            "canNavigateBack": !state.back.is_empty(),
            "canNavigateForward": !state.forward.is_empty(),
        })
    }
}

#[async_trait]
impl ShellAdapter for FsShellAdapter {
    async fn get_state(&self) -> Result<Value, AdapterError> {
        Ok(self.state_json())
    }

    async fn list_actions(&self) -> Result<Value, AdapterError> {
        Ok(json!({
            "actions": [
                { "id": "refresh", "label": "Refresh" },
                { "id": "navigateBack", "label": "Back" },
                { "id": "navigateForward", "label": "Forward" },
            ]
        }))
    }

    async fn navigate(&self, path: PathBuf) -> Result<Value, AdapterError> {
        if !path.is_dir() {
            return Err(AdapterError::domain(-32602, "Not a directory"));
        }
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.current, path);
        state.back.push(previous);
        state.forward.clear();
        Ok(Value::Null)
    }

    async fn get_metadata(&self, paths: Vec<String>) -> Result<Value, AdapterError> {
        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let item = match tokio::fs::metadata(&path).await {
                Ok(meta) => json!({
                    "path": path,
                    "exists": true,
                    "isDir": meta.is_dir(),
                    "size": meta.len(),
                }),
                Err(_) => json!({ "path": path, "exists": false }),
            };
            items.push(item);
        }
        Ok(json!({ "items": items }))
    }

    async fn execute_action(
        &self,
        action_id: String,
        _target_shell_id: Option<String>,
    ) -> Result<Value, AdapterError> {
        match action_id.as_str() {
            "refresh" => Ok(Value::Null),
            "navigateBack" => {
                let mut state = self.state.lock();
                let Some(previous) = state.back.pop() else {
                    return Err(AdapterError::domain(-32602, "Nothing to navigate back to"));
                };
                let current = std::mem::replace(&mut state.current, previous);
                state.forward.push(current);
                Ok(Value::Null)
            }
            "navigateForward" => {
                let mut state = self.state.lock();
                let Some(next) = state.forward.pop() else {
                    return Err(AdapterError::domain(-32602, "Nothing to navigate forward to"));
                };
                let current = std::mem::replace(&mut state.current, next);
                state.back.push(current);
                Ok(Value::Null)
            }
            _ => Err(AdapterError::domain(-32602, "Unknown action")),
        }
    }
}
