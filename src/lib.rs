//! Local remote-control IPC server for the Files desktop file manager.
//!
//! Cooperating processes on the same machine connect over a loopback
//! WebSocket or a per-user pipe endpoint, authenticate with a rotating
//! shared secret, and drive the host shell through JSON-RPC 2.0. The host
//! embeds [`server::IpcServer`], registers its views through
//! [`shell::registry::ShellRegistry`], and reports view changes through
//! [`events::ShellEvents`].

pub mod config;
pub mod events;
pub(crate) mod fsio;
pub mod rendezvous;
pub mod rpc;
pub mod sanitize;
pub mod server;
pub mod shell;
pub mod token;
pub mod transport;
pub mod uiqueue;

pub use config::IpcConfig;
pub use rendezvous::{Descriptor, Rendezvous};
pub use server::IpcServer;
pub use shell::{AdapterError, ShellAdapter, ShellDescriptor};
pub use token::TokenStore;
