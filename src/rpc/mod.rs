//! Transport-agnostic session runtime.
//!
//! Transports hand accepted connections to `SessionRuntime::attach`, which
//! owns everything from there: one receive task enforcing the JSON-RPC
//! protocol and one send task draining the session's priority queue, plus
//! the process-wide keepalive and reaper timers. Protocol and policy
//! failures are answered with JSON-RPC errors on the request path and
//! silently dropped on the notification path; nothing propagates out of
//! the runtime into the host.

pub mod message;
pub mod registry;
pub mod session;

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::IpcConfig;
use crate::token::constant_time_eq;
use crate::transport::{FrameSink, FrameSource};
use message::{
    Message, AUTH_REQUIRED, INVALID_PARAMS, INVALID_REQUEST, INVALID_TOKEN, METHOD_NOT_FOUND,
    PARSE_ERROR, RATE_LIMITED, SESSION_EXPIRED,
};
use registry::MethodRegistry;
use session::ClientSession;

/// Keepalive broadcast cadence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Reaper sweep cadence.
const REAPER_INTERVAL: Duration = Duration::from_secs(60);
/// Sessions idle longer than this are evicted by the reaper.
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Consecutive unparseable frames tolerated before the connection is cut.
const MAX_PARSE_ERRORS: u32 = 3;

const SERVER_INFO: &str = "Files IPC Server";

// ─── Dispatch seam ────────────────────────────────────────────────────────────

/// Failure returned by the request handler; the code is already a JSON-RPC
/// error code and the message is already safe to send.
#[derive(Debug, Error, PartialEq)]
#[error("{message}")]
pub struct DispatchError {
    pub code: i32,
    pub message: String,
}

impl DispatchError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Where validated requests go. Implemented by the coordinator; tests swap
/// in their own.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        session: &Arc<ClientSession>,
        method: &str,
        params: Value,
    ) -> Result<Value, DispatchError>;
}

// ─── SessionRuntime ───────────────────────────────────────────────────────────

pub struct SessionRuntime {
    config: Arc<IpcConfig>,
    registry: Arc<MethodRegistry>,
    handler: Arc<dyn RequestHandler>,
    sessions: RwLock<HashMap<String, Arc<ClientSession>>>,
    /// Plaintext token accepted for handshakes; present only while enabled.
    token: RwLock<Option<String>>,
    epoch: AtomicU64,
    /// Root cancellation; replaced on re-arm after a shutdown so the
    /// runtime can be started again within one process.
    cancel: Mutex<CancellationToken>,
}

impl SessionRuntime {
    pub fn new(
        config: Arc<IpcConfig>,
        registry: Arc<MethodRegistry>,
        handler: Arc<dyn RequestHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            handler,
            sessions: RwLock::new(HashMap::new()),
            token: RwLock::new(None),
            epoch: AtomicU64::new(0),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn config(&self) -> &Arc<IpcConfig> {
        &self.config
    }

    /// Clone of the current root cancellation token.
    pub fn root_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Install the credentials snapshot. Called on start and after every
    /// rotation; a fresh root token is installed if the previous one was
    /// cancelled by `shutdown`.
    pub fn arm(&self, token: String, epoch: u64) {
        *self.token.write() = Some(token);
        self.epoch.store(epoch, Ordering::Release);
        let mut cancel = self.cancel.lock();
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn session_snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().values().cloned().collect()
    }

    fn remove_session(&self, id: &str) {
        if self.sessions.write().remove(id).is_some() {
            debug!(session = %id, "session removed");
        }
    }

    // ── Session attachment ────────────────────────────────────────────────────

    /// Register a freshly accepted connection and spawn its receive and
    /// send loops.
    pub fn attach(
        self: &Arc<Self>,
        source: impl FrameSource + 'static,
        sink: impl FrameSink + 'static,
        transport: &'static str,
    ) -> String {
        let session = ClientSession::new(self.config.clone(), &self.root_token());
        let id = session.id.clone();
        info!(session = %id, transport, "session attached");
        self.sessions.write().insert(id.clone(), session.clone());

        let runtime = self.clone();
        let recv_session = session.clone();
        tokio::spawn(async move {
            recv_loop(runtime, recv_session, source).await;
        });

        let send_session = session;
        let idle = Duration::from_millis(self.config.send_loop_idle_ms.max(1));
        tokio::spawn(async move {
            send_loop(send_session, sink, idle).await;
        });

        id
    }

    // ── Broadcast ─────────────────────────────────────────────────────────────

    /// Fan a notification out to every authenticated session. Each delivery
    /// is charged against that session's bucket and enqueued lossily;
    /// dropped broadcasts are not retried.
    pub fn broadcast(&self, method: &str, params: Value) {
        let payload = Message::notification(method, params).to_json();
        for session in self.session_snapshot() {
            if !session.is_authenticated() || session.is_cancelled() {
                continue;
            }
            if !session.try_consume_token() {
                trace!(session = %session.id, method, "broadcast dropped by rate limit");
                continue;
            }
            if !session.enqueue_notification(payload.clone(), method) {
                trace!(session = %session.id, method, "broadcast dropped by queue cap");
            }
        }
    }

    // ── Timers ────────────────────────────────────────────────────────────────

    /// Arm the keepalive and reaper timers against the current root token.
    pub fn start_timers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let keepalive = {
            let runtime = self.clone();
            let cancel = self.root_token();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(KEEPALIVE_INTERVAL);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                tick.tick().await; // immediate first tick carries no ping
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tick.tick() => {
                            runtime.broadcast(
                                "ping",
                                serde_json::json!({ "timestamp": chrono::Utc::now().timestamp_millis() }),
                            );
                        }
                    }
                }
            })
        };

        let reaper = {
            let runtime = self.clone();
            let cancel = self.root_token();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(REAPER_INTERVAL);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tick.tick() => runtime.reap(),
                    }
                }
            })
        };

        vec![keepalive, reaper]
    }

    /// Evict sessions that are cancelled or idle beyond the timeout.
    pub fn reap(&self) {
        for session in self.session_snapshot() {
            if session.is_cancelled() || session.idle_for() > SESSION_IDLE_TIMEOUT {
                debug!(session = %session.id, "reaping session");
                session.close();
                self.remove_session(&session.id);
            }
        }
    }

    /// Cancel the root token and dispose of every session.
    pub fn shutdown(&self) {
        self.cancel.lock().cancel();
        let sessions: Vec<_> = {
            let mut map = self.sessions.write();
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.close();
        }
        *self.token.write() = None;
        info!("session runtime stopped");
    }

    // ── Receive path ──────────────────────────────────────────────────────────

    async fn handle_frame(
        &self,
        session: &Arc<ClientSession>,
        payload: &str,
        parse_errors: &mut u32,
    ) -> ControlFlow<()> {
        let msg = match Message::from_json(payload) {
            Ok(msg) => {
                *parse_errors = 0;
                msg
            }
            Err(e) => {
                *parse_errors += 1;
                trace!(session = %session.id, err = %e, "unparseable frame");
                session.enqueue_response(
                    Message::make_error(Value::Null, PARSE_ERROR, "Parse error").to_json(),
                    None,
                );
                if *parse_errors >= MAX_PARSE_ERRORS {
                    debug!(session = %session.id, "repeated parse errors — closing");
                    return ControlFlow::Break(());
                }
                return ControlFlow::Continue(());
            }
        };

        session.touch();

        if !msg.is_valid() {
            reply_error(session, &msg, INVALID_REQUEST, "Invalid Request");
            return ControlFlow::Continue(());
        }

        let Some(method) = msg.method.clone() else {
            // A well-formed response envelope; this server never issues
            // requests, so there is nothing to correlate it with.
            reply_error(session, &msg, METHOD_NOT_FOUND, "Method not found");
            return ControlFlow::Continue(());
        };

        if method == "handshake" {
            self.handle_handshake(session, &msg);
            return ControlFlow::Continue(());
        }

        let is_notification = msg.is_notification();
        let Some(def) = self.registry.get(&method) else {
            if !is_notification {
                reply_error(session, &msg, METHOD_NOT_FOUND, "Method not found");
            }
            return ControlFlow::Continue(());
        };

        if def.requires_auth && !session.is_authenticated() {
            reply_error(session, &msg, AUTH_REQUIRED, "Authentication required");
            return ControlFlow::Continue(());
        }

        if session.is_authenticated() && session.auth_epoch() != self.current_epoch() {
            // The token rotated under this session: one final error, then
            // the connection is torn down.
            reply_error(session, &msg, SESSION_EXPIRED, "Session expired");
            session.close();
            return ControlFlow::Break(());
        }

        if !session.try_consume_token() {
            reply_error(session, &msg, RATE_LIMITED, "Rate limit exceeded");
            return ControlFlow::Continue(());
        }

        if is_notification && !def.allow_notifications {
            trace!(session = %session.id, method, "notification dropped by policy");
            return ControlFlow::Continue(());
        }

        if let Some(cap) = def.max_payload_bytes {
            if payload.len() > cap {
                reply_error(session, &msg, INVALID_PARAMS, "Payload too large");
                return ControlFlow::Continue(());
            }
        }

        if let Some(authorize) = &def.authorize {
            if !authorize(session, &msg) {
                reply_error(session, &msg, INVALID_TOKEN, "Not authorized");
                return ControlFlow::Continue(());
            }
        }

        trace!(session = %session.id, method, "rpc dispatch");
        let params = msg.params.clone().unwrap_or(Value::Null);
        let result = self.handler.handle(session, &method, params).await;

        if !is_notification {
            match result {
                Ok(value) => session.enqueue_response(
                    Message::make_result(msg.reply_id(), value).to_json(),
                    Some(method),
                ),
                Err(e) => reply_error(session, &msg, e.code, &e.message),
            }
        }
        ControlFlow::Continue(())
    }

    /// Handshake sub-protocol. Consumes the message entirely: no rate
    /// limiting, no registry dispatch, and never a reply to a handshake
    /// notification. A repeated successful handshake is an idempotent
    /// success that re-captures the epoch.
    fn handle_handshake(&self, session: &Arc<ClientSession>, msg: &Message) {
        let token_param = msg
            .params
            .as_ref()
            .and_then(|p| p.get("token"))
            .and_then(Value::as_str);

        let Some(provided) = token_param else {
            reply_error(session, msg, INVALID_PARAMS, "Invalid params: token required");
            return;
        };

        let accepted = {
            let current = self.token.read();
            match current.as_deref() {
                Some(expected) => constant_time_eq(provided, expected),
                None => false,
            }
        };
        if !accepted {
            warn!(session = %session.id, "handshake with invalid token");
            reply_error(session, msg, INVALID_TOKEN, "Invalid token");
            return;
        }

        let epoch = self.current_epoch();
        session.set_authenticated(epoch);
        if let Some(info) = msg
            .params
            .as_ref()
            .and_then(|p| p.get("clientInfo"))
            .and_then(Value::as_str)
        {
            session.set_client_info(info);
        }
        debug!(session = %session.id, epoch, "session authenticated");

        if !msg.is_notification() {
            let result = serde_json::json!({
                "status": "authenticated",
                "epoch": epoch,
                "serverInfo": SERVER_INFO,
            });
            session.enqueue_response(
                Message::make_result(msg.reply_id(), result).to_json(),
                Some("handshake".to_string()),
            );
        }
    }
}

/// Send a JSON-RPC error reply — unless the triggering message was a
/// notification, which never gets a response of any kind.
fn reply_error(session: &ClientSession, msg: &Message, code: i32, text: &str) {
    if msg.is_notification() {
        return;
    }
    session.enqueue_response(
        Message::make_error(msg.reply_id(), code, text).to_json(),
        None,
    );
}

// ─── Per-session loops ────────────────────────────────────────────────────────

async fn recv_loop(
    runtime: Arc<SessionRuntime>,
    session: Arc<ClientSession>,
    mut source: impl FrameSource,
) {
    let mut parse_errors = 0u32;
    loop {
        tokio::select! {
            biased;

            _ = session.cancel_token().cancelled() => break,

            frame = source.next_frame() => match frame {
                Ok(Some(payload)) => {
                    if runtime
                        .handle_frame(&session, &payload, &mut parse_errors)
                        .await
                        .is_break()
                    {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(session = %session.id, "connection closed by peer");
                    break;
                }
                Err(e) => {
                    debug!(session = %session.id, err = %e, "transport failure — closing session");
                    break;
                }
            }
        }
    }
    // Cancel so the send loop drains what is queued and exits.
    session.close();
    runtime.remove_session(&session.id);
}

async fn send_loop(session: Arc<ClientSession>, mut sink: impl FrameSink, idle: Duration) {
    loop {
        if let Some(frame) = session.dequeue() {
            if let Err(e) = sink.send_frame(frame.payload).await {
                debug!(session = %session.id, err = %e, "write failure — cancelling session");
                session.close();
                break;
            }
            continue;
        }
        // Queue drained; only now is a cancelled session allowed to stop,
        // so the last replies (e.g. a session-expired error) hit the wire.
        if session.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = session.cancel_token().cancelled() => {}
            _ = session.send_ready().notified() => {}
            _ = tokio::time::sleep(idle) => {}
        }
    }
    session.clear_queues();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use tokio::sync::mpsc;

    struct ChannelSource {
        rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
            Ok(self.rx.recv().await)
        }
    }

    struct ChannelSink {
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn send_frame(&mut self, payload: String) -> Result<(), TransportError> {
            self.tx
                .send(payload)
                .map_err(|_| TransportError::InvalidFrame("sink closed"))
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(
            &self,
            _session: &Arc<ClientSession>,
            method: &str,
            params: Value,
        ) -> Result<Value, DispatchError> {
            Ok(serde_json::json!({ "method": method, "params": params }))
        }
    }

    struct Harness {
        runtime: Arc<SessionRuntime>,
        to_server: mpsc::UnboundedSender<String>,
        from_server: mpsc::UnboundedReceiver<String>,
    }

    fn attach(runtime: &Arc<SessionRuntime>) -> Harness {
        let (to_server, rx) = mpsc::unbounded_channel();
        let (tx, from_server) = mpsc::unbounded_channel();
        runtime.attach(ChannelSource { rx }, ChannelSink { tx }, "test");
        Harness {
            runtime: runtime.clone(),
            to_server,
            from_server,
        }
    }

    fn runtime_with(config: IpcConfig) -> Arc<SessionRuntime> {
        let runtime = SessionRuntime::new(
            Arc::new(config),
            Arc::new(MethodRegistry::with_builtin_methods()),
            Arc::new(EchoHandler),
        );
        runtime.arm("secret".to_string(), 1);
        runtime
    }

    impl Harness {
        fn send(&self, payload: &str) {
            self.to_server.send(payload.to_string()).unwrap();
        }

        async fn recv_json(&mut self) -> Value {
            let text = tokio::time::timeout(Duration::from_secs(2), self.from_server.recv())
                .await
                .expect("timed out waiting for reply")
                .expect("server closed");
            serde_json::from_str(&text).unwrap()
        }

        async fn handshake(&mut self) {
            self.send(r#"{"jsonrpc":"2.0","id":0,"method":"handshake","params":{"token":"secret"}}"#);
            let reply = self.recv_json().await;
            assert_eq!(reply["result"]["status"], "authenticated");
        }
    }

    #[tokio::test]
    async fn handshake_happy_path() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.send(r#"{"jsonrpc":"2.0","id":1,"method":"handshake","params":{"token":"secret"}}"#);
        let reply = h.recv_json().await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["status"], "authenticated");
        assert_eq!(reply["result"]["epoch"], 1);
        assert_eq!(reply["result"]["serverInfo"], "Files IPC Server");
    }

    #[tokio::test]
    async fn handshake_wrong_token() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.send(r#"{"jsonrpc":"2.0","id":"x","method":"handshake","params":{"token":"wrong"}}"#);
        let reply = h.recv_json().await;
        assert_eq!(reply["id"], "x");
        assert_eq!(reply["error"]["code"], INVALID_TOKEN);
        assert_eq!(reply["error"]["message"], "Invalid token");
    }

    #[tokio::test]
    async fn handshake_missing_token_is_invalid_params() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.send(r#"{"jsonrpc":"2.0","id":2,"method":"handshake","params":{}}"#);
        let reply = h.recv_json().await;
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn repeated_handshake_is_idempotent() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.handshake().await;
        h.send(r#"{"jsonrpc":"2.0","id":9,"method":"handshake","params":{"token":"secret"}}"#);
        let reply = h.recv_json().await;
        assert_eq!(reply["result"]["status"], "authenticated");
    }

    #[tokio::test]
    async fn unauthenticated_request_is_rejected() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.send(r#"{"jsonrpc":"2.0","id":1,"method":"getState"}"#);
        let reply = h.recv_json().await;
        assert_eq!(reply["error"]["code"], AUTH_REQUIRED);
        assert_eq!(reply["error"]["message"], "Authentication required");
    }

    #[tokio::test]
    async fn unauthenticated_notification_is_silent() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.send(r#"{"jsonrpc":"2.0","method":"getState"}"#);
        // Follow with a request; the first reply must belong to it.
        h.send(r#"{"jsonrpc":"2.0","id":5,"method":"handshake","params":{"token":"secret"}}"#);
        let reply = h.recv_json().await;
        assert_eq!(reply["id"], 5);
    }

    #[tokio::test]
    async fn unknown_method_not_found() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.handshake().await;
        h.send(r#"{"jsonrpc":"2.0","id":1,"method":"no.such.method"}"#);
        let reply = h.recv_json().await;
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_envelope_rejected() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.send(r#"{"jsonrpc":"1.0","id":1,"method":"getState"}"#);
        let reply = h.recv_json().await;
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn parse_error_reply() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.send("this is not json");
        let reply = h.recv_json().await;
        assert_eq!(reply["error"]["code"], PARSE_ERROR);
        assert_eq!(reply["id"], Value::Null);
    }

    #[tokio::test]
    async fn rate_limit_kicks_in() {
        let config = IpcConfig {
            rate_limit_burst: 3,
            rate_limit_per_second: 1,
            ..IpcConfig::default()
        };
        let runtime = runtime_with(config);
        let mut h = attach(&runtime);
        h.handshake().await;
        for i in 0..5 {
            h.send(&format!(r#"{{"jsonrpc":"2.0","id":{i},"method":"getState"}}"#));
        }
        let mut limited = 0;
        let mut succeeded = 0;
        for _ in 0..5 {
            let reply = h.recv_json().await;
            if reply["error"]["code"] == RATE_LIMITED {
                assert_eq!(reply["error"]["message"], "Rate limit exceeded");
                limited += 1;
            } else {
                succeeded += 1;
            }
        }
        assert!(limited >= 2, "expected rate limiting, got {limited}");
        assert!(succeeded <= 3);
    }

    #[tokio::test]
    async fn epoch_mismatch_expires_session() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.handshake().await;
        // Rotation happens: runtime re-arms with a newer epoch.
        h.runtime.arm("secret2".to_string(), 2);
        h.send(r#"{"jsonrpc":"2.0","id":7,"method":"getState"}"#);
        let reply = h.recv_json().await;
        assert_eq!(reply["error"]["code"], SESSION_EXPIRED);
        assert_eq!(reply["id"], 7);
        // The session is gone from the registry shortly after.
        tokio::time::timeout(Duration::from_secs(2), async {
            while h.runtime.session_count() != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session was not removed");
    }

    #[tokio::test]
    async fn payload_cap_enforced() {
        let runtime = runtime_with(IpcConfig::default());
        let mut h = attach(&runtime);
        h.handshake().await;
        let big = "y".repeat(2 * 1024 * 1024);
        h.send(&format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"getMetadata","params":{{"paths":["{big}"]}}}}"#
        ));
        let reply = h.recv_json().await;
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);
        assert_eq!(reply["error"]["message"], "Payload too large");
    }

    #[tokio::test]
    async fn broadcast_reaches_only_authenticated_sessions() {
        let runtime = runtime_with(IpcConfig::default());
        let mut authed = attach(&runtime);
        let mut bystander = attach(&runtime);
        authed.handshake().await;

        runtime.broadcast("selectionChanged", serde_json::json!({ "items": [] }));
        let note = authed.recv_json().await;
        assert_eq!(note["method"], "selectionChanged");
        assert!(note.get("id").is_none());

        // The unauthenticated session sees nothing; prove it by checking
        // that its first frame is the reply to a later handshake.
        bystander
            .send(r#"{"jsonrpc":"2.0","id":3,"method":"handshake","params":{"token":"secret"}}"#);
        let first = bystander.recv_json().await;
        assert_eq!(first["id"], 3);
    }

    #[tokio::test]
    async fn shutdown_disposes_sessions() {
        let runtime = runtime_with(IpcConfig::default());
        let h = attach(&runtime);
        assert_eq!(runtime.session_count(), 1);
        runtime.shutdown();
        assert_eq!(runtime.session_count(), 0);
        drop(h);
    }
}
