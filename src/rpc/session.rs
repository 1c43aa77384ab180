//! Per-connection state: authentication, rate limiting, and the
//! dual-priority send queue.
//!
//! A session is created when a transport accepts a connection and lives
//! until the transport closes, the reaper judges it stale, or the server
//! shuts down. Responses and notifications compete for one byte budget;
//! responses always win — notifications are evicted or coalesced first and
//! a response is enqueued even when the budget is already blown.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::IpcConfig;

// ─── Rate limiting ────────────────────────────────────────────────────────────

/// Token bucket: capacity `burst`, refilled at `per_second` tokens/second.
#[derive(Debug)]
pub struct RateBucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateBucket {
    pub fn new(burst: u32) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    /// Add `⌊elapsed · per_second⌋` tokens, capped at `burst`. The refill
    /// instant only advances when tokens were actually added, so fractional
    /// progress across calls is not lost.
    fn refill_at(&mut self, now: Instant, per_second: u32, burst: u32) {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_millis() as u64;
        let added = elapsed_ms * u64::from(per_second) / 1000;
        if added > 0 {
            self.tokens = u32::try_from(u64::from(self.tokens) + added)
                .unwrap_or(u32::MAX)
                .min(burst);
            self.last_refill = now;
        }
    }

    /// Refill, then consume one token if available.
    pub fn try_consume_at(&mut self, now: Instant, per_second: u32, burst: u32) -> bool {
        self.refill_at(now, per_second, burst);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }
}

// ─── Send queue ───────────────────────────────────────────────────────────────

/// A serialized envelope waiting for the send loop.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    pub payload: String,
    pub method: Option<String>,
}

impl OutboundFrame {
    fn byte_len(&self) -> usize {
        self.payload.len()
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    responses: VecDeque<OutboundFrame>,
    notifications: VecDeque<OutboundFrame>,
    /// Queued-notification count per method, kept exact for coalescing.
    per_method: HashMap<String, usize>,
}

impl QueueInner {
    fn decrement_method(&mut self, method: &str) {
        if let Some(count) = self.per_method.get_mut(method) {
            *count -= 1;
            if *count == 0 {
                self.per_method.remove(method);
            }
        }
    }
}

// ─── ClientSession ────────────────────────────────────────────────────────────

pub struct ClientSession {
    pub id: String,
    config: Arc<IpcConfig>,
    authenticated: AtomicBool,
    auth_epoch: AtomicU64,
    last_seen: Mutex<Instant>,
    client_info: Mutex<Option<String>>,
    cancel: CancellationToken,
    bucket: Mutex<RateBucket>,
    queues: Mutex<QueueInner>,
    /// Sum of UTF-8 byte lengths across both queues; updated under the
    /// queue lock, readable without it.
    queued_bytes: AtomicUsize,
    send_ready: Notify,
}

impl ClientSession {
    pub fn new(config: Arc<IpcConfig>, parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            authenticated: AtomicBool::new(false),
            auth_epoch: AtomicU64::new(0),
            last_seen: Mutex::new(Instant::now()),
            client_info: Mutex::new(None),
            cancel: parent.child_token(),
            bucket: Mutex::new(RateBucket::new(config.rate_limit_burst)),
            queues: Mutex::new(QueueInner::default()),
            queued_bytes: AtomicUsize::new(0),
            send_ready: Notify::new(),
            config,
        })
    }

    // ── Auth state ────────────────────────────────────────────────────────────

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Latch the authenticated flag and capture the epoch. The flag only
    /// ever transitions false→true; repeating a successful handshake just
    /// refreshes the captured epoch.
    pub fn set_authenticated(&self, epoch: u64) {
        self.auth_epoch.store(epoch, Ordering::Release);
        self.authenticated.store(true, Ordering::Release);
    }

    pub fn auth_epoch(&self) -> u64 {
        self.auth_epoch.load(Ordering::Acquire)
    }

    pub fn set_client_info(&self, info: &str) {
        *self.client_info.lock() = Some(info.to_string());
    }

    pub fn client_info(&self) -> Option<String> {
        self.client_info.lock().clone()
    }

    // ── Liveness ──────────────────────────────────────────────────────────────

    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the session and wake the send loop so it can drain and exit.
    pub fn close(&self) {
        self.cancel.cancel();
        self.send_ready.notify_waiters();
        self.send_ready.notify_one();
    }

    // ── Rate limiting ─────────────────────────────────────────────────────────

    /// Charge one token against this session's bucket.
    pub fn try_consume_token(&self) -> bool {
        self.bucket.lock().try_consume_at(
            Instant::now(),
            self.config.rate_limit_per_second,
            self.config.rate_limit_burst,
        )
    }

    // ── Queues ────────────────────────────────────────────────────────────────

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes.load(Ordering::Relaxed)
    }

    pub fn send_ready(&self) -> &Notify {
        &self.send_ready
    }

    fn fits(&self, extra: usize) -> bool {
        self.queued_bytes.load(Ordering::Relaxed) + extra
            <= self.config.per_session_queue_cap_bytes
    }

    /// Enqueue a response. Responses are never dropped: queued notifications
    /// are evicted oldest-first to make room, and if that is not enough the
    /// response goes in over the cap anyway.
    pub fn enqueue_response(&self, payload: String, method: Option<String>) {
        let frame = OutboundFrame { payload, method };
        let n = frame.byte_len();
        {
            let mut q = self.queues.lock();
            while !self.fits(n) {
                let Some(old) = q.notifications.pop_front() else {
                    break;
                };
                if let Some(m) = old.method.clone() {
                    q.decrement_method(&m);
                }
                self.queued_bytes
                    .fetch_sub(old.byte_len(), Ordering::Relaxed);
            }
            q.responses.push_back(frame);
            self.queued_bytes.fetch_add(n, Ordering::Relaxed);
        }
        self.send_ready.notify_one();
    }

    /// Enqueue a notification, coalescing under pressure.
    ///
    /// Under a saturated queue, per-method ordering degrades to
    /// at-most-latest-wins: the oldest queued notification of the same
    /// method is discarded before the new one is considered. Returns false
    /// when the new notification had to be dropped.
    pub fn enqueue_notification(&self, payload: String, method: &str) -> bool {
        let frame = OutboundFrame {
            payload,
            method: Some(method.to_string()),
        };
        let n = frame.byte_len();
        let enqueued = {
            let mut q = self.queues.lock();

            if !self.fits(n) {
                // Coalesce: drop the oldest queued notification of this method.
                let same_method = q
                    .notifications
                    .iter()
                    .position(|f| f.method.as_deref() == Some(method));
                if let Some(old) = same_method.and_then(|pos| q.notifications.remove(pos)) {
                    q.decrement_method(method);
                    self.queued_bytes
                        .fetch_sub(old.byte_len(), Ordering::Relaxed);
                }
            }
            if !self.fits(n) {
                // Evict one oldest notification of any method.
                if let Some(old) = q.notifications.pop_front() {
                    if let Some(m) = old.method.clone() {
                        q.decrement_method(&m);
                    }
                    self.queued_bytes
                        .fetch_sub(old.byte_len(), Ordering::Relaxed);
                }
            }
            if self.fits(n) {
                *q.per_method.entry(method.to_string()).or_insert(0) += 1;
                q.notifications.push_back(frame);
                self.queued_bytes.fetch_add(n, Ordering::Relaxed);
                true
            } else {
                false
            }
        };
        if enqueued {
            self.send_ready.notify_one();
        }
        enqueued
    }

    /// Next frame for the wire: responses strictly before notifications.
    pub fn dequeue(&self) -> Option<OutboundFrame> {
        let mut q = self.queues.lock();
        let frame = if let Some(f) = q.responses.pop_front() {
            f
        } else if let Some(f) = q.notifications.pop_front() {
            if let Some(m) = f.method.clone() {
                q.decrement_method(&m);
            }
            f
        } else {
            return None;
        };
        self.queued_bytes
            .fetch_sub(frame.byte_len(), Ordering::Relaxed);
        Some(frame)
    }

    /// Drop everything still queued. Called once the send loop has exited.
    pub fn clear_queues(&self) {
        let mut q = self.queues.lock();
        q.responses.clear();
        q.notifications.clear();
        q.per_method.clear();
        self.queued_bytes.store(0, Ordering::Relaxed);
    }

    /// Queued-notification count for one method (coalescing bookkeeping).
    pub fn per_method_count(&self, method: &str) -> usize {
        self.queues.lock().per_method.get(method).copied().unwrap_or(0)
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("authenticated", &self.is_authenticated())
            .field("auth_epoch", &self.auth_epoch())
            .field("queued_bytes", &self.queued_bytes())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(cap: usize) -> Arc<ClientSession> {
        let config = Arc::new(IpcConfig {
            per_session_queue_cap_bytes: cap,
            ..IpcConfig::default()
        });
        ClientSession::new(config, &CancellationToken::new())
    }

    fn payload(len: usize) -> String {
        "x".repeat(len)
    }

    // ── Rate bucket ───────────────────────────────────────────────────────────

    #[test]
    fn bucket_starts_full_and_drains() {
        let mut bucket = RateBucket::new(3);
        let now = Instant::now();
        assert!(bucket.try_consume_at(now, 10, 3));
        assert!(bucket.try_consume_at(now, 10, 3));
        assert!(bucket.try_consume_at(now, 10, 3));
        assert!(!bucket.try_consume_at(now, 10, 3));
    }

    #[test]
    fn bucket_refills_at_configured_rate() {
        let mut bucket = RateBucket::new(5);
        let start = Instant::now();
        for _ in 0..5 {
            assert!(bucket.try_consume_at(start, 10, 5));
        }
        assert!(!bucket.try_consume_at(start, 10, 5));
        // 250 ms at 10/s → 2 tokens.
        let later = start + Duration::from_millis(250);
        assert!(bucket.try_consume_at(later, 10, 5));
        assert!(bucket.try_consume_at(later, 10, 5));
        assert!(!bucket.try_consume_at(later, 10, 5));
    }

    #[test]
    fn bucket_never_exceeds_burst() {
        let mut bucket = RateBucket::new(4);
        let start = Instant::now();
        bucket.refill_at(start + Duration::from_secs(3600), 20, 4);
        assert_eq!(bucket.tokens(), 4);
    }

    #[test]
    fn refill_instant_only_advances_when_tokens_added() {
        let mut bucket = RateBucket::new(10);
        let start = Instant::now();
        for _ in 0..10 {
            assert!(bucket.try_consume_at(start, 2, 10));
        }
        // 400 ms at 2/s adds nothing; the instant must not advance, so two
        // consecutive 400 ms waits still add up to one token.
        assert!(!bucket.try_consume_at(start + Duration::from_millis(400), 2, 10));
        assert!(bucket.try_consume_at(start + Duration::from_millis(800), 2, 10));
    }

    // ── Queue accounting ──────────────────────────────────────────────────────

    #[test]
    fn queued_bytes_tracks_both_queues() {
        let s = session_with(1024);
        s.enqueue_response(payload(10), None);
        s.enqueue_notification(payload(20), "selectionChanged");
        assert_eq!(s.queued_bytes(), 30);
        s.dequeue().unwrap();
        assert_eq!(s.queued_bytes(), 20);
        s.dequeue().unwrap();
        assert_eq!(s.queued_bytes(), 0);
        assert!(s.dequeue().is_none());
    }

    #[test]
    fn per_method_count_matches_queued_notifications() {
        let s = session_with(1024);
        assert!(s.enqueue_notification(payload(5), "ping"));
        assert!(s.enqueue_notification(payload(5), "ping"));
        assert!(s.enqueue_notification(payload(5), "selectionChanged"));
        assert_eq!(s.per_method_count("ping"), 2);
        assert_eq!(s.per_method_count("selectionChanged"), 1);
        s.dequeue().unwrap();
        assert_eq!(s.per_method_count("ping"), 1);
        s.clear_queues();
        assert_eq!(s.per_method_count("ping"), 0);
        assert_eq!(s.queued_bytes(), 0);
    }

    // ── Priority ──────────────────────────────────────────────────────────────

    #[test]
    fn responses_dequeue_before_earlier_notifications() {
        let s = session_with(1024);
        assert!(s.enqueue_notification("n1".into(), "ping"));
        s.enqueue_response("r1".into(), None);
        assert!(s.enqueue_notification("n2".into(), "ping"));
        s.enqueue_response("r2".into(), None);

        let order: Vec<String> = std::iter::from_fn(|| s.dequeue().map(|f| f.payload)).collect();
        assert_eq!(order, ["r1", "r2", "n1", "n2"]);
    }

    // ── Backpressure ──────────────────────────────────────────────────────────

    #[test]
    fn response_evicts_notifications_when_over_cap() {
        let s = session_with(100);
        assert!(s.enqueue_notification(payload(60), "a"));
        assert!(s.enqueue_notification(payload(30), "b"));
        s.enqueue_response(payload(50), None);
        // The oldest notification was evicted to fit the response.
        assert_eq!(s.per_method_count("a"), 0);
        assert_eq!(s.per_method_count("b"), 1);
        assert_eq!(s.queued_bytes(), 80);
        assert_eq!(s.dequeue().unwrap().payload.len(), 50);
    }

    #[test]
    fn response_enqueued_even_when_nothing_can_be_evicted() {
        let s = session_with(100);
        s.enqueue_response(payload(80), None);
        s.enqueue_response(payload(80), None);
        // Over cap with no notifications to evict — both responses kept.
        assert_eq!(s.queued_bytes(), 160);
        assert!(s.dequeue().is_some());
        assert!(s.dequeue().is_some());
    }

    #[test]
    fn notification_coalesces_same_method_when_saturated() {
        let s = session_with(100);
        assert!(s.enqueue_notification(payload(60), "selectionChanged"));
        assert!(s.enqueue_notification(payload(30), "navigationStateChanged"));
        // Saturated: same-method entry gets replaced by the newer one.
        assert!(s.enqueue_notification(payload(60), "selectionChanged"));
        assert_eq!(s.per_method_count("selectionChanged"), 1);
        assert_eq!(s.per_method_count("navigationStateChanged"), 1);
        assert_eq!(s.queued_bytes(), 90);
        // The surviving selectionChanged is the newer frame, behind the
        // untouched navigationStateChanged.
        let first = s.dequeue().unwrap();
        assert_eq!(first.method.as_deref(), Some("navigationStateChanged"));
    }

    #[test]
    fn notification_evicts_oldest_other_method_when_coalescing_fails() {
        let s = session_with(100);
        assert!(s.enqueue_notification(payload(90), "a"));
        // No queued "b" to coalesce with; the oldest ("a") is evicted.
        assert!(s.enqueue_notification(payload(50), "b"));
        assert_eq!(s.per_method_count("a"), 0);
        assert_eq!(s.per_method_count("b"), 1);
    }

    #[test]
    fn notification_dropped_when_nothing_frees_enough() {
        let s = session_with(100);
        s.enqueue_response(payload(95), None);
        // Queue is full of response bytes; nothing can be evicted.
        assert!(!s.enqueue_notification(payload(50), "ping"));
        assert_eq!(s.per_method_count("ping"), 0);
        assert_eq!(s.queued_bytes(), 95);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[test]
    fn close_cancels_and_clearing_resets_counter() {
        let s = session_with(1024);
        s.enqueue_response(payload(10), None);
        s.close();
        assert!(s.is_cancelled());
        s.clear_queues();
        assert_eq!(s.queued_bytes(), 0);
    }

    #[test]
    fn auth_flag_latches() {
        let s = session_with(1024);
        assert!(!s.is_authenticated());
        s.set_authenticated(3);
        assert!(s.is_authenticated());
        assert_eq!(s.auth_epoch(), 3);
        // Re-auth refreshes the epoch but the flag stays set.
        s.set_authenticated(4);
        assert!(s.is_authenticated());
        assert_eq!(s.auth_epoch(), 4);
    }
}
