//! Downstream Session (spec.md §4.4): per-client state backing a single
//! WebSocket connection — a bounded outbound queue, activity tracking for
//! stale eviction, and idempotent teardown bookkeeping.
//!
//! Grounded on the teacher's `ConnectionTracker` for the atomic-counter
//! style and on `reifydb`'s subscription registry for non-blocking
//! `try_send` fan-out semantics (ignore a full queue, count it, move on).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::OutboundMessage;
use crate::metrics;
use crate::time::now_ms;

/// A downstream client's identity and queue. Cheap to clone (it's an
/// `Arc` wrapper in practice) and safe to hold from the read task, the
/// write task, the broadcast engine, and the stale-session sweeper at the
/// same time.
pub struct DownstreamSession {
    id: String,
    outbound_tx: mpsc::Sender<Arc<str>>,
    last_activity_ms: AtomicI64,
    drop_count: AtomicU64,
    window_start_ms: AtomicI64,
    window_drops: AtomicU64,
    torn_down: AtomicBool,
    /// Cancelled by `begin_teardown`. The WebSocket handler races this
    /// alongside its read/write/heartbeat tasks so a sweeper-initiated
    /// eviction (stale or slow-consumer) actually closes the transport
    /// instead of only unrouting the session (spec.md §4.4).
    close: CancellationToken,
}

impl DownstreamSession {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            outbound_tx: tx,
            last_activity_ms: AtomicI64::new(now_ms()),
            drop_count: AtomicU64::new(0),
            window_start_ms: AtomicI64::new(now_ms()),
            window_drops: AtomicU64::new(0),
            torn_down: AtomicBool::new(false),
            close: CancellationToken::new(),
        });
        (session, rx)
    }

    /// Resolves once the session has been asked to tear down, from whatever
    /// triggered it: a read/write error or the stale-session sweeper.
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Non-blocking enqueue, the load-bearing backpressure primitive of
    /// spec.md §5: a full queue means a slow consumer, and the right
    /// response is to drop the message for that one client, not to block
    /// every other client waiting on this one. Takes pre-serialized JSON so
    /// a broadcast fan-out to N recipients serializes the event exactly
    /// once, not N times.
    pub fn try_send_raw(&self, json: Arc<str>) -> bool {
        match self.outbound_tx.try_send(json) {
            Ok(()) => true,
            Err(_) => {
                self.drop_count.fetch_add(1, Ordering::Relaxed);
                self.window_drops.fetch_add(1, Ordering::Relaxed);
                metrics::record_downstream_drop();
                false
            }
        }
    }

    /// Convenience for the single-recipient control messages (subscribed,
    /// unsubscribed, pong, error) where there is nothing to amortize.
    pub fn try_send(&self, msg: OutboundMessage) -> bool {
        self.try_send_raw(Arc::from(msg.to_json()))
    }

    pub fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn is_stale(&self, threshold_ms: i64) -> bool {
        now_ms() - self.last_activity_ms.load(Ordering::Relaxed) > threshold_ms
    }

    pub fn drop_count(&self) -> u64 {
        self.drop_count.load(Ordering::Relaxed)
    }

    /// Evaluates the current slow-consumer window against `threshold` and
    /// rolls the window over once `window_ms` has elapsed. Intended to be
    /// polled by the stale-session sweeper at a cadence independent of
    /// `window_ms` — the window boundary is approximate (rounded up to the
    /// next sweep tick), which is acceptable for a diagnostic eviction
    /// threshold.
    pub fn check_slow_consumer_window(&self, threshold: u64, window_ms: i64) -> bool {
        let now = now_ms();
        let start = self.window_start_ms.load(Ordering::Relaxed);
        if now - start > window_ms {
            self.window_start_ms.store(now, Ordering::Relaxed);
            self.window_drops.store(0, Ordering::Relaxed);
            return false;
        }
        self.window_drops.load(Ordering::Relaxed) >= threshold
    }

    /// Mark the session as torn down. Returns `true` the first time it is
    /// called for this session, `false` on every subsequent call — callers
    /// use this to make cleanup (registry removal, upstream release)
    /// idempotent no matter which of the read task, write task, or sweeper
    /// notices the disconnect first.
    pub fn begin_teardown(&self) -> bool {
        let first = !self.torn_down.swap(true, Ordering::SeqCst);
        self.close.cancel();
        first
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}
