//! Broadcast Engine (spec.md §4.5): the single path every upstream event
//! travels from ingress to downstream fan-out.
//!
//! Grounded on the teacher's `upstream_reader_task` for the
//! spawn-a-background-task-with-a-bounded-channel shape, and on the
//! `reifydb` subscription registry's `broadcast()` for non-blocking
//! `try_send` fan-out. Ingress is partitioned by a hash of the event's
//! symbol across `worker_count` independent bounded queues: a given symbol
//! always lands on the same worker, so per-symbol ordering (spec.md §4.5's
//! invariant) holds even when `worker_count > 1`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::downstream::session::DownstreamSession;
use crate::event::{Event, OutboundMessage, SharedEvent};
use crate::metrics;
use crate::registry::{Channel, SubscriptionRegistry};
use crate::sinks::{CacheSink, DurableSink};

/// Handle the Upstream Session dispatches parsed events into. Cloning is
/// cheap; every clone shares the same set of partition queues.
#[derive(Clone)]
pub struct BroadcastIngress {
    partitions: Arc<Vec<mpsc::Sender<SharedEvent>>>,
}

impl BroadcastIngress {
    /// Non-blocking enqueue. A full partition queue means the broadcast
    /// engine cannot keep up; the event is dropped and counted rather than
    /// the upstream reader blocking (which would eventually back up the
    /// upstream TCP connection itself).
    pub fn dispatch(&self, event: Event) -> bool {
        let idx = partition_for(&event.symbol, self.partitions.len());
        match self.partitions[idx].try_send(Arc::new(event)) {
            Ok(()) => true,
            Err(_) => {
                metrics::record_broadcast_ingress_drop();
                false
            }
        }
    }
}

fn partition_for(symbol: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    (hasher.finish() as usize) % partitions.max(1)
}

pub type SessionMap = DashMap<String, Arc<DownstreamSession>>;

struct Worker {
    subscriptions: Arc<SubscriptionRegistry>,
    sessions: Arc<SessionMap>,
    cache_sink: Arc<dyn CacheSink>,
    durable_sink: Arc<dyn DurableSink>,
}

/// Spawn `worker_count` broadcast workers and return the ingress handle
/// that feeds them.
pub fn spawn(
    worker_count: usize,
    queue_capacity: usize,
    subscriptions: Arc<SubscriptionRegistry>,
    sessions: Arc<SessionMap>,
    cache_sink: Arc<dyn CacheSink>,
    durable_sink: Arc<dyn DurableSink>,
    shutdown: CancellationToken,
) -> BroadcastIngress {
    let worker_count = worker_count.max(1);
    let mut partitions = Vec::with_capacity(worker_count);

    for _ in 0..worker_count {
        let (tx, rx) = mpsc::channel(queue_capacity);
        partitions.push(tx);

        let worker = Worker {
            subscriptions: subscriptions.clone(),
            sessions: sessions.clone(),
            cache_sink: cache_sink.clone(),
            durable_sink: durable_sink.clone(),
        };
        let shutdown = shutdown.clone();
        tokio::spawn(run_worker(worker, rx, shutdown));
    }

    BroadcastIngress {
        partitions: Arc::new(partitions),
    }
}

async fn run_worker(
    worker: Worker,
    mut rx: mpsc::Receiver<SharedEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => worker.handle(event).await,
                    None => return,
                }
            }
            _ = shutdown.cancelled() => return,
        }
    }
}

impl Worker {
    async fn handle(&self, event: SharedEvent) {
        // Side-channel writes happen regardless of whether any downstream
        // session is subscribed, but on their own tasks: a slow cache or
        // durable sink must never add latency to the fan-out path below
        // (spec.md §4.5/§9).
        let cache_sink = self.cache_sink.clone();
        let cache_event = event.clone();
        tokio::spawn(async move { cache_sink.write(&cache_event).await });
        let durable_sink = self.durable_sink.clone();
        let durable_event = event.clone();
        tokio::spawn(async move { durable_sink.write(&durable_event).await });

        let channel = match event.channel() {
            "trades" => Channel::Trades,
            "quotes" => Channel::Quotes,
            "aggregates" => Channel::Aggregates,
            other => {
                debug!(channel = other, "event with unroutable channel name, dropping");
                return;
            }
        };

        let recipients = self.subscriptions.lookup(channel, &event.symbol);
        if recipients.is_empty() {
            return;
        }

        // Serialize once; every recipient's try_send shares the same
        // reference-counted JSON string.
        let outbound = OutboundMessage::market_data(channel.as_str(), &event);
        let json: Arc<str> = Arc::from(outbound.to_json());

        for session_id in &recipients {
            if let Some(session) = self.sessions.get(session_id) {
                session.try_send_raw(json.clone());
            }
        }
    }
}
