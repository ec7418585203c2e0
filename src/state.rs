//! Composite application state shared across every axum handler.
//!
//! Grounded on the teacher's `AppState{db_pool, sse_state, actor_registry,
//! notification_service}` deriving `Clone` for `axum::extract::State`: one
//! struct of `Arc`-wrapped shared resources, cloned cheaply per request.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::broadcast::SessionMap;
use crate::config::Config;
use crate::registry::{SubscriptionRegistry, SymbolRefRegistry};
use crate::sinks::{CacheSink, DurableSink};
use crate::upstream::UpstreamHandle;

#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub symbols: Arc<SymbolRefRegistry>,
    pub sessions: Arc<SessionMap>,
    pub upstream: UpstreamHandle,
    pub cache_sink: Arc<dyn CacheSink>,
    pub durable_sink: Arc<dyn DurableSink>,
    pub started_at: Instant,
    /// Cancelled on process shutdown. Every downstream WebSocket handler
    /// races this alongside its own tasks so shutdown actively closes each
    /// session's transport instead of waiting indefinitely for clients to
    /// disconnect on their own (spec.md §5's shutdown ordering).
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
