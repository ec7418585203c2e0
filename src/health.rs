//! `/health` and `/stats` (spec.md §6): process liveness plus a cheap
//! operational snapshot, both backed by `GatewayState` rather than a
//! database or actor registry.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::GatewayState;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    clients: usize,
    uptime_seconds: u64,
    upstream_ready: bool,
    timestamp: u64,
}

pub async fn health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let upstream_ready = state.upstream.is_ready();
    Json(HealthResponse {
        status: if upstream_ready { "healthy" } else { "degraded" },
        clients: state.sessions.len(),
        uptime_seconds: state.uptime_secs(),
        upstream_ready,
        timestamp: now_unix(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    clients: usize,
    channels: usize,
    uptime_seconds: u64,
    upstream_ready: bool,
    timestamp: u64,
}

pub async fn stats(State(state): State<GatewayState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        clients: state.sessions.len(),
        channels: state.subscriptions.channel_count(),
        uptime_seconds: state.uptime_secs(),
        upstream_ready: state.upstream.is_ready(),
        timestamp: now_unix(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::SessionMap;
    use crate::config::Config;
    use crate::registry::{SubscriptionRegistry, SymbolRefRegistry};
    use crate::sinks::{NullCacheSink, NullDurableSink};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn test_state() -> GatewayState {
        let config = Arc::new(Config::default());
        let ingress = crate::broadcast::spawn(
            1,
            16,
            Arc::new(SubscriptionRegistry::default()),
            Arc::new(SessionMap::default()),
            Arc::new(NullCacheSink),
            Arc::new(NullDurableSink),
            CancellationToken::new(),
        );
        GatewayState {
            upstream: crate::upstream::spawn(
                config.clone(),
                Arc::new(SymbolRefRegistry::default()),
                ingress,
                CancellationToken::new(),
            ),
            config,
            subscriptions: Arc::new(SubscriptionRegistry::default()),
            symbols: Arc::new(SymbolRefRegistry::default()),
            sessions: Arc::new(SessionMap::default()),
            cache_sink: Arc::new(NullCacheSink),
            durable_sink: Arc::new(NullDurableSink),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn health_reports_zero_clients_when_empty() {
        let state = test_state();
        let Json(resp) = health(State(state)).await;
        assert_eq!(resp.clients, 0);
    }

    #[tokio::test]
    async fn stats_reports_zero_channels_when_empty() {
        let state = test_state();
        let Json(resp) = stats(State(state)).await;
        assert_eq!(resp.channels, 0);
    }
}
