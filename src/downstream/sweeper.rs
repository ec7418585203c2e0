//! Background stale-session sweeper (spec.md §4.4): evicts downstream
//! sessions that have gone quiet for longer than the configured threshold
//! — a client that stopped reading pongs or vanished without a clean close.
//!
//! Grounded on the teacher's periodic `tokio::time::interval` background
//! workers in `main.rs` (idempotency cleanup, rate limiter cleanup).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::downstream::websocket::teardown_session;
use crate::metrics;
use crate::state::GatewayState;

pub fn spawn(state: GatewayState, shutdown: CancellationToken) {
    tokio::spawn(run(state, shutdown));
}

async fn run(state: GatewayState, shutdown: CancellationToken) {
    let stale_threshold_ms = state.config.stale_threshold.as_millis() as i64;
    let slow_consumer_threshold = state.config.slow_consumer_drop_threshold;
    let slow_consumer_window_ms = state.config.slow_consumer_window.as_millis() as i64;
    let mut interval = tokio::time::interval(state.config.stale_sweep_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep_once(&state, stale_threshold_ms, slow_consumer_threshold, slow_consumer_window_ms);
            }
            _ = shutdown.cancelled() => return,
        }
    }
}

fn sweep_once(
    state: &GatewayState,
    stale_threshold_ms: i64,
    slow_consumer_threshold: u64,
    slow_consumer_window_ms: i64,
) {
    let mut stale_count = 0;
    let mut slow_consumer_count = 0;

    let evictions: Vec<_> = state
        .sessions
        .iter()
        .filter_map(|entry| {
            let session = entry.value().clone();
            if session.is_stale(stale_threshold_ms) {
                stale_count += 1;
                Some(session)
            } else if session.check_slow_consumer_window(slow_consumer_threshold, slow_consumer_window_ms) {
                slow_consumer_count += 1;
                Some(session)
            } else {
                None
            }
        })
        .collect();

    for session in &evictions {
        teardown_session(state, session);
    }
    for _ in 0..slow_consumer_count {
        metrics::record_session_closed_slow_consumer();
    }

    if stale_count > 0 || slow_consumer_count > 0 {
        info!(stale_count, slow_consumer_count, "swept downstream sessions");
    }
}
