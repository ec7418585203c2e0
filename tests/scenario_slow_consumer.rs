//! Scenario 3 (slow consumer isolation): one session with a stalled write
//! side (its receiver is never drained) must not delay or block delivery to
//! a healthy session subscribed to the same symbol.

use std::sync::Arc;
use std::time::Duration;

use marketgate::broadcast::{self, SessionMap};
use marketgate::downstream::DownstreamSession;
use marketgate::event::{Event, EventPayload, TradePayload};
use marketgate::registry::{Channel, ChannelKey, SubscriptionRegistry};
use marketgate::sinks::{NullCacheSink, NullDurableSink};
use tokio_util::sync::CancellationToken;

fn trade_event(seq: i64) -> Event {
    Event {
        symbol: "AAPL".to_string(),
        timestamp_ms: seq,
        payload: EventPayload::Trade(TradePayload {
            price: 100.0 + seq as f64,
            size: 10.0,
            exchange: None,
            conditions: vec![],
        }),
    }
}

#[tokio::test]
async fn stalled_session_does_not_block_delivery_to_others() {
    let subscriptions = Arc::new(SubscriptionRegistry::new());
    let sessions = Arc::new(SessionMap::default());
    let shutdown = CancellationToken::new();

    let ingress = broadcast::spawn(
        1,
        256,
        subscriptions.clone(),
        sessions.clone(),
        Arc::new(NullCacheSink),
        Arc::new(NullDurableSink),
        shutdown.clone(),
    );

    // Session A: tiny queue, receiver never drained -- a stalled write side.
    let (session_a, _stalled_rx) = DownstreamSession::new(1);
    sessions.insert(session_a.id().to_string(), session_a.clone());
    subscriptions.add(
        &session_a.id().to_string(),
        ChannelKey::symbol(Channel::Trades, "AAPL"),
    );

    // Session B: healthy, drained promptly.
    let (session_b, mut healthy_rx) = DownstreamSession::new(2000);
    sessions.insert(session_b.id().to_string(), session_b.clone());
    subscriptions.add(
        &session_b.id().to_string(),
        ChannelKey::symbol(Channel::Trades, "AAPL"),
    );

    const N: i64 = 1000;
    for seq in 0..N {
        ingress.dispatch(trade_event(seq));
    }

    let mut received = 0;
    while received < N {
        match tokio::time::timeout(Duration::from_secs(2), healthy_rx.recv()).await {
            Ok(Some(_)) => received += 1,
            _ => break,
        }
    }

    assert_eq!(received, N, "healthy session must receive every event despite the stalled one");
    assert!(
        session_a.drop_count() > 0,
        "the stalled session's queue should have started dropping messages"
    );

    shutdown.cancel();
}
