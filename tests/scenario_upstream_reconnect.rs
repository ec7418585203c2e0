//! Scenario 4 (upstream reconnect resubscribe): a mock upstream server
//! accepts the gateway's connection, authenticates it, and observes the
//! subscribe frame it sends. After the first connection is dropped, the
//! gateway must reconnect, re-authenticate, and reissue a single batched
//! subscribe covering exactly the symbols already held in the Symbol
//! Reference Registry — with no action required from any downstream client.
//!
//! Grounded on the `iwismer-rusty-timer` `MockWsServer` test harness
//! (`crates/rt-test-utils/src/mock_ws_server.rs`): bind to a random port,
//! accept connections in a background task, and script each connection's
//! behavior explicitly rather than against a real provider.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use marketgate::broadcast::{self, SessionMap};
use marketgate::config::Config;
use marketgate::registry::{SubscriptionRegistry, SymbolRefRegistry};
use marketgate::sinks::{NullCacheSink, NullDurableSink};

/// Runs two scripted upstream connections in sequence: the first accepts,
/// authenticates, waits for one subscribe frame, forwards its `params` value
/// down `observed`, then drops the socket to simulate a transport failure.
/// The second behaves the same but stays open afterwards so later frames
/// don't accumulate reconnects.
async fn spawn_mock_upstream(observed: mpsc::UnboundedSender<String>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut connection_count = 0usize;
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            connection_count += 1;
            let drop_after_subscribe = connection_count == 1;
            let observed = observed.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut write, mut read) = ws.split();

                // First frame must be the auth handshake.
                match read.next().await {
                    Some(Ok(WsMessage::Text(_))) => {}
                    _ => return,
                }
                let status = serde_json::json!({
                    "ev": "status",
                    "status": "auth_success",
                    "message": "authenticated"
                })
                .to_string();
                if write.send(WsMessage::Text(status)).await.is_err() {
                    return;
                }

                // Next frame is the subscribe action.
                let Some(Ok(WsMessage::Text(text))) = read.next().await else {
                    return;
                };
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["action"], "subscribe");
                let _ = observed.send(value["params"].as_str().unwrap().to_string());

                if drop_after_subscribe {
                    // Simulate a transport failure: close without warning.
                    return;
                }

                // Keep the second connection open so the gateway doesn't
                // immediately reconnect again.
                while read.next().await.is_some() {}
            });
        }
    });

    addr
}

#[tokio::test]
async fn reconnect_resubscribes_exactly_the_held_symbol_set() {
    let (observed_tx, mut observed_rx) = mpsc::unbounded_channel();
    let addr = spawn_mock_upstream(observed_tx).await;

    let symbols = Arc::new(SymbolRefRegistry::new());
    // Two downstream subscribers worth of demand, already committed to the
    // registry before the upstream session starts — mirrors the gateway
    // having been running with live subscribers when the drop happens.
    symbols.acquire(&["AAPL".to_string(), "TSLA".to_string()]);

    let mut config = Config::default();
    config.upstream_ws_url = format!("ws://{addr}");
    config.upstream_api_key = "test-key".to_string();
    config.upstream_channels = vec!["T".to_string()];
    config.connect_timeout = Duration::from_secs(2);
    config.auth_timeout = Duration::from_secs(2);
    config.reconnect_base = Duration::from_millis(20);
    config.reconnect_cap = Duration::from_millis(50);
    config.upstream_idle_read_timeout = Duration::from_secs(30);
    let config = Arc::new(config);

    let shutdown = CancellationToken::new();
    let subscriptions = Arc::new(SubscriptionRegistry::new());
    let sessions = Arc::new(SessionMap::default());
    let ingress = broadcast::spawn(
        1,
        16,
        subscriptions,
        sessions,
        Arc::new(NullCacheSink),
        Arc::new(NullDurableSink),
        shutdown.clone(),
    );

    let _handle = marketgate::upstream::spawn(config, symbols.clone(), ingress, shutdown.clone());

    let first_params = tokio::time::timeout(Duration::from_secs(2), observed_rx.recv())
        .await
        .expect("first connection observed a subscribe frame")
        .unwrap();
    let mut first: Vec<&str> = first_params.split(',').collect();
    first.sort();
    assert_eq!(first, vec!["T.AAPL", "T.TSLA"]);

    // The mock server dropped the first connection right after observing
    // the subscribe; wait for the gateway's backoff-driven reconnect to
    // land and resubscribe the same set with no client-side action.
    let second_params = tokio::time::timeout(Duration::from_secs(3), observed_rx.recv())
        .await
        .expect("second connection observed a resubscribe frame")
        .unwrap();
    let mut second: Vec<&str> = second_params.split(',').collect();
    second.sort();
    assert_eq!(second, vec!["T.AAPL", "T.TSLA"]);

    // The refcount registry itself is untouched by the reconnect -- upstream
    // parity is restored, not re-derived.
    assert_eq!(symbols.count("AAPL"), 1);
    assert_eq!(symbols.count("TSLA"), 1);

    shutdown.cancel();
}
