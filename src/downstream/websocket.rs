//! axum WebSocket upgrade handler for downstream clients (spec.md §4.4/§6).
//!
//! Grounded on the teacher's `subscribe_convo_events`/`handle_socket`: split
//! the socket, wrap the sender in `Arc<Mutex<_>>` so both the outbound-queue
//! drain task and the heartbeat task can write to it, race read/write/
//! heartbeat tasks with `tokio::select!`, and unwind every subscription on
//! whichever task notices the disconnect first.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::event::OutboundMessage;
use crate::registry::{Channel, ChannelKey, SymbolScope};
use crate::state::GatewayState;
use crate::time::now_ms;

use super::session::DownstreamSession;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMessage {
    Subscribe {
        channel: String,
        #[serde(default)]
        symbols: Vec<String>,
    },
    Unsubscribe {
        channel: String,
        #[serde(default)]
        symbols: Vec<String>,
    },
    Ping,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    let (session, mut outbound_rx) = DownstreamSession::new(state.config.outbound_queue_capacity);
    state.sessions.insert(session.id().to_string(), session.clone());
    crate::metrics::set_downstream_clients(state.sessions.len());
    info!(session_id = session.id(), "downstream session connected");

    let write_sender = sender.clone();
    let write_deadline = state.config.write_deadline;
    let mut write_task = tokio::spawn(async move {
        while let Some(json) = outbound_rx.recv().await {
            let mut guard = write_sender.lock().await;
            let sent = tokio::time::timeout(write_deadline, guard.send(Message::Text(json.to_string().into()))).await;
            if !matches!(sent, Ok(Ok(()))) {
                break;
            }
        }
    });

    let heartbeat_sender = sender.clone();
    let heartbeat_interval = state.config.heartbeat_interval;
    let write_deadline = state.config.write_deadline;
    let mut heartbeat_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        loop {
            interval.tick().await;
            let mut guard = heartbeat_sender.lock().await;
            let sent = tokio::time::timeout(write_deadline, guard.send(Message::Ping(Vec::new().into()))).await;
            if !matches!(sent, Ok(Ok(()))) {
                break;
            }
        }
    });

    let read_state = state.clone();
    let read_session = session.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            read_session.touch();
            match msg {
                Message::Close(_) => break,
                Message::Text(text) => handle_client_message(&text, &read_state, &read_session).await,
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {}
            }
        }
    });

    let close_token = session.close_token();
    tokio::select! {
        _ = &mut write_task => {
            read_task.abort();
            heartbeat_task.abort();
        }
        _ = &mut read_task => {
            write_task.abort();
            heartbeat_task.abort();
        }
        _ = &mut heartbeat_task => {
            write_task.abort();
            read_task.abort();
        }
        // Triggered by an external teardown (stale-session sweeper,
        // slow-consumer eviction) rather than by this connection's own
        // tasks noticing a problem. Aborting the tasks drops the shared
        // sender, which closes the underlying socket.
        _ = close_token.cancelled() => {
            write_task.abort();
            read_task.abort();
            heartbeat_task.abort();
        }
        // Process shutdown (spec.md §5): close every open session's
        // transport rather than waiting for clients to hang up on their own.
        _ = state.shutdown.cancelled() => {
            write_task.abort();
            read_task.abort();
            heartbeat_task.abort();
        }
    }

    teardown_session(&state, &session);
}

async fn handle_client_message(text: &str, state: &GatewayState, session: &Arc<DownstreamSession>) {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let err = GatewayError::Protocol(e.to_string());
            warn!(session_id = session.id(), error = %err, "dropped unparseable client message");
            session.try_send(OutboundMessage::error(err.client_reason(), now_ms()));
            return;
        }
    };

    match parsed {
        ClientMessage::Subscribe { channel, symbols } => {
            apply_subscribe(state, session, &channel, symbols);
        }
        ClientMessage::Unsubscribe { channel, symbols } => {
            apply_unsubscribe(state, session, &channel, symbols);
        }
        ClientMessage::Ping => {
            session.try_send(OutboundMessage::pong(now_ms()));
        }
    }
}

/// Symbols this session already covers under *any* channel — the unit the
/// Symbol Reference Registry's refcount invariant is keyed on (spec.md §3/
/// §8: `count(s)` is the number of distinct sessions covering `s`, not the
/// number of channel-subscribe calls that happened to name it). A session
/// subscribed to `trades:AAPL` already covers `AAPL`; subscribing it to
/// `quotes:AAPL` afterwards must add the routing key without acquiring
/// `AAPL` a second time.
fn covered_symbols(existing: &[ChannelKey]) -> HashSet<String> {
    existing
        .iter()
        .filter_map(|key| match &key.scope {
            SymbolScope::Symbol(s) => Some(s.clone()),
            SymbolScope::All => None,
        })
        .collect()
}

fn apply_subscribe(
    state: &GatewayState,
    session: &Arc<DownstreamSession>,
    channel_name: &str,
    symbols: Vec<String>,
) {
    let Some(channel) = Channel::from_str(channel_name) else {
        let err = GatewayError::Unsupported(channel_name.to_string());
        session.try_send(OutboundMessage::error(err.client_reason(), now_ms()));
        return;
    };

    let session_id = session.id().to_string();
    let existing = state.subscriptions.keys_for_session(&session_id);

    if symbols.is_empty() || symbols.iter().any(|s| s == "*") {
        let key = ChannelKey::new(channel, SymbolScope::All);
        if !existing.contains(&key) {
            state.subscriptions.add(&session_id, key);
        }
    } else {
        let mut covered = covered_symbols(&existing);
        let mut to_acquire_symbols = Vec::new();
        for symbol in &symbols {
            let key = ChannelKey::symbol(channel, symbol.clone());
            if existing.contains(&key) {
                continue;
            }
            state.subscriptions.add(&session_id, key);
            if covered.insert(symbol.clone()) {
                to_acquire_symbols.push(symbol.clone());
            }
        }
        if !to_acquire_symbols.is_empty() {
            let to_acquire = state.symbols.acquire(&to_acquire_symbols);
            state.upstream.subscribe(to_acquire);
        }
    }

    session.try_send(OutboundMessage::subscribed(channel.as_str(), symbols, now_ms()));
}

fn apply_unsubscribe(
    state: &GatewayState,
    session: &Arc<DownstreamSession>,
    channel_name: &str,
    symbols: Vec<String>,
) {
    let Some(channel) = Channel::from_str(channel_name) else {
        let err = GatewayError::Unsupported(channel_name.to_string());
        session.try_send(OutboundMessage::error(err.client_reason(), now_ms()));
        return;
    };

    let session_id = session.id().to_string();

    if symbols.is_empty() || symbols.iter().any(|s| s == "*") {
        state
            .subscriptions
            .remove(&session_id, &ChannelKey::new(channel, SymbolScope::All));
    } else {
        let mut remaining: HashSet<ChannelKey> =
            state.subscriptions.keys_for_session(&session_id).into_iter().collect();
        let mut released_symbols = Vec::new();
        for symbol in &symbols {
            let key = ChannelKey::symbol(channel, symbol.clone());
            if state.subscriptions.remove(&session_id, &key) {
                remaining.remove(&key);
                let still_covered = remaining
                    .iter()
                    .any(|k| matches!(&k.scope, SymbolScope::Symbol(s) if s == symbol));
                if !still_covered {
                    released_symbols.push(symbol.clone());
                }
            }
        }
        if !released_symbols.is_empty() {
            let to_release = state.symbols.release(&released_symbols);
            state.upstream.unsubscribe(to_release);
        }
    }

    session.try_send(OutboundMessage::unsubscribed(channel.as_str(), now_ms()));
}

/// Idempotent: safe to call from the post-select cleanup path and from the
/// stale-session sweeper without double-releasing upstream symbols.
pub fn teardown_session(state: &GatewayState, session: &Arc<DownstreamSession>) {
    if !session.begin_teardown() {
        return;
    }

    let keys = state.subscriptions.remove_all(&session.id().to_string());
    let symbols_to_release: Vec<String> = keys
        .into_iter()
        .filter_map(|key| match key.scope {
            SymbolScope::Symbol(sym) => Some(sym),
            SymbolScope::All => None,
        })
        .collect();
    if !symbols_to_release.is_empty() {
        let to_unsubscribe = state.symbols.release(&symbols_to_release);
        state.upstream.unsubscribe(to_unsubscribe);
    }

    state.sessions.remove(session.id());
    crate::metrics::set_downstream_clients(state.sessions.len());
    debug!(session_id = session.id(), drops = session.drop_count(), "downstream session torn down");
}
