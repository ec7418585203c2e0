//! Upstream Session (spec.md §4.1): one multiplexed connection to the
//! market-data provider, reconnected with capped linear backoff and
//! resubscribed from scratch whenever the connection is lost.
//!
//! Grounded on the teacher's `UpstreamManager`/`upstream_reader_task`: a
//! background task owns the socket, a command channel carries
//! subscribe/unsubscribe requests into the task, and a `tokio_util`
//! `CancellationToken` drives shutdown. Unlike the teacher (one connection
//! per remote conversation), this gateway has exactly one upstream
//! connection for the whole process, so there is no connection map — the
//! state machine itself is the unit of concurrency control.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastIngress;
use crate::config::Config;
use crate::metrics;
use crate::registry::SymbolRefRegistry;
use crate::upstream::parser::{self, ParsedRecord};

/// spec.md §4.1's five states, collapsed onto a single atomic for cheap
/// `is_ready()` polling from `/health`; `Reconnecting` and `Disconnected`
/// are distinguished by whether the session's background task is still
/// running, not by this field alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpstreamState {
    Disconnected = 0,
    Connecting = 1,
    Authenticating = 2,
    Ready = 3,
    Reconnecting = 4,
}

impl UpstreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Authenticating,
            3 => Self::Ready,
            4 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }
}

struct AtomicState(AtomicU8);

impl AtomicState {
    fn new(initial: UpstreamState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    fn set(&self, s: UpstreamState) {
        self.0.store(s as u8, Ordering::SeqCst);
    }

    fn get(&self) -> UpstreamState {
        UpstreamState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

enum UpstreamCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Handle held by the rest of the process (broadcast engine wiring, HTTP
/// handlers) to observe and drive the upstream session without reaching
/// into its background task.
#[derive(Clone)]
pub struct UpstreamHandle {
    state: Arc<AtomicState>,
    cmd_tx: mpsc::Sender<UpstreamCommand>,
}

impl UpstreamHandle {
    pub fn is_ready(&self) -> bool {
        self.state.get() == UpstreamState::Ready
    }

    pub fn state(&self) -> UpstreamState {
        self.state.get()
    }

    /// Request that the upstream connection subscribe to `symbols`. Best
    /// effort: if the command channel is full (the upstream task is wedged)
    /// the request is dropped and logged rather than blocking the caller —
    /// the Symbol Reference Registry has already committed the refcount
    /// change, so a dropped command only delays data, it does not corrupt
    /// bookkeeping.
    pub fn subscribe(&self, symbols: Vec<String>) {
        if symbols.is_empty() {
            return;
        }
        if self
            .cmd_tx
            .try_send(UpstreamCommand::Subscribe(symbols))
            .is_err()
        {
            warn!("upstream command queue full, dropped subscribe request");
        }
    }

    pub fn unsubscribe(&self, symbols: Vec<String>) {
        if symbols.is_empty() {
            return;
        }
        if self
            .cmd_tx
            .try_send(UpstreamCommand::Unsubscribe(symbols))
            .is_err()
        {
            warn!("upstream command queue full, dropped unsubscribe request");
        }
    }
}

/// Spawn the background task that owns the upstream connection and return a
/// handle to it. `events` is the Broadcast Engine's bounded ingress queue;
/// `symbols` is consulted on every (re)connect so reconnects resubscribe
/// everything currently held, per spec.md §4.1/§9.
pub fn spawn(
    config: Arc<Config>,
    symbols: Arc<SymbolRefRegistry>,
    events: BroadcastIngress,
    shutdown: CancellationToken,
) -> UpstreamHandle {
    let state = Arc::new(AtomicState::new(UpstreamState::Disconnected));
    let (cmd_tx, cmd_rx) = mpsc::channel(1024);

    let task_state = state.clone();
    tokio::spawn(run(config, symbols, events, cmd_rx, task_state, shutdown));

    UpstreamHandle { state, cmd_tx }
}

async fn run(
    config: Arc<Config>,
    symbols: Arc<SymbolRefRegistry>,
    events: BroadcastIngress,
    mut cmd_rx: mpsc::Receiver<UpstreamCommand>,
    state: Arc<AtomicState>,
    shutdown: CancellationToken,
) {
    let mut attempts: u32 = 0;

    loop {
        if shutdown.is_cancelled() {
            state.set(UpstreamState::Disconnected);
            return;
        }

        state.set(UpstreamState::Connecting);
        let reached_ready = Arc::new(AtomicBool::new(false));
        let result = connect_and_run(
            &config,
            &symbols,
            &events,
            &mut cmd_rx,
            &state,
            &shutdown,
            &reached_ready,
        )
        .await;

        match result {
            Ok(()) => {
                // Clean shutdown request, not a transport failure.
                state.set(UpstreamState::Disconnected);
                return;
            }
            Err(reason) => {
                // The attempt counter resets on successful auth (spec.md
                // §4.1): a session that reached Ready before this failure
                // restarts its backoff at reconnect_base, not where the
                // previous failure streak left off.
                if reached_ready.load(Ordering::SeqCst) {
                    attempts = 0;
                }
                attempts += 1;
                let delay = reconnect_delay(config.reconnect_base, config.reconnect_cap, attempts);
                warn!(error = %reason, attempts, delay_secs = delay.as_secs(), "upstream disconnected, reconnecting");
                metrics::record_upstream_reconnect();

                if config.max_reconnect_attempts != 0 && attempts >= config.max_reconnect_attempts {
                    warn!(attempts, "upstream session exhausted reconnect attempts, giving up");
                    state.set(UpstreamState::Disconnected);
                    return;
                }

                state.set(UpstreamState::Reconnecting);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.cancelled() => {
                        state.set(UpstreamState::Disconnected);
                        return;
                    }
                }
            }
        }
    }
}

/// Linear backoff (spec.md §4.1): `delay = base * attempt`, capped. `attempt`
/// is 1-indexed — the first retry after a failure waits exactly `base`.
fn reconnect_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    (base * attempt).min(cap)
}

/// One connect/authenticate/stream cycle. `Ok(())` only on a caller-driven
/// shutdown; any transport or protocol problem is an `Err` so the caller
/// backs off and retries.
async fn connect_and_run(
    config: &Config,
    symbols: &Arc<SymbolRefRegistry>,
    events: &BroadcastIngress,
    cmd_rx: &mut mpsc::Receiver<UpstreamCommand>,
    state: &Arc<AtomicState>,
    shutdown: &CancellationToken,
    reached_ready: &Arc<AtomicBool>,
) -> Result<(), String> {
    let connect_fut = tokio_tungstenite::connect_async(&config.upstream_ws_url);
    let (ws_stream, _) = tokio::select! {
        result = connect_fut => result.map_err(|e| format!("connect failed: {e}"))?,
        _ = sleep(config.connect_timeout) => return Err("connect timeout".into()),
        _ = shutdown.cancelled() => return Ok(()),
    };
    info!("upstream connected");

    let (mut write, mut read) = ws_stream.split();

    state.set(UpstreamState::Authenticating);
    let auth_frame = serde_json::json!({ "action": "auth", "params": config.upstream_api_key }).to_string();
    write
        .send(WsMessage::Text(auth_frame))
        .await
        .map_err(|e| format!("auth send failed: {e}"))?;

    let auth_deadline = sleep(config.auth_timeout);
    tokio::pin!(auth_deadline);
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(records) = parser::parse_frame(&text) {
                            if records.iter().any(|r| matches!(r, ParsedRecord::Status { status, .. } if status.contains("auth_success"))) {
                                break;
                            }
                            if let Some(ParsedRecord::Status { status, message }) =
                                records.into_iter().find(|r| matches!(r, ParsedRecord::Status { status, .. } if status.contains("auth_failed")))
                            {
                                metrics::record_upstream_auth_failure();
                                return Err(format!("auth failed: {status} {message}"));
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(format!("read error during auth: {e}")),
                    None => return Err("connection closed during auth".into()),
                }
            }
            _ = &mut auth_deadline => return Err("auth timeout".into()),
            _ = shutdown.cancelled() => return Ok(()),
        }
    }

    state.set(UpstreamState::Ready);
    reached_ready.store(true, Ordering::SeqCst);
    info!("upstream authenticated");

    let channels = config.upstream_channels.join(",");
    let held_symbols = symbols.subscribed_symbols();
    if !held_symbols.is_empty() {
        send_subscribe(&mut write, &channels, &held_symbols).await?;
        info!(count = held_symbols.len(), "resubscribed symbols after (re)connect");
    }

    loop {
        let idle_timeout = sleep(config.upstream_idle_read_timeout);
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => handle_frame(&text, events),
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if write.send(WsMessage::Pong(payload)).await.is_err() {
                            return Err("failed to answer upstream ping".into());
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => return Err("upstream sent close frame".into()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(format!("read error: {e}")),
                    None => return Err("upstream stream ended".into()),
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UpstreamCommand::Subscribe(syms)) => send_subscribe(&mut write, &channels, &syms).await?,
                    Some(UpstreamCommand::Unsubscribe(syms)) => send_unsubscribe(&mut write, &channels, &syms).await?,
                    None => return Err("command channel closed".into()),
                }
            }
            _ = idle_timeout => {
                return Err("upstream idle-read timeout".into());
            }
            _ = shutdown.cancelled() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return Ok(());
            }
        }
    }
}

fn handle_frame(text: &str, events: &BroadcastIngress) {
    let records = match parser::parse_frame(text) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "dropped unparseable upstream frame");
            return;
        }
    };
    for record in records {
        match record {
            ParsedRecord::Event(event) => {
                events.dispatch(event);
            }
            ParsedRecord::Status { status, message } => {
                debug!(status, message, "upstream status record");
            }
            ParsedRecord::Unknown => {}
        }
    }
}

async fn send_subscribe(
    write: &mut (impl futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    channels: &str,
    symbols: &[String],
) -> Result<(), String> {
    let params = build_params(channels, symbols);
    let frame = serde_json::json!({ "action": "subscribe", "params": params }).to_string();
    write
        .send(WsMessage::Text(frame))
        .await
        .map_err(|e| format!("subscribe send failed: {e}"))
}

async fn send_unsubscribe(
    write: &mut (impl futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    channels: &str,
    symbols: &[String],
) -> Result<(), String> {
    let params = build_params(channels, symbols);
    let frame = serde_json::json!({ "action": "unsubscribe", "params": params }).to_string();
    write
        .send(WsMessage::Text(frame))
        .await
        .map_err(|e| format!("unsubscribe send failed: {e}"))
}

/// `T.AAPL,Q.AAPL,A.AAPL,AM.AAPL,T.TSLA,...` — one upstream subscription
/// token per (channel, symbol) pair, matching the provider's comma-joined
/// params string (spec.md §6).
fn build_params(channels: &str, symbols: &[String]) -> String {
    symbols
        .iter()
        .flat_map(|sym| channels.split(',').map(move |ch| format!("{ch}.{sym}")))
        .collect::<Vec<_>>()
        .join(",")
}
