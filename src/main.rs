use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketgate::broadcast::{self, SessionMap};
use marketgate::config::Config;
use marketgate::downstream::{sweeper, ws_handler};
use marketgate::error::GatewayError;
use marketgate::health;
use marketgate::metrics::{self, MetricsRecorder};
use marketgate::middleware::logging::log_requests_middleware;
use marketgate::registry::{SubscriptionRegistry, SymbolRefRegistry};
use marketgate::sinks::{cache_sink_from_config, durable_sink_from_config};
use marketgate::state::GatewayState;
use marketgate::upstream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }
        #[cfg(not(debug_assertions))]
        {
            "info".to_string()
        }
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("starting market-data gateway");

    let config = Arc::new(Config::from_env());
    if config.upstream_ws_url.is_empty() || config.upstream_api_key.is_empty() {
        anyhow::bail!("UPSTREAM_WS_URL and UPSTREAM_API_KEY must both be set");
    }

    let metrics_recorder = MetricsRecorder::new();
    let metrics_handle = metrics_recorder.handle();
    tracing::info!("metrics initialized");

    let shutdown = CancellationToken::new();

    let subscriptions = Arc::new(SubscriptionRegistry::new());
    let symbols = Arc::new(SymbolRefRegistry::new());
    let sessions = Arc::new(SessionMap::default());

    let cache_sink = cache_sink_from_config(config.cache_sink_url.as_deref(), config.sink_timeout);
    let durable_sink = durable_sink_from_config(config.durable_sink_url.as_deref(), config.sink_timeout);
    tracing::info!(cache = cache_sink.name(), durable = durable_sink.name(), "sinks configured");

    let ingress = broadcast::spawn(
        config.broadcast_workers,
        config.broadcast_queue_capacity,
        subscriptions.clone(),
        sessions.clone(),
        cache_sink.clone(),
        durable_sink.clone(),
        shutdown.clone(),
    );
    tracing::info!(workers = config.broadcast_workers, "broadcast engine started");

    let upstream_handle = upstream::spawn(config.clone(), symbols.clone(), ingress, shutdown.clone());
    tracing::info!(url = %config.upstream_ws_url, "upstream session started");

    let state = GatewayState {
        config: config.clone(),
        subscriptions,
        symbols,
        sessions,
        upstream: upstream_handle,
        cache_sink,
        durable_sink,
        started_at: Instant::now(),
        shutdown: shutdown.clone(),
    };

    sweeper::spawn(state.clone(), shutdown.clone());
    tracing::info!("stale-session sweeper started");

    let metrics_router = if config.enable_metrics {
        Router::new()
            .route("/metrics", get(metrics::metrics_handler))
            .with_state(metrics_handle)
    } else {
        Router::new()
    };

    let cors = if config.allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/stats", get(health::stats))
        .route("/ws", get(ws_handler))
        .merge(metrics_router)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(log_requests_middleware))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            tracing::info!("shutdown signal received, draining sessions");
            serve_shutdown.cancel();
        })
        .await?;

    tracing::info!("gateway stopped");
    Ok(())
}

async fn not_found() -> GatewayError {
    GatewayError::Unsupported("no route for this path".to_string())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
