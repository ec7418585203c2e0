//! Process-wide configuration, loaded once from the environment at startup.
//!
//! Every field has a development-friendly default so the gateway is runnable
//! with no configuration beyond an upstream URL and API key. Grounded on the
//! teacher's `DbConfig`/`FederationConfig::from_env()` pattern: one
//! `from_env()` constructor, each variable read independently with a
//! fallback, no external config-file crate.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,

    pub upstream_ws_url: String,
    pub upstream_api_key: String,
    pub upstream_channels: Vec<String>,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub max_reconnect_attempts: u32,
    pub upstream_idle_read_timeout: Duration,

    pub cache_sink_url: Option<String>,
    pub durable_sink_url: Option<String>,
    pub sink_timeout: Duration,

    pub outbound_queue_capacity: usize,
    pub broadcast_queue_capacity: usize,
    pub broadcast_workers: usize,

    pub heartbeat_interval: Duration,
    pub write_deadline: Duration,
    pub stale_threshold: Duration,
    pub stale_sweep_interval: Duration,
    pub slow_consumer_drop_threshold: u64,
    pub slow_consumer_window: Duration,

    pub enable_metrics: bool,
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    /// documented in SPEC_FULL.md §6. `UPSTREAM_WS_URL`/`UPSTREAM_API_KEY`
    /// are the only variables without a usable default; callers that need a
    /// fully offline gateway (e.g. tests) should construct `Config`
    /// directly instead of calling this.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_string_or("BIND_ADDR", "0.0.0.0:8080"),
            allowed_origins: env_string_or("ALLOWED_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),

            upstream_ws_url: env_string_or("UPSTREAM_WS_URL", ""),
            upstream_api_key: env_string_or("UPSTREAM_API_KEY", ""),
            upstream_channels: env_string_or("UPSTREAM_CHANNELS", "T,Q,A,AM")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            connect_timeout: Duration::from_secs(env_or("CONNECT_TIMEOUT_SECS", 10)),
            auth_timeout: Duration::from_secs(env_or("AUTH_TIMEOUT_SECS", 10)),
            reconnect_base: Duration::from_secs(env_or("RECONNECT_BASE_SECS", 1)),
            reconnect_cap: Duration::from_secs(env_or("RECONNECT_CAP_SECS", 30)),
            max_reconnect_attempts: env_or("MAX_RECONNECT_ATTEMPTS", 0),
            upstream_idle_read_timeout: Duration::from_secs(env_or(
                "UPSTREAM_IDLE_READ_TIMEOUT_SECS",
                60,
            )),

            cache_sink_url: std::env::var("CACHE_SINK_URL").ok(),
            durable_sink_url: std::env::var("DURABLE_SINK_URL").ok(),
            sink_timeout: Duration::from_secs(env_or("SINK_TIMEOUT_SECS", 2)),

            outbound_queue_capacity: env_or("OUTBOUND_QUEUE_CAPACITY", 256),
            broadcast_queue_capacity: env_or("BROADCAST_QUEUE_CAPACITY", 1024),
            broadcast_workers: env_or("BROADCAST_WORKERS", 1),

            heartbeat_interval: Duration::from_secs(env_or("HEARTBEAT_INTERVAL_SECS", 30)),
            write_deadline: Duration::from_secs(env_or("WRITE_DEADLINE_SECS", 5)),
            stale_threshold: Duration::from_secs(env_or("STALE_THRESHOLD_SECS", 120)),
            stale_sweep_interval: Duration::from_secs(env_or("STALE_SWEEP_INTERVAL_SECS", 60)),
            slow_consumer_drop_threshold: env_or("SLOW_CONSUMER_DROP_THRESHOLD", 50),
            slow_consumer_window: Duration::from_secs(env_or("SLOW_CONSUMER_WINDOW_SECS", 10)),

            enable_metrics: matches!(
                std::env::var("ENABLE_METRICS").as_deref(),
                Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
            ),
        }
    }

    /// `market-data` and the per-kind channels subscribe the same upstream
    /// symbol set; this just names which upstream subscription tokens
    /// (§6's `T`/`Q`/`A`/`AM`) a fresh `Subscribe` call should emit.
    pub fn default_channels(&self) -> &[String] {
        &self.upstream_channels
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            allowed_origins: vec!["*".to_string()],
            upstream_ws_url: String::new(),
            upstream_api_key: String::new(),
            upstream_channels: vec!["T".into(), "Q".into(), "A".into(), "AM".into()],
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 0,
            upstream_idle_read_timeout: Duration::from_secs(60),
            cache_sink_url: None,
            durable_sink_url: None,
            sink_timeout: Duration::from_secs(2),
            outbound_queue_capacity: 256,
            broadcast_queue_capacity: 1024,
            broadcast_workers: 1,
            heartbeat_interval: Duration::from_secs(30),
            write_deadline: Duration::from_secs(5),
            stale_threshold: Duration::from_secs(120),
            stale_sweep_interval: Duration::from_secs(60),
            slow_consumer_drop_threshold: 50,
            slow_consumer_window: Duration::from_secs(10),
            enable_metrics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_all_four_upstream_channels() {
        let cfg = Config::default();
        assert_eq!(cfg.default_channels(), &["T", "Q", "A", "AM"]);
    }

    #[test]
    fn default_allowed_origins_is_wildcard() {
        let cfg = Config::default();
        assert_eq!(cfg.allowed_origins, vec!["*".to_string()]);
    }
}
