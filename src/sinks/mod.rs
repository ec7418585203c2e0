//! Side-channel sinks (spec.md §4.5/§6 "out-of-scope external collaborators"):
//! fire-and-forget write-throughs that mirror every broadcast event to a
//! cache and a durable store without ever blocking or slowing the
//! downstream fan-out path.
//!
//! Grounded on the teacher's `MailboxBackend` trait/`MailboxFactory`
//! pattern: a small async trait, a `Null*` implementation that is the
//! default, and a factory that picks an implementation from configuration.
//! Unlike `MailboxBackend::notify`, a sink failure is only ever logged —
//! nothing downstream waits on it or retries it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::event::Event;

#[async_trait]
pub trait CacheSink: Send + Sync {
    async fn write(&self, event: &Event);
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait DurableSink: Send + Sync {
    async fn write(&self, event: &Event);
    fn name(&self) -> &'static str;
}

pub struct NullCacheSink;

#[async_trait]
impl CacheSink for NullCacheSink {
    async fn write(&self, _event: &Event) {}

    fn name(&self) -> &'static str {
        "null"
    }
}

pub struct NullDurableSink;

#[async_trait]
impl DurableSink for NullDurableSink {
    async fn write(&self, _event: &Event) {}

    fn name(&self) -> &'static str {
        "null"
    }
}

/// POSTs the event JSON to a fixed URL with a bounded timeout. Used for
/// both the cache and durable sink — the two differ only in which env var
/// configures their URL, not in transport.
pub struct HttpSink {
    url: String,
    client: reqwest::Client,
    label: &'static str,
}

impl HttpSink {
    pub fn new(url: String, timeout: Duration, label: &'static str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { url, client, label }
    }

    async fn post(&self, event: &Event) {
        let result = self.client.post(&self.url).json(event).send().await;
        match result {
            Ok(resp) if !resp.status().is_success() => {
                warn!(sink = self.label, status = %resp.status(), "sink write-through rejected");
            }
            Err(e) => {
                warn!(sink = self.label, error = %e, "sink write-through failed");
            }
            Ok(_) => debug!(sink = self.label, "sink write-through ok"),
        }
    }
}

#[async_trait]
impl CacheSink for HttpSink {
    async fn write(&self, event: &Event) {
        self.post(event).await;
    }

    fn name(&self) -> &'static str {
        self.label
    }
}

#[async_trait]
impl DurableSink for HttpSink {
    async fn write(&self, event: &Event) {
        self.post(event).await;
    }

    fn name(&self) -> &'static str {
        self.label
    }
}

pub fn cache_sink_from_config(url: Option<&str>, timeout: Duration) -> Arc<dyn CacheSink> {
    match url {
        Some(url) => Arc::new(HttpSink::new(url.to_string(), timeout, "cache")),
        None => Arc::new(NullCacheSink),
    }
}

pub fn durable_sink_from_config(url: Option<&str>, timeout: Duration) -> Arc<dyn DurableSink> {
    match url {
        Some(url) => Arc::new(HttpSink::new(url.to_string(), timeout, "durable")),
        None => Arc::new(NullDurableSink),
    }
}
