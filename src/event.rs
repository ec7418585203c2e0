//! Normalized market-data event model and the outbound wire message shape.
//!
//! Events are produced by the upstream session's parser and are immutable
//! from that point on — the broadcast engine and every downstream session
//! hold shared, read-only references to the same value.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A symbol-scoped, normalized market-data record.
///
/// Cheap to clone: the payload is the only variable-size part and callers
/// are expected to wrap an `Event` in an `Arc` before handing it to more than
/// one consumer (the broadcast engine does this once per upstream record).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Event {
    pub symbol: String,
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Event kind is carried by the payload variant itself; this mirrors it back
/// out for registry lookups and outbound message tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Trade,
    Quote,
    AggSec,
    AggMin,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Trade(_) => EventKind::Trade,
            EventPayload::Quote(_) => EventKind::Quote,
            EventPayload::AggSec(_) => EventKind::AggSec,
            EventPayload::AggMin(_) => EventKind::AggMin,
        }
    }

    /// The channel name this event is routed under, per spec.md §6/§4.3.
    pub fn channel(&self) -> &'static str {
        match self.kind() {
            EventKind::Trade => "trades",
            EventKind::Quote => "quotes",
            EventKind::AggSec | EventKind::AggMin => "aggregates",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum EventPayload {
    Trade(TradePayload),
    Quote(QuotePayload),
    AggSec(AggPayload),
    AggMin(AggPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradePayload {
    pub price: f64,
    pub size: f64,
    pub exchange: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotePayload {
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggPayload {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: Option<f64>,
    pub trade_count: Option<i64>,
}

/// Shared handle to a normalized event, as it travels from the upstream
/// parser through the broadcast engine to every matching downstream queue.
pub type SharedEvent = Arc<Event>;

/// Server→client message shape of spec.md §3/§6. Serialized lazily, once per
/// broadcast, by the broadcast engine — never once per recipient.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: OutboundKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutboundKind {
    MarketData,
    Subscribed,
    Unsubscribed,
    Pong,
    Error,
}

impl OutboundMessage {
    pub fn market_data(channel: &str, event: &Event) -> Self {
        Self {
            kind: OutboundKind::MarketData,
            channel: Some(channel.to_string()),
            symbols: Some(vec![event.symbol.clone()]),
            data: serde_json::to_value(&event.payload).ok(),
            timestamp: event.timestamp_ms,
            metadata: None,
        }
    }

    pub fn subscribed(channel: &str, symbols: Vec<String>, timestamp_ms: i64) -> Self {
        Self {
            kind: OutboundKind::Subscribed,
            channel: Some(channel.to_string()),
            symbols: Some(symbols),
            data: None,
            timestamp: timestamp_ms,
            metadata: None,
        }
    }

    pub fn unsubscribed(channel: &str, timestamp_ms: i64) -> Self {
        Self {
            kind: OutboundKind::Unsubscribed,
            channel: Some(channel.to_string()),
            symbols: None,
            data: None,
            timestamp: timestamp_ms,
            metadata: None,
        }
    }

    pub fn pong(timestamp_ms: i64) -> Self {
        Self {
            kind: OutboundKind::Pong,
            channel: None,
            symbols: None,
            data: None,
            timestamp: timestamp_ms,
            metadata: None,
        }
    }

    pub fn error(reason: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            kind: OutboundKind::Error,
            channel: None,
            symbols: None,
            data: Some(serde_json::json!({ "reason": reason.into() })),
            timestamp: timestamp_ms,
            metadata: None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_channel_mapping() {
        let trade = Event {
            symbol: "AAPL".into(),
            timestamp_ms: 1,
            payload: EventPayload::Trade(TradePayload {
                price: 1.0,
                size: 1.0,
                exchange: None,
                conditions: vec![],
            }),
        };
        assert_eq!(trade.channel(), "trades");
        assert_eq!(trade.kind(), EventKind::Trade);

        let agg = Event {
            symbol: "AAPL".into(),
            timestamp_ms: 1,
            payload: EventPayload::AggMin(AggPayload {
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
                vwap: None,
                trade_count: None,
            }),
        };
        assert_eq!(agg.channel(), "aggregates");
    }

    #[test]
    fn outbound_market_data_serializes_price() {
        let event = Event {
            symbol: "AAPL".into(),
            timestamp_ms: 1700000000000,
            payload: EventPayload::Trade(TradePayload {
                price: 150.25,
                size: 100.0,
                exchange: Some(4),
                conditions: vec![],
            }),
        };
        let msg = OutboundMessage::market_data("trades", &event);
        let json = msg.to_json();
        assert!(json.contains("\"type\":\"market-data\""));
        assert!(json.contains("150.25"));
        assert!(json.contains("\"AAPL\""));
    }
}
