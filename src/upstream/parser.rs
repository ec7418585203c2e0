//! Parses upstream wire frames (spec.md §6) into normalized `Event`s or
//! status records.
//!
//! The upstream sends a JSON array of records per frame; each record carries
//! an explicit `"ev"` type tag (`T`/`Q`/`A`/`AM`) for data records, or
//! `"status"` for connection/auth lifecycle records. We dispatch on the tag
//! ourselves rather than leaning on serde's untagged/tagged enum support,
//! because `A` (second aggregate) and `AM` (minute aggregate) share an
//! identical payload shape and only the tag distinguishes them.

use serde::Deserialize;
use serde_json::Value;

use crate::event::{AggPayload, Event, EventPayload, QuotePayload, TradePayload};

#[derive(Debug, Deserialize)]
struct StatusRecord {
    status: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
pub enum ParsedRecord {
    Event(Event),
    Status { status: String, message: String },
    /// A record with an unrecognized or missing type tag. Logged and
    /// skipped by the caller rather than treated as a protocol error — a
    /// single unknown record type should not tear down the connection.
    Unknown,
}

/// Parse one upstream text frame (a JSON array of records) into a list of
/// parsed records, preserving wire order.
pub fn parse_frame(text: &str) -> Result<Vec<ParsedRecord>, serde_json::Error> {
    let records: Vec<Value> = serde_json::from_str(text)?;
    Ok(records.into_iter().map(parse_record).collect())
}

fn parse_record(value: Value) -> ParsedRecord {
    let Some(ev) = value.get("ev").and_then(Value::as_str) else {
        return ParsedRecord::Unknown;
    };

    if ev == "status" {
        return match serde_json::from_value::<StatusRecord>(value) {
            Ok(s) => ParsedRecord::Status {
                status: s.status,
                message: s.message,
            },
            Err(_) => ParsedRecord::Unknown,
        };
    }

    let symbol = value
        .get("sym")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let timestamp_ms = value
        .get("t")
        .and_then(Value::as_i64)
        .unwrap_or_default();

    let payload = match ev {
        "T" => parse_trade(&value).map(EventPayload::Trade),
        "Q" => parse_quote(&value).map(EventPayload::Quote),
        "A" => parse_agg(&value).map(EventPayload::AggSec),
        "AM" => parse_agg(&value).map(EventPayload::AggMin),
        _ => None,
    };

    match payload {
        Some(payload) => ParsedRecord::Event(Event {
            symbol,
            timestamp_ms,
            payload,
        }),
        None => ParsedRecord::Unknown,
    }
}

fn parse_trade(value: &Value) -> Option<TradePayload> {
    Some(TradePayload {
        price: value.get("p")?.as_f64()?,
        size: value.get("s")?.as_f64()?,
        exchange: value.get("x").and_then(Value::as_i64),
        conditions: value
            .get("c")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default(),
    })
}

fn parse_quote(value: &Value) -> Option<QuotePayload> {
    Some(QuotePayload {
        bid_price: value.get("bp")?.as_f64()?,
        bid_size: value.get("bs")?.as_f64()?,
        ask_price: value.get("ap")?.as_f64()?,
        ask_size: value.get("as")?.as_f64()?,
    })
}

fn parse_agg(value: &Value) -> Option<AggPayload> {
    Some(AggPayload {
        open: value.get("o")?.as_f64()?,
        high: value.get("h")?.as_f64()?,
        low: value.get("l")?.as_f64()?,
        close: value.get("c")?.as_f64()?,
        volume: value.get("v")?.as_f64()?,
        vwap: value.get("vw").and_then(Value::as_f64),
        trade_count: value.get("n").and_then(Value::as_i64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trade_record() {
        let frame = r#"[{"ev":"T","sym":"AAPL","p":150.25,"s":100,"t":1690000000000}]"#;
        let records = parse_frame(frame).unwrap();
        assert_eq!(records.len(), 1);
        match &records[0] {
            ParsedRecord::Event(e) => {
                assert_eq!(e.symbol, "AAPL");
                match &e.payload {
                    EventPayload::Trade(t) => assert_eq!(t.price, 150.25),
                    other => panic!("expected trade, got {:?}", other),
                }
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn distinguishes_second_and_minute_aggregates() {
        let frame = r#"[
            {"ev":"A","sym":"AAPL","o":1,"h":2,"l":0.5,"c":1.5,"v":1000,"t":1},
            {"ev":"AM","sym":"AAPL","o":1,"h":2,"l":0.5,"c":1.5,"v":1000,"t":1}
        ]"#;
        let records = parse_frame(frame).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            &records[0],
            ParsedRecord::Event(Event {
                payload: EventPayload::AggSec(_),
                ..
            })
        ));
        assert!(matches!(
            &records[1],
            ParsedRecord::Event(Event {
                payload: EventPayload::AggMin(_),
                ..
            })
        ));
    }

    #[test]
    fn parses_status_record() {
        let frame = r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#;
        let records = parse_frame(frame).unwrap();
        assert!(matches!(
            &records[0],
            ParsedRecord::Status { status, .. } if status == "auth_success"
        ));
    }

    #[test]
    fn unknown_tag_does_not_fail_the_whole_frame() {
        let frame = r#"[{"ev":"T","sym":"AAPL","p":1,"s":1,"t":1},{"ev":"bogus"}]"#;
        let records = parse_frame(frame).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[1], ParsedRecord::Unknown));
    }
}
