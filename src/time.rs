//! Millisecond wall-clock timestamps, shared by every module that stamps an
//! outbound message or an activity counter.

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
