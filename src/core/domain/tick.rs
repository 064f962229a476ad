//! Normalized market event and vendor timestamp handling.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single normalized market-data event.
///
/// `symbol` is always the canonical token the provider is polling, never the
/// user's raw alias. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
}

/// Interpret a vendor timestamp field.
///
/// Integers above 1e12 are epoch milliseconds, smaller numbers epoch seconds;
/// strings are tried as ISO-8601. Anything unparseable collapses to now, the
/// same rule every provider uses.
pub fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    match value {
        Some(Value::Number(n)) => n.as_f64().map_or_else(Utc::now, from_epoch),
        Some(Value::String(s)) => from_iso8601(s),
        _ => Utc::now(),
    }
}

fn from_epoch(raw: f64) -> DateTime<Utc> {
    let secs = if raw > 1_000_000_000_000.0 {
        raw / 1000.0
    } else {
        raw
    };
    let nanos = (secs.fract() * 1e9) as u32;
    Utc.timestamp_opt(secs as i64, nanos)
        .single()
        .unwrap_or_else(Utc::now)
}

fn from_iso8601(raw: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    // Vendors also send offset-less local-exchange stamps; treat them as UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Utc.from_utc_datetime(&naive);
    }
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn millisecond_epochs_are_scaled_down() {
        let ts = parse_timestamp(Some(&json!(1_700_000_000_000_i64)));
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn second_epochs_pass_through() {
        let ts = parse_timestamp(Some(&json!(1_700_000_000_i64)));
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn iso8601_strings_parse_with_offset() {
        let ts = parse_timestamp(Some(&json!("2024-01-02T15:29:00+05:30")));
        assert_eq!(ts.timestamp(), 1_704_189_540);
    }

    #[test]
    fn offsetless_strings_are_treated_as_utc() {
        let ts = parse_timestamp(Some(&json!("2024-01-02T10:00:00")));
        assert_eq!(ts.timestamp(), 1_704_189_600);
    }

    #[test]
    fn garbage_falls_back_to_now() {
        let before = Utc::now();
        let ts = parse_timestamp(Some(&json!("not a timestamp")));
        assert!(ts >= before);
    }

    #[test]
    fn tick_serializes_timestamp_as_iso8601() {
        let tick = Tick {
            symbol: "MOCK".into(),
            price: 100.5,
            volume: 10.0,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            provider: "mock".into(),
        };
        let json = serde_json::to_value(&tick).unwrap();
        assert_eq!(json["timestamp"], json!("2023-11-14T22:13:20Z"));
        assert_eq!(json["provider"], json!("mock"));
    }
}
