//! Shared utility functions used across multiple modules.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current UTC time rendered the way payload timestamps are written.
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render Unix milliseconds as a payload timestamp, e.g.
/// `2024-05-01T12:00:00.250Z`.
pub fn rfc3339_from_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map_or_else(rfc3339_now, |at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Parse a payload timestamp.
///
/// Accepts RFC 3339 strings and integer Unix milliseconds. Anything else
/// yields `None`.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc)),
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" https://example.com ".to_string())),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn is_http_url_accepts_valid_schemes() {
        assert!(is_http_url("http://localhost"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn parse_timestamp_accepts_rfc3339_and_millis() {
        let from_text = parse_timestamp(&Value::from("2024-05-01T10:00:00.000Z")).unwrap();
        let from_millis = parse_timestamp(&Value::from(from_text.timestamp_millis())).unwrap();
        assert_eq!(from_text, from_millis);

        let offset = parse_timestamp(&Value::from("2024-05-01T12:00:00+02:00")).unwrap();
        assert_eq!(offset, from_text);
    }

    #[test]
    fn parse_timestamp_rejects_other_shapes() {
        assert!(parse_timestamp(&Value::from("yesterday")).is_none());
        assert!(parse_timestamp(&Value::Bool(true)).is_none());
        assert!(parse_timestamp(&Value::Null).is_none());
    }

    #[test]
    fn rfc3339_now_round_trips() {
        let now = rfc3339_now();
        assert!(parse_timestamp(&Value::from(now)).is_some());
    }
}
