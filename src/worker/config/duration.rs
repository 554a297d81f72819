//! Duration and body-size string parsing.
//!
//! Manifest values arrive as either a bare integer (seconds, or bytes for
//! sizes) or a short human string (`"45"`, `"1m"`, `"2h"`, `"5mb"`). None of
//! the pack's crates accept exactly this grammar, so it's hand-rolled here;
//! once a duration is normalized to milliseconds we hand it to
//! `std::time::Duration` the same way `humantime` does elsewhere in the pack.

use std::time::Duration;

/// Parse a manifest duration value (already split out of JSON/YAML as either
/// an integer or a string) into milliseconds. Integers are seconds; strings
/// are either a bare number of seconds or a `humantime`-style `"5m"`/`"2h"`.
pub fn parse_duration_ms(raw: &RawDuration) -> Result<i64, String> {
    match raw {
        RawDuration::Seconds(secs) => Ok(secs * 1000),
        RawDuration::Text(text) => parse_duration_text(text),
    }
}

fn parse_duration_text(text: &str) -> Result<i64, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("duration string must not be empty".to_string());
    }
    if let Some(stripped) = text.strip_prefix('-') {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            let secs: i64 = stripped
                .parse()
                .map_err(|_| format!("invalid duration {text:?}"))?;
            return Ok(-secs * 1000);
        }
    }
    if text.chars().all(|c| c.is_ascii_digit()) {
        let secs: i64 = text
            .parse()
            .map_err(|_| format!("invalid duration {text:?}"))?;
        return Ok(secs * 1000);
    }
    let parsed = humantime::parse_duration(text).map_err(|e| format!("invalid duration {text:?}: {e}"))?;
    Ok(parsed.as_millis() as i64)
}

/// Clamp a (possibly negative) millisecond value into a `Duration`, treating
/// negative as zero; callers validate sign separately where negative is an
/// error rather than a clamp.
pub fn millis_to_duration(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

/// Parse a manifest body-size value into bytes. Integers are bytes; strings
/// carry a `kb`/`mb`/`gb` suffix (case-insensitive, trailing `b` optional),
/// base 1024.
pub fn parse_size_bytes(raw: &RawSize) -> Result<u64, String> {
    match raw {
        RawSize::Bytes(n) => Ok(*n),
        RawSize::Text(text) => parse_size_text(text),
    }
}

fn parse_size_text(text: &str) -> Result<u64, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("size string must not be empty".to_string());
    }
    let lower = text.to_ascii_lowercase();
    const UNITS: &[(&str, u64)] = &[
        ("gb", 1024 * 1024 * 1024),
        ("g", 1024 * 1024 * 1024),
        ("mb", 1024 * 1024),
        ("m", 1024 * 1024),
        ("kb", 1024),
        ("k", 1024),
        ("b", 1),
    ];
    for (suffix, multiplier) in UNITS {
        if let Some(number) = lower.strip_suffix(suffix) {
            let number = number.trim();
            if number.is_empty() {
                continue;
            }
            let value: f64 = number
                .parse()
                .map_err(|_| format!("invalid size {text:?}"))?;
            if value < 0.0 {
                return Err(format!("size must not be negative: {text:?}"));
            }
            return Ok((value * *multiplier as f64) as u64);
        }
    }
    lower.parse().map_err(|_| format!("invalid size {text:?}"))
}

/// Raw duration shape as it deserializes from YAML/JSON: a bare integer
/// (seconds) or a string (`"45"`, `"1m"`, `"2h"`).
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawDuration {
    Seconds(i64),
    Text(String),
}

/// Raw size shape: a bare integer (bytes) or a suffixed string (`"5mb"`).
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawSize {
    Bytes(u64),
    Text(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_integer_seconds() {
        assert_eq!(parse_duration_ms(&RawDuration::Seconds(45)).unwrap(), 45_000);
    }

    #[test]
    fn bare_digit_string_is_seconds() {
        assert_eq!(
            parse_duration_ms(&RawDuration::Text("45".to_string())).unwrap(),
            45_000
        );
    }

    #[test]
    fn suffixed_minutes_and_hours() {
        assert_eq!(
            parse_duration_ms(&RawDuration::Text("1m".to_string())).unwrap(),
            60_000
        );
        assert_eq!(
            parse_duration_ms(&RawDuration::Text("2h".to_string())).unwrap(),
            2 * 60 * 60 * 1000
        );
    }

    #[test]
    fn negative_integer_seconds_round_trips_negative() {
        assert_eq!(parse_duration_ms(&RawDuration::Seconds(-5)).unwrap(), -5_000);
    }

    #[test]
    fn size_bare_bytes() {
        assert_eq!(parse_size_bytes(&RawSize::Bytes(1024)).unwrap(), 1024);
    }

    #[test]
    fn size_suffix_mb() {
        assert_eq!(
            parse_size_bytes(&RawSize::Text("5mb".to_string())).unwrap(),
            5 * 1024 * 1024
        );
    }

    #[test]
    fn size_suffix_is_case_insensitive() {
        assert_eq!(
            parse_size_bytes(&RawSize::Text("2GB".to_string())).unwrap(),
            2 * 1024 * 1024 * 1024
        );
    }

    #[test]
    fn size_rejects_garbage() {
        assert!(parse_size_bytes(&RawSize::Text("banana".to_string())).is_err());
    }
}
