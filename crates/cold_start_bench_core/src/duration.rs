//! Duration parsing, display and serde helpers.
//!
//! Configuration files use compact unit sequences (`15m`, `1h30m`, `250ms`),
//! persisted readings store exact nanoseconds, and both report renderers share
//! [`format_duration`] so the same value always prints the same way.

use std::time::Duration;

/// Parse a compact duration such as `90s`, `1h30m`, `1.5s` or `250ms`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text.is_empty() {
        return Err("duration cannot be empty".to_string());
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0f64;
    let mut chars = text.chars().peekable();
    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(&ch) = chars.peek() {
            if ch.is_ascii_digit() || ch == '.' {
                number.push(ch);
                chars.next();
            } else {
                break;
            }
        }

        let mut unit = String::new();
        while let Some(&ch) = chars.peek() {
            if ch.is_ascii_alphabetic() || ch == 'µ' {
                unit.push(ch);
                chars.next();
            } else {
                break;
            }
        }

        if number.is_empty() {
            return Err(format!("invalid duration '{text}': expected a number"));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration '{text}': bad number '{number}'"))?;
        let unit_nanos = match unit.as_str() {
            "h" => 3_600e9,
            "m" => 60e9,
            "s" => 1e9,
            "ms" => 1e6,
            "us" | "µs" => 1e3,
            "ns" => 1.0,
            "" => return Err(format!("invalid duration '{text}': missing unit")),
            other => return Err(format!("invalid duration '{text}': unknown unit '{other}'")),
        };
        total_nanos += value * unit_nanos;
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Compact form used when echoing configuration (`15m`, `1m30s`, `250ms`).
pub fn format_compact(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let mut remaining = duration.as_millis();
    let hours = remaining / 3_600_000;
    remaining %= 3_600_000;
    let minutes = remaining / 60_000;
    remaining %= 60_000;
    let seconds = remaining / 1_000;
    let millis = remaining % 1_000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 {
        out.push_str(&format!("{seconds}s"));
    }
    if millis > 0 {
        out.push_str(&format!("{millis}ms"));
    }
    if out.is_empty() {
        out.push_str(&format!("{}ns", duration.as_nanos()));
    }
    out
}

/// Table display shared by the JSON and Markdown reports.
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "-".to_string();
    }
    if duration < Duration::from_millis(1) {
        return format!("{:.2}µs", duration.as_secs_f64() * 1e6);
    }
    if duration < Duration::from_secs(1) {
        return format!("{:.1}ms", duration.as_secs_f64() * 1e3);
    }
    format!("{:.2}s", duration.as_secs_f64())
}

/// Signed delta display: `+1.2s`, `-30.0ms`, or `-` when equal.
pub fn format_delta(nanos: i128) -> String {
    match nanos.cmp(&0) {
        std::cmp::Ordering::Equal => "-".to_string(),
        std::cmp::Ordering::Greater => {
            format!("+{}", format_duration(Duration::from_nanos(nanos as u64)))
        }
        std::cmp::Ordering::Less => {
            format!("-{}", format_duration(Duration::from_nanos((-nanos) as u64)))
        }
    }
}

pub fn to_millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1e6
}

pub fn from_millis(millis: f64) -> Duration {
    if millis <= 0.0 || !millis.is_finite() {
        return Duration::ZERO;
    }
    Duration::from_nanos((millis * 1e6).round() as u64)
}

/// Serialize a `Duration` as integer nanoseconds.
pub mod nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}

pub mod option_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::nanos::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_nanos))
    }
}

/// Serialize a `Duration` as a compact human string (`15m`) and accept the
/// same grammar as [`parse_duration`] on the way in.
pub mod compact {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_compact(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_duration(&text).map_err(D::Error::custom)
    }
}
