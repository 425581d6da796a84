//! Value coercion applied to every outgoing statement parameter
//!
//! Change-data producers encode temporal columns as epoch numbers or ISO-8601
//! text. Before binding, values are normalised:
//!
//! | input | result |
//! |-------|--------|
//! | 64-bit integer with more than 13 digits | microsecond epoch, converted to a timestamp |
//! | 64-bit integer after 2000-01-01 in epoch millis | millisecond epoch timestamp |
//! | 32-bit integer between 2000 and 2100 in epoch seconds | second epoch timestamp |
//! | text starting `YYYY-MM-DDTHH:MM:SS` | timestamp parsed from the first 19 characters |
//!
//! Everything else passes through unchanged. Timestamps are produced in UTC.

use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use std::sync::LazyLock;
use streamshift_rdbc::{Row, Value};
use tracing::warn;

/// Largest 13-digit value; anything above is read as epoch microseconds
pub const MICROS_THRESHOLD: i64 = 9_999_999_999_999;

/// 2000-01-01T00:00:00Z in epoch milliseconds
pub const EPOCH_MILLIS_2000: i64 = 946_684_800_000;

/// 2000-01-01T00:00:00Z in epoch seconds
pub const EPOCH_SECONDS_2000: i64 = 946_684_800;

/// 2100-01-01T00:00:00Z in epoch seconds
pub const EPOCH_SECONDS_2100: i64 = 4_102_444_800;

const ISO_LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// `YYYY-MM-DDTHH:MM:SS` followed by anything
pub(crate) static ISO_DATETIME_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}")
        .expect("ISO date-time regex pattern is invalid - this is a bug")
});

/// Exactly `YYYY-MM-DD`
pub(crate) static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("ISO date regex pattern is invalid - this is a bug")
});

fn from_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}

fn coerce_int64(n: i64) -> Value {
    let converted = if n > MICROS_THRESHOLD {
        from_millis(n / 1000)
    } else if n > EPOCH_MILLIS_2000 {
        from_millis(n)
    } else {
        None
    };
    converted.map(Value::DateTime).unwrap_or(Value::Int64(n))
}

fn coerce_int32(n: i32) -> Value {
    let secs = i64::from(n);
    if secs > EPOCH_SECONDS_2000 && secs < EPOCH_SECONDS_2100 {
        if let Some(dt) = DateTime::from_timestamp(secs, 0) {
            return Value::DateTime(dt.naive_utc());
        }
    }
    Value::Int32(n)
}

fn coerce_text(s: &str) -> Value {
    let prefix = match s.get(..19) {
        Some(prefix) if ISO_DATETIME_PREFIX.is_match(s) => prefix,
        _ => return Value::String(s.to_string()),
    };
    match NaiveDateTime::parse_from_str(prefix, ISO_LOCAL_FORMAT) {
        Ok(dt) => Value::DateTime(dt),
        Err(e) => {
            warn!(value = %s, error = %e, "Failed to parse date-time text, binding it unchanged");
            Value::String(s.to_string())
        }
    }
}

/// Coerce a single value for binding
pub fn coerce_value(value: &Value) -> Value {
    match value {
        Value::Int64(n) => coerce_int64(*n),
        Value::Int32(n) => coerce_int32(*n),
        Value::String(s) => coerce_text(s),
        other => other.clone(),
    }
}

/// Coerce every value of a row, in column order
pub fn coerce_row(row: &Row) -> Vec<Value> {
    row.values().iter().map(coerce_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> Value {
        Value::DateTime(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, s)
                .unwrap(),
        )
    }

    #[test]
    fn test_millisecond_epoch() {
        assert_eq!(
            coerce_value(&Value::Int64(1_700_000_000_000)),
            ts(2023, 11, 14, 22, 13, 20)
        );
    }

    #[test]
    fn test_microsecond_epoch_matches_millisecond() {
        assert_eq!(
            coerce_value(&Value::Int64(1_700_000_000_000_000)),
            coerce_value(&Value::Int64(1_700_000_000_000))
        );
    }

    #[test]
    fn test_small_int64_passes_through() {
        assert_eq!(coerce_value(&Value::Int64(5_000_000_000)), Value::Int64(5_000_000_000));
        assert_eq!(
            coerce_value(&Value::Int64(EPOCH_MILLIS_2000)),
            Value::Int64(EPOCH_MILLIS_2000)
        );
        assert_eq!(coerce_value(&Value::Int64(-1_700_000_000_000_000)), Value::Int64(-1_700_000_000_000_000));
    }

    #[test]
    fn test_second_epoch_int32() {
        assert_eq!(
            coerce_value(&Value::Int32(1_700_000_000)),
            ts(2023, 11, 14, 22, 13, 20)
        );
        assert_eq!(coerce_value(&Value::Int32(100)), Value::Int32(100));
        assert_eq!(
            coerce_value(&Value::Int32(946_684_800)),
            Value::Int32(946_684_800)
        );
    }

    #[test]
    fn test_iso_text() {
        assert_eq!(
            coerce_value(&Value::from("2024-03-01T08:30:00.123Z")),
            ts(2024, 3, 1, 8, 30, 0)
        );
        assert_eq!(
            coerce_value(&Value::from("2024-03-01")),
            Value::from("2024-03-01")
        );
    }

    #[test]
    fn test_unparsable_iso_text_is_kept() {
        assert_eq!(
            coerce_value(&Value::from("2024-13-45T99:00:00")),
            Value::from("2024-13-45T99:00:00")
        );
    }

    #[test]
    fn test_non_ascii_digits_are_not_dates() {
        for text in [
            "2024-01-02T03:04:0\u{0665}",
            "\u{0662}\u{0660}\u{0662}\u{0664}-01-02T03:04:05",
            "2024-01-0\u{0662}",
        ] {
            assert!(!ISO_DATETIME_PREFIX.is_match(text), "{text}");
            assert_eq!(coerce_value(&Value::from(text)), Value::from(text));
        }
        assert!(!ISO_DATE.is_match("2024-01-0\u{0662}"));
    }

    #[test]
    fn test_other_values_pass_through() {
        assert_eq!(coerce_value(&Value::Null), Value::Null);
        assert_eq!(coerce_value(&Value::Bool(true)), Value::Bool(true));
        assert_eq!(coerce_value(&Value::Float64(1.7e12)), Value::Float64(1.7e12));
        assert_eq!(coerce_value(&Value::from("hello")), Value::from("hello"));
    }
}
