//! Timestamp canonicalization.
//!
//! The remote sheet hands back moments in several encodings: epoch
//! milliseconds, epoch seconds, spreadsheet serial days, and display strings
//! in a handful of layouts. Everything is decoded once, at the store
//! boundary, into [`EpochMs`]. Comparisons elsewhere only ever see that scale.
//!
//! Decoding never fails loudly. Anything unrecognized becomes `None`, which
//! comparison sites read as `0` ("unknown, very old").

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;

/// Canonical timestamp: milliseconds since the Unix epoch, UTC.
pub type EpochMs = i64;

/// Numbers at or above this magnitude are already epoch milliseconds.
pub const EPOCH_MS_MAGNITUDE: f64 = 1e11;

/// Numbers at or above this magnitude (and below [`EPOCH_MS_MAGNITUDE`]) are epoch seconds.
pub const EPOCH_SECONDS_MAGNITUDE: f64 = 1e9;

/// Length of one serial day.
pub const MS_PER_DAY: f64 = 86_400_000.0;

/// Serial day number of 1970-01-01 in the spreadsheet calendar (day 0 = 1899-12-30).
pub const SERIAL_UNIX_EPOCH_DAY: f64 = 25_569.0;

const DATE_TIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

const TIME_LAYOUTS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// A temporal value as it arrived, tagged by the encoding it was recognized as.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    EpochMs(i64),
    EpochSeconds(f64),
    /// Fractional days since 1899-12-30, in the sheet's local time.
    SerialDay(f64),
    DisplayString(String),
}

impl RawTimestamp {
    /// Classify a bare number by magnitude.
    ///
    /// Returns `None` for NaN and infinities.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_number(n: f64) -> Option<Self> {
        if !n.is_finite() {
            return None;
        }
        let magnitude = n.abs();
        Some(if magnitude >= EPOCH_MS_MAGNITUDE {
            Self::EpochMs(n.round() as i64)
        } else if magnitude >= EPOCH_SECONDS_MAGNITUDE {
            Self::EpochSeconds(n)
        } else {
            Self::SerialDay(n)
        })
    }

    /// Classify a JSON value. Bare numeric strings are treated as numbers.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().and_then(Self::from_number),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse::<f64>() {
                    Ok(n) => Self::from_number(n),
                    Err(_) => Some(Self::DisplayString(trimmed.to_string())),
                }
            }
            _ => None,
        }
    }
}

/// The representations a record may offer for the same moment.
///
/// [`TimeCodec::resolve`] picks the first usable one in field order: an
/// explicit epoch field, then a structured date, then a number, then a string.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampSources<'a> {
    pub epoch_ms: Option<i64>,
    pub structured: Option<DateTime<Utc>>,
    pub numeric: Option<f64>,
    pub text: Option<&'a str>,
}

impl<'a> TimestampSources<'a> {
    /// Build sources from an explicit epoch field, a structured date, and a
    /// display value that may be either a number or a string.
    #[must_use]
    pub fn new(
        epoch_ms: Option<i64>,
        structured: Option<DateTime<Utc>>,
        display: Option<&'a Value>,
    ) -> Self {
        Self {
            epoch_ms,
            structured,
            numeric: display.and_then(Value::as_f64),
            text: display.and_then(Value::as_str),
        }
    }
}

/// Decoder from heterogeneous encodings to canonical epoch milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeCodec {
    /// Offset of the sheet's local time from UTC, east positive.
    tz_offset_minutes: i32,
}

impl TimeCodec {
    #[must_use]
    pub const fn new(tz_offset_minutes: i32) -> Self {
        Self { tz_offset_minutes }
    }

    #[must_use]
    pub const fn tz_offset_minutes(&self) -> i32 {
        self.tz_offset_minutes
    }

    fn offset_ms(&self) -> i64 {
        i64::from(self.tz_offset_minutes) * 60_000
    }

    /// Decode a tagged value.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode(&self, raw: &RawTimestamp) -> Option<EpochMs> {
        match raw {
            RawTimestamp::EpochMs(ms) => Some(*ms),
            RawTimestamp::EpochSeconds(secs) => Some((secs * 1000.0).round() as i64),
            RawTimestamp::SerialDay(days) => {
                let local_ms = ((days - SERIAL_UNIX_EPOCH_DAY) * MS_PER_DAY).round() as i64;
                Some(local_ms - self.offset_ms())
            }
            RawTimestamp::DisplayString(s) => self.parse_display(s),
        }
    }

    /// Decode any JSON value; `None` when it is not a recognizable moment.
    #[must_use]
    pub fn to_epoch_ms(&self, value: &Value) -> Option<EpochMs> {
        RawTimestamp::from_json(value).and_then(|raw| self.decode(&raw))
    }

    /// Decode a number by magnitude.
    #[must_use]
    pub fn from_number(&self, n: f64) -> Option<EpochMs> {
        RawTimestamp::from_number(n).and_then(|raw| self.decode(&raw))
    }

    /// Pick the canonical moment out of several representations.
    ///
    /// Once an explicit epoch field exists its value is taken as-is; the
    /// magnitude heuristics only run for the numeric and string fallbacks.
    #[must_use]
    pub fn resolve(&self, sources: TimestampSources<'_>) -> Option<EpochMs> {
        if let Some(ms) = sources.epoch_ms.filter(|ms| *ms > 0) {
            return Some(ms);
        }
        if let Some(dt) = sources.structured {
            return Some(dt.timestamp_millis());
        }
        if let Some(ms) = sources.numeric.and_then(|n| self.from_number(n)) {
            return Some(ms);
        }
        sources.text.and_then(|s| self.parse_display(s))
    }

    /// Parse a display string: full date-time, then date-only, then
    /// time-only, then a bare number.
    fn parse_display(&self, s: &str) -> Option<EpochMs> {
        let s = s.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.timestamp_millis());
        }

        for layout in DATE_TIME_LAYOUTS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
                return Some(self.local_to_epoch(naive));
            }
        }

        for layout in DATE_LAYOUTS {
            if let Ok(date) = NaiveDate::parse_from_str(s, layout) {
                return date.and_hms_opt(0, 0, 0).map(|dt| self.local_to_epoch(dt));
            }
        }

        // Spreadsheets anchor bare times to the serial epoch day.
        for layout in TIME_LAYOUTS {
            if let Ok(time) = NaiveTime::parse_from_str(s, layout) {
                let day = NaiveDate::from_ymd_opt(1899, 12, 30)?;
                return Some(self.local_to_epoch(day.and_time(time)));
            }
        }

        s.parse::<f64>().ok().and_then(|n| self.from_number(n))
    }

    fn local_to_epoch(&self, naive: NaiveDateTime) -> EpochMs {
        naive.and_utc().timestamp_millis() - self.offset_ms()
    }
}

/// Render a canonical timestamp for display (RFC 3339, UTC).
#[must_use]
pub fn format_epoch_ms(ms: EpochMs) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Source of "now" for freshness and write fences.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> EpochMs;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMs {
        Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: EpochMs) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, ms: EpochMs) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMs {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_magnitudes() {
        let codec = TimeCodec::default();
        assert_eq!(codec.to_epoch_ms(&json!(1_700_000_000_000_i64)), Some(1_700_000_000_000));
        assert_eq!(codec.to_epoch_ms(&json!(1_700_000_000)), Some(1_700_000_000_000));
        // 45000 days after 1899-12-30 is 2023-03-15
        assert_eq!(codec.to_epoch_ms(&json!(45_000)), Some(1_678_838_400_000));
    }

    #[test]
    fn test_serial_day_fraction_and_offset() {
        let utc = TimeCodec::default();
        assert_eq!(utc.to_epoch_ms(&json!(25_569.5)), Some(43_200_000));

        // Sheet in UTC+2: local noon on 1970-01-01 is 10:00 UTC
        let plus_two = TimeCodec::new(120);
        assert_eq!(plus_two.to_epoch_ms(&json!(25_569.5)), Some(36_000_000));
    }

    #[test]
    fn test_display_strings() {
        let codec = TimeCodec::default();
        assert_eq!(
            codec.to_epoch_ms(&json!("2024-01-02T03:04:05Z")),
            Some(1_704_164_645_000)
        );
        assert_eq!(
            codec.to_epoch_ms(&json!("2024-01-02 03:04:05")),
            Some(1_704_164_645_000)
        );
        assert_eq!(codec.to_epoch_ms(&json!("01/02/2024 03:04:05")), Some(1_704_164_645_000));
        assert_eq!(codec.to_epoch_ms(&json!("2024-01-02")), Some(1_704_153_600_000));
        assert_eq!(codec.to_epoch_ms(&json!("1700000000")), Some(1_700_000_000_000));
    }

    #[test]
    fn test_time_only_anchors_to_serial_epoch() {
        let codec = TimeCodec::default();
        let midnight = codec.to_epoch_ms(&json!("00:00")).unwrap();
        let noon = codec.to_epoch_ms(&json!("12:00:00")).unwrap();
        assert_eq!(noon - midnight, 43_200_000);
        assert_eq!(codec.to_epoch_ms(&json!(0)), Some(midnight));
    }

    #[test]
    fn test_malformed_is_none() {
        let codec = TimeCodec::default();
        assert_eq!(codec.to_epoch_ms(&json!("not a date")), None);
        assert_eq!(codec.to_epoch_ms(&json!("")), None);
        assert_eq!(codec.to_epoch_ms(&json!(null)), None);
        assert_eq!(codec.to_epoch_ms(&json!({"a": 1})), None);
    }

    #[test]
    fn test_resolve_precedence() {
        let codec = TimeCodec::default();
        let structured = DateTime::from_timestamp_millis(2_000).unwrap();
        let display = json!("2024-01-02");

        let all = TimestampSources::new(Some(1_000), Some(structured), Some(&display));
        assert_eq!(codec.resolve(all), Some(1_000));

        let no_epoch = TimestampSources::new(None, Some(structured), Some(&display));
        assert_eq!(codec.resolve(no_epoch), Some(2_000));

        let text_only = TimestampSources::new(None, None, Some(&display));
        assert_eq!(codec.resolve(text_only), Some(1_704_153_600_000));

        let numeric = json!(1_700_000_000);
        let numeric_only = TimestampSources::new(None, None, Some(&numeric));
        assert_eq!(codec.resolve(numeric_only), Some(1_700_000_000_000));

        assert_eq!(codec.resolve(TimestampSources::default()), None);
    }

    #[test]
    fn test_epoch_field_is_not_reclassified() {
        // A small explicit epoch value stays milliseconds; it is not read as serial days.
        let codec = TimeCodec::default();
        let sources = TimestampSources::new(Some(45_000), None, None);
        assert_eq!(codec.resolve(sources), Some(45_000));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_format_epoch_ms() {
        assert_eq!(format_epoch_ms(0), "1970-01-01T00:00:00.000Z");
    }
}
