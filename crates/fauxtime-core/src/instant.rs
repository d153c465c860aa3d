//! Millisecond-resolution wall-clock instants.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::CoreError;

/// A point in time as whole milliseconds since the UNIX epoch (UTC).
///
/// Negative values are instants before 1970. Only values chrono can render as
/// a calendar date are accepted by [`Timestamp::parse`]; arithmetic saturates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

const NAIVE_FORMATS: [&str; 4] =
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"];

impl Timestamp {
    /// The epoch itself.
    pub const EPOCH: Self = Self(0);

    /// Wrap a raw epoch-millisecond count.
    #[must_use]
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// Raw epoch-millisecond count.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Parse user input into an instant.
    ///
    /// Accepted forms, tried in order:
    /// - RFC 3339 with an explicit offset (`2023-12-25T10:30:00.000Z`)
    /// - naive date-time (`2023-12-25T10:30`, `2023-12-25 10:30:00`), read as UTC
    /// - date only (`2023-12-25`), UTC midnight
    /// - year and month (`2024-03`) or a bare year (`2024`), first day at UTC midnight
    /// - any other integer, as a count of epoch milliseconds
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let s = input.trim();
        let invalid = || CoreError::InvalidTimestamp { input: input.to_string() };
        if s.is_empty() {
            return Err(invalid());
        }
        let ms = if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            dt.timestamp_millis()
        } else if let Some(naive) =
            NAIVE_FORMATS.iter().find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        {
            naive.and_utc().timestamp_millis()
        } else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?.and_utc().timestamp_millis()
        } else if let Some(date) = partial_date(s) {
            date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?.and_utc().timestamp_millis()
        } else {
            s.parse::<i64>().map_err(|_| invalid())?
        };
        let ts = Self(ms);
        ts.to_datetime().map(|_| ts).ok_or_else(invalid)
    }

    /// Calendar view of this instant, if chrono can represent it.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Build from a chrono date-time, truncating to milliseconds.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    /// `self + ms`, saturating at the representable bounds.
    #[must_use]
    pub const fn saturating_add_millis(self, ms: i64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    /// Signed milliseconds from `earlier` to `self`.
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Canonical text form: `YYYY-MM-DDTHH:MM:SS.mmmZ`.
    ///
    /// Instants outside chrono's calendar range fall back to the raw millisecond count.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        match self.to_datetime() {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            None => self.0.to_string(),
        }
    }
}

// Up to four unsigned digits is a year, never a millisecond count.
fn partial_date(s: &str) -> Option<NaiveDate> {
    let digits = |p: &str, max: usize| !p.is_empty() && p.len() <= max && p.bytes().all(|b| b.is_ascii_digit());
    match s.split_once('-') {
        None if digits(s, 4) => NaiveDate::from_ymd_opt(s.parse().ok()?, 1, 1),
        Some((y, m)) if y.len() == 4 && digits(y, 4) && m.len() == 2 && digits(m, 2) => {
            NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, 1)
        }
        _ => None,
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an ISO-8601 date/time string or epoch milliseconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
        Timestamp::parse(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
        Ok(Timestamp(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
        i64::try_from(v).map(Timestamp).map_err(|_| E::custom("epoch millis out of range"))
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }
}
