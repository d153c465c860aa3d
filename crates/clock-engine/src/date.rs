//! The date constructor facade.
//!
//! Only the zero-argument path ([`DateArgs::Now`]) and the static [`DateConstructor::now`]
//! read the realm's active provider. Every explicit form, plus [`DateConstructor::parse`]
//! and [`DateConstructor::utc`], goes through the genuine computation unchanged.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use fauxtime_core::Timestamp;
use std::sync::Arc;

use crate::provider::Realm;
use crate::EngineError;

/// Explicit calendar fields, interpreted in UTC. `month` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateFields {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millisecond: u32,
}

impl DateFields {
    /// Midnight UTC of the given day.
    pub const fn ymd(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day, hour: 0, minute: 0, second: 0, millisecond: 0 }
    }

    fn to_timestamp(self) -> Result<Timestamp, EngineError> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .and_then(|d| d.and_hms_milli_opt(self.hour, self.minute, self.second, self.millisecond))
            .map(|naive| Timestamp::from_datetime(naive.and_utc()))
            .ok_or_else(|| EngineError::InvalidDate(format!("{self:?}")))
    }
}

/// Argument forms accepted by [`DateConstructor::construct`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateArgs {
    /// No arguments: "the current time".
    Now,
    /// Epoch milliseconds.
    Millis(i64),
    /// Date/time text.
    Text(String),
    /// Explicit calendar fields.
    Fields(DateFields),
}

/// A constructed date. Identical in type and behavior whether it came from the
/// virtual or the genuine clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateValue {
    at: DateTime<Utc>,
}

impl DateValue {
    fn from_timestamp(ts: Timestamp) -> Result<Self, EngineError> {
        ts.to_datetime()
            .map(|at| Self { at })
            .ok_or_else(|| EngineError::InvalidDate(format!("{} ms out of range", ts.as_millis())))
    }

    /// Epoch milliseconds.
    pub fn time(&self) -> i64 {
        self.at.timestamp_millis()
    }

    pub fn timestamp(&self) -> Timestamp {
        Timestamp::from_datetime(self.at)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.at
    }

    /// `YYYY-MM-DDTHH:MM:SS.mmmZ`.
    pub fn to_iso_string(&self) -> String {
        self.at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Handle on a realm's date constructor. Cheap to clone; reads the realm's active
/// provider at call time.
#[derive(Clone)]
pub struct DateConstructor {
    realm: Arc<Realm>,
}

impl DateConstructor {
    pub fn new(realm: Arc<Realm>) -> Self {
        Self { realm }
    }

    /// Construct a date. Only [`DateArgs::Now`] is virtualized.
    pub fn construct(&self, args: DateArgs) -> Result<DateValue, EngineError> {
        match args {
            DateArgs::Now => DateValue::from_timestamp(self.realm.now()),
            DateArgs::Millis(ms) => DateValue::from_timestamp(Timestamp::from_millis(ms)),
            DateArgs::Text(text) => Self::parse_text(&text).and_then(DateValue::from_timestamp),
            DateArgs::Fields(fields) => fields.to_timestamp().and_then(DateValue::from_timestamp),
        }
    }

    /// Zero-argument construction.
    pub fn current(&self) -> Result<DateValue, EngineError> {
        self.construct(DateArgs::Now)
    }

    /// Static "now": epoch milliseconds of the current (possibly virtual) instant.
    pub fn now(&self) -> i64 {
        self.realm.now().as_millis()
    }

    /// Static parse: never virtualized.
    pub fn parse(&self, text: &str) -> Result<i64, EngineError> {
        Self::parse_text(text).map(Timestamp::as_millis)
    }

    /// Static UTC field constructor: never virtualized.
    pub fn utc(&self, fields: DateFields) -> Result<i64, EngineError> {
        fields.to_timestamp().map(Timestamp::as_millis)
    }

    fn parse_text(text: &str) -> Result<Timestamp, EngineError> {
        Timestamp::parse(text).map_err(|e| EngineError::InvalidDate(e.to_string()))
    }
}
