//! The calendar-formatting facade.
//!
//! `format(None)` formats the realm's current instant; `format(Some(date))` formats
//! exactly that date and never consults the active provider.

use chrono::format::{Item, StrftimeItems};
use chrono::FixedOffset;
use std::fmt::Write;
use std::sync::Arc;

use crate::date::DateValue;
use crate::provider::Realm;
use crate::EngineError;

/// Formatter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// `strftime`-style pattern.
    pub pattern: String,
    /// Offset east of UTC, in seconds.
    pub utc_offset_secs: i32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self { pattern: "%Y-%m-%d %H:%M:%S".to_string(), utc_offset_secs: 0 }
    }
}

/// A formatter bound to a realm.
#[derive(Clone)]
pub struct DateTimeFormat {
    realm: Arc<Realm>,
    pattern: String,
    offset: FixedOffset,
}

impl DateTimeFormat {
    /// Validate `options` and bind them to `realm`.
    pub fn new(realm: Arc<Realm>, options: FormatOptions) -> Result<Self, EngineError> {
        if StrftimeItems::new(&options.pattern).any(|item| matches!(item, Item::Error)) {
            return Err(EngineError::InvalidPattern(options.pattern));
        }
        let offset = FixedOffset::east_opt(options.utc_offset_secs)
            .ok_or_else(|| EngineError::InvalidPattern(format!("offset {}", options.utc_offset_secs)))?;
        Ok(Self { realm, pattern: options.pattern, offset })
    }

    /// Format `date`, or the current (possibly virtual) instant when `None`.
    pub fn format(&self, date: Option<&DateValue>) -> Result<String, EngineError> {
        let at = match date {
            Some(d) => d.as_datetime(),
            None => self
                .realm
                .now()
                .to_datetime()
                .ok_or_else(|| EngineError::InvalidDate("current instant out of range".into()))?,
        };
        let mut out = String::new();
        write!(out, "{}", at.with_timezone(&self.offset).format(&self.pattern))
            .map_err(|_| EngineError::InvalidPattern(self.pattern.clone()))?;
        Ok(out)
    }

    pub fn resolved_offset(&self) -> FixedOffset {
        self.offset
    }
}
