//! Calendar-day freshness window for issued tokens.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tokens are usable on the day they were issued and on the following day.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("max token age must be >= 0 days (got {0})")]
    NegativeAge(i64),
}

/// Decides whether a token is still usable from its issue time alone.
///
/// Both timestamps are reduced to their calendar date in a time zone before
/// they are compared, so a token issued at 23:59 is one day old at 00:01.
/// A token whose date lies after "today" (clock skew) is not fresh.
///
/// Stateless and `Copy`; share it freely across threads.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessWindow {
    max_age_days: i64,
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self {
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }
}

impl FreshnessWindow {
    pub fn new(max_age_days: i64) -> Result<Self, WindowError> {
        if max_age_days < 0 {
            return Err(WindowError::NegativeAge(max_age_days));
        }
        Ok(Self { max_age_days })
    }

    pub fn max_age_days(&self) -> i64 {
        self.max_age_days
    }

    /// Whole calendar days from `created_at`'s date to `now`'s date in `tz`.
    ///
    /// Negative when `created_at` falls on a later date than `now`.
    pub fn age_in_days<Tz: TimeZone>(tz: &Tz, created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        let issued_on = created_at.with_timezone(tz).date_naive();
        let today = now.with_timezone(tz).date_naive();
        today.signed_duration_since(issued_on).num_days()
    }

    /// Freshness check with calendar dates taken in `tz`.
    pub fn is_fresh_in<Tz: TimeZone>(&self, tz: &Tz, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = Self::age_in_days(tz, created_at, now);
        (0..=self.max_age_days).contains(&age)
    }

    /// Freshness check in the host's local time zone.
    pub fn is_fresh(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.is_fresh_in(&Local, created_at, now)
    }
}
