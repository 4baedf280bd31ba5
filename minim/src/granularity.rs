//! Bucket granularities.
//!
//! A [`Granularity`] names the width of a counter bucket. Minute and hour
//! buckets are fixed-width truncations of unix time; day buckets start at
//! midnight of the store's [`Calendar`](crate::calendar::Calendar) and are not
//! necessarily 86 400 seconds long.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ArgumentError, MinimError};

/// Width of a counter bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One-minute buckets.
    Minute,
    /// One-hour buckets.
    Hour,
    /// Calendar-day buckets, starting at local midnight.
    Day,
}

impl Granularity {
    /// All granularities, finest first. Every recorded occurrence increments
    /// one bucket of each.
    pub const ALL: [Granularity; 3] = [Granularity::Minute, Granularity::Hour, Granularity::Day];

    /// Lowercase name, as used in snapshots and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    /// Bucket width in seconds for fixed-width granularities.
    ///
    /// Returns `None` for [`Granularity::Day`], whose length depends on the
    /// calendar (DST days are 23 or 25 hours long).
    pub fn fixed_width_secs(self) -> Option<i64> {
        match self {
            Self::Minute => Some(60),
            Self::Hour => Some(3600),
            Self::Day => None,
        }
    }

    /// Number of buckets returned by a window request that does not name a
    /// length: an hour of minutes, two days of hours, a month of days.
    pub fn default_window_length(self) -> usize {
        match self {
            Self::Minute => 60,
            Self::Hour => 48,
            Self::Day => 30,
        }
    }

    /// `strftime` pattern used to label a bucket start.
    pub fn label_format(self) -> &'static str {
        match self {
            Self::Minute => "%Y-%m-%d %H:%M:00",
            Self::Hour => "%Y-%m-%d %H:00:00",
            Self::Day => "%Y-%m-%d",
        }
    }

    /// Dense index used to lay out per-granularity tables.
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Minute => 0,
            Self::Hour => 1,
            Self::Day => 2,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = MinimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" | "minutes" | "minutely" | "m" => Ok(Self::Minute),
            "hour" | "hours" | "hourly" | "h" => Ok(Self::Hour),
            "day" | "days" | "daily" | "d" => Ok(Self::Day),
            _ => Err(ArgumentError::UnknownGranularity {
                value: s.to_string(),
            }
            .into()),
        }
    }
}
