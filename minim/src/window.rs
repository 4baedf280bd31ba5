//! Dense window reads over sparse counters.
//!
//! Counter storage is sparse: a bucket exists only once something has been
//! recorded in it. Callers asking for "the last N minutes" want exactly N
//! points regardless. This module computes the N bucket starts anchored at
//! "now", fetches the sparse rows covering them with a single range query,
//! and fills every missing bucket with zero.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! # use minim::{Store, StoreConfig, Granularity};
//! # let store = Store::open("./data", StoreConfig::default())?;
//! let window = store.window("signup", Granularity::Minute, 60)?;
//! assert_eq!(window.len(), 60);
//! for point in window.points() {
//!     println!("{} {}", point.bucket_start, point.count);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::error::{ArgumentError, Result};
use crate::granularity::Granularity;

/// Largest window a single request may ask for.
pub const MAX_WINDOW_LENGTH: usize = 100_000;

/// One bucket of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPoint {
    /// Bucket start, unix seconds.
    pub bucket_start: i64,
    /// Occurrences in the bucket; zero if nothing was recorded.
    pub count: u64,
}

/// A fixed-length, zero-filled, most-recent-first run of buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    event: String,
    granularity: Granularity,
    points: Vec<WindowPoint>,
}

impl Window {
    /// Creates a window from points that are already ordered most-recent-first.
    pub fn new(event: String, granularity: Granularity, points: Vec<WindowPoint>) -> Self {
        Self {
            event,
            granularity,
            points,
        }
    }

    /// The event this window was read for.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// The bucket width of every point.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Points, most recent first.
    pub fn points(&self) -> &[WindowPoint] {
        &self.points
    }

    /// Number of points; always the requested length.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always `false` for windows returned by the store, since lengths start at 1.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sum of all counts in the window.
    pub fn total(&self) -> u64 {
        self.points.iter().fold(0u64, |sum, p| sum.saturating_add(p.count))
    }

    /// Renders every point as `(label, count)` in `calendar`.
    ///
    /// # Errors
    ///
    /// Returns an error if a bucket start cannot be formatted.
    pub fn labeled(&self, calendar: Calendar) -> Result<Vec<(String, u64)>> {
        self.points
            .iter()
            .map(|p| Ok((calendar.label(self.granularity, p.bucket_start)?, p.count)))
            .collect()
    }

    /// Consumes the window and returns its points.
    pub fn into_points(self) -> Vec<WindowPoint> {
        self.points
    }
}

impl IntoIterator for Window {
    type Item = WindowPoint;
    type IntoIter = std::vec::IntoIter<WindowPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

/// Rejects window lengths outside `1..=MAX_WINDOW_LENGTH`.
///
/// # Errors
///
/// Returns [`ArgumentError::InvalidWindowLength`].
pub fn validate_length(length: usize) -> Result<()> {
    if length == 0 || length > MAX_WINDOW_LENGTH {
        return Err(ArgumentError::InvalidWindowLength {
            length,
            max: MAX_WINDOW_LENGTH,
        }
        .into());
    }
    Ok(())
}

/// Returns the `length` bucket starts ending at the bucket containing `now`,
/// most recent first.
///
/// # Errors
///
/// - [`ArgumentError::InvalidWindowLength`] if `length` is out of range
/// - [`ArgumentError::TimestampOutOfRange`] if a bucket start is not
///   representable
pub fn bucket_starts(
    calendar: Calendar,
    granularity: Granularity,
    length: usize,
    now: i64,
) -> Result<Vec<i64>> {
    validate_length(length)?;

    let current = calendar.bucket_start(granularity, now)?;
    (0..length)
        .map(|i| calendar.step_back(granularity, current, i))
        .collect()
}

/// Pairs every bucket start with its count in `sparse`, or zero.
pub fn densify(starts: &[i64], sparse: &BTreeMap<i64, u64>) -> Vec<WindowPoint> {
    starts
        .iter()
        .map(|&bucket_start| WindowPoint {
            bucket_start,
            count: sparse.get(&bucket_start).copied().unwrap_or(0),
        })
        .collect()
}

/// Inclusive `(oldest, newest)` range covering `starts`.
///
/// `starts` is most-recent-first, so the oldest bucket is the last one.
pub(crate) fn covering_range(starts: &[i64]) -> Option<(i64, i64)> {
    Some((*starts.last()?, *starts.first()?))
}
