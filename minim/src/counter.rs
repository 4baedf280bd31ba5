//! Time-bucketed counters.
//!
//! [`CounterStore`] owns every counter bucket. Buckets are keyed by
//! (event, granularity, bucket start); each (event, granularity) pair has its
//! own table guarded by its own mutex, so increments to different events or
//! granularities never contend, and an increment is a single
//! lock-upsert-unlock with no window for lost updates.
//!
//! # Layout
//!
//! ```text
//! CounterStore
//! └── RwLock<HashMap<event, Arc<EventCounters>>>
//!     └── EventCounters
//!         ├── minute: Mutex<BTreeMap<bucket_start, count>>
//!         ├── hour:   Mutex<BTreeMap<bucket_start, count>>
//!         └── day:    Mutex<BTreeMap<bucket_start, count>>
//! ```
//!
//! The outer map is write-locked only when an event is provisioned; the hot
//! path takes a read lock, clones the event's `Arc` and releases it before
//! touching a table.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::error::{ArgumentError, MinimError, Result};
use crate::granularity::Granularity;
use crate::registry::EventRegistry;
use crate::snapshot;

/// One persisted counter bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRow {
    /// Event name.
    pub event: String,
    /// Bucket width.
    pub granularity: Granularity,
    /// Bucket start, unix seconds.
    pub bucket_start: i64,
    /// Occurrences recorded in the bucket.
    pub count: u64,
}

type Table = Mutex<BTreeMap<i64, u64>>;

/// The three tables of one event, indexed by [`Granularity::index`].
#[derive(Debug, Default)]
struct EventCounters {
    tables: [Table; 3],
}

impl EventCounters {
    fn table(&self, granularity: Granularity) -> &Table {
        &self.tables[granularity.index()]
    }
}

/// Serializable representation of all counters.
#[derive(Debug, Serialize, Deserialize)]
struct CounterSnapshot {
    version: u32,
    rows: Vec<CounterRow>,
}

/// Increment/query primitive over (event, granularity, bucket start).
///
/// An event must be [provisioned](CounterStore::provision) before it can be
/// written or read; operations on unprovisioned events fail with
/// [`MinimError::UnknownEvent`].
#[derive(Debug, Default)]
pub struct CounterStore {
    calendar: Calendar,
    events: RwLock<HashMap<String, Arc<EventCounters>>>,
}

impl CounterStore {
    /// Creates an empty counter store bucketing days in `calendar`.
    pub fn new(calendar: Calendar) -> Self {
        Self {
            calendar,
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the calendar used for bucket truncation.
    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    /// Creates the minute, hour and day tables for `event`.
    ///
    /// Returns `true` if the tables were created, `false` if they already
    /// existed. Existing counts are never reset.
    pub fn provision(&self, event: &str) -> bool {
        let mut events = self.events.write();
        if events.contains_key(event) {
            return false;
        }
        events.insert(event.to_string(), Arc::default());
        true
    }

    /// Returns whether `event` has been provisioned.
    pub fn is_provisioned(&self, event: &str) -> bool {
        self.events.read().contains_key(event)
    }

    /// Adds one occurrence at `at` to the `granularity` bucket containing it.
    ///
    /// Creates the bucket with count 1 if it does not exist. Returns the
    /// bucket's new count.
    ///
    /// # Errors
    ///
    /// - [`MinimError::UnknownEvent`] if `event` is not provisioned
    /// - [`MinimError::InvalidArgument`] if `at` cannot be bucketed
    pub fn increment(&self, event: &str, granularity: Granularity, at: i64) -> Result<u64> {
        let bucket_start = self.calendar.bucket_start(granularity, at)?;
        let counters = self.counters(event)?;

        let mut table = counters.table(granularity).lock();
        let count = table.entry(bucket_start).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }

    /// Returns every bucket of `event` at `granularity` whose start lies in
    /// `from..=to`.
    ///
    /// An empty map means no bucket in range has been incremented.
    ///
    /// # Errors
    ///
    /// - [`MinimError::UnknownEvent`] if `event` is not provisioned
    /// - [`ArgumentError::InvalidTimeRange`] if `from > to`
    pub fn query(
        &self,
        event: &str,
        granularity: Granularity,
        from: i64,
        to: i64,
    ) -> Result<BTreeMap<i64, u64>> {
        if from > to {
            return Err(ArgumentError::InvalidTimeRange { from, to }.into());
        }

        let counters = self.counters(event)?;
        let table = counters.table(granularity).lock();
        Ok(table.range(from..=to).map(|(&start, &count)| (start, count)).collect())
    }

    /// Deletes every bucket of `event` at `granularity` starting before
    /// `cutoff`. Returns how many buckets were removed.
    ///
    /// # Errors
    ///
    /// Returns [`MinimError::UnknownEvent`] if `event` is not provisioned.
    pub fn remove_before(&self, event: &str, granularity: Granularity, cutoff: i64) -> Result<usize> {
        let counters = self.counters(event)?;
        let mut table = counters.table(granularity).lock();

        let kept = table.split_off(&cutoff);
        let removed = table.len();
        *table = kept;
        Ok(removed)
    }

    /// Returns how many buckets `event` currently holds at `granularity`.
    ///
    /// # Errors
    ///
    /// Returns [`MinimError::UnknownEvent`] if `event` is not provisioned.
    pub fn bucket_count(&self, event: &str, granularity: Granularity) -> Result<usize> {
        let counters = self.counters(event)?;
        let count = counters.table(granularity).lock().len();
        Ok(count)
    }

    /// Returns every bucket as a row, ordered by event name, granularity and
    /// bucket start.
    ///
    /// Tables are locked one at a time, so rows from different tables may
    /// reflect slightly different instants.
    pub fn rows(&self) -> Vec<CounterRow> {
        let mut events: Vec<(String, Arc<EventCounters>)> = self
            .events
            .read()
            .iter()
            .map(|(name, counters)| (name.clone(), Arc::clone(counters)))
            .collect();
        events.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rows = Vec::new();
        for (event, counters) in &events {
            for granularity in Granularity::ALL {
                let table = counters.table(granularity).lock();
                rows.extend(table.iter().map(|(&bucket_start, &count)| CounterRow {
                    event: event.clone(),
                    granularity,
                    bucket_start,
                    count,
                }));
            }
        }
        rows
    }

    /// Saves all counters to `path` as JSON.
    ///
    /// # Errors
    ///
    /// Returns a storage error if serialization or writing fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let snapshot = CounterSnapshot {
            version: snapshot::SNAPSHOT_VERSION,
            rows: self.rows(),
        };
        snapshot::write_atomic(path.as_ref(), &snapshot)
    }

    /// Loads counters written by [`CounterStore::save`].
    ///
    /// Every event in `registry` is provisioned, whether or not it has rows.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be read or parsed, or if a
    /// row names an unregistered event, repeats a bucket key, or has a
    /// bucket start that is not a boundary of its granularity in `calendar`.
    pub fn load<P: AsRef<Path>>(path: P, calendar: Calendar, registry: &EventRegistry) -> Result<Self> {
        let path = path.as_ref();
        let snapshot: CounterSnapshot = snapshot::read(path)?;
        snapshot::check_version(path, snapshot.version)?;

        let store = Self::new(calendar);
        for definition in registry.list() {
            store.provision(&definition.name);
        }

        for row in snapshot.rows {
            let counters = store.counters(&row.event).map_err(|_| {
                snapshot::corrupted(path, format!("row for unregistered event '{}'", row.event))
            })?;

            let aligned = calendar
                .bucket_start(row.granularity, row.bucket_start)
                .is_ok_and(|start| start == row.bucket_start);
            if !aligned {
                return Err(snapshot::corrupted(
                    path,
                    format!(
                        "misaligned {} bucket {} for event '{}'",
                        row.granularity, row.bucket_start, row.event
                    ),
                ));
            }

            let mut table = counters.table(row.granularity).lock();
            if table.insert(row.bucket_start, row.count).is_some() {
                return Err(snapshot::corrupted(
                    path,
                    format!(
                        "duplicate {} bucket {} for event '{}'",
                        row.granularity, row.bucket_start, row.event
                    ),
                ));
            }
        }

        Ok(store)
    }

    fn counters(&self, event: &str) -> Result<Arc<EventCounters>> {
        self.events
            .read()
            .get(event)
            .cloned()
            .ok_or_else(|| MinimError::unknown_event(event))
    }
}
