//! Store module for the minim event counter store.
//!
//! This module provides the top-level API that ties all components together.
//! The Store owns the event registry, the counter store and the store
//! directory, and exposes ingestion, window reads and retention sweeps through
//! `&self`, so a single `Arc<Store>` can be shared by any number of threads.
//!
//! # Design
//!
//! The Store acts as the composition root:
//! - Validates event names before they reach any other component
//! - Consults the EventRegistry before every counter read or write
//! - Provisions counter tables while registering, under the registry lock
//! - Persists counters, then the registry, on [`Store::flush`]
//!
//! # File Layout
//!
//! ```text
//! store_dir/
//! ├── meta.json       <- Snapshot version and day calendar
//! ├── events.json     <- Event definitions, in registration order
//! └── counters.json   <- Every counter bucket
//! ```
//!
//! No file name is ever derived from an event name.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use minim::{Granularity, Store, StoreConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open("./data", StoreConfig::default())?;
//!
//! // Ingest: registers on first sight, bumps minute, hour and day buckets.
//! store.record("signup")?;
//!
//! // Read the last hour, one point per minute, most recent first.
//! let window = store.window("signup", Granularity::Minute, 60)?;
//! println!("{} signups in the last hour", window.total());
//!
//! store.flush()?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::calendar::{Calendar, unix_now};
use crate::config::{StoreConfig, WindowPolicy};
use crate::counter::CounterStore;
use crate::error::{MinimError, Result, StorageError};
use crate::granularity::Granularity;
use crate::registry::{EventDefinition, EventRegistry, validate_event_name};
use crate::retention::{self, SweepReport};
use crate::snapshot;
use crate::window::{self, Window};

/// Name of the metadata file in the store directory.
const METADATA_FILE: &str = "meta.json";

/// Name of the event registry file in the store directory.
const EVENTS_FILE: &str = "events.json";

/// Name of the counter snapshot file in the store directory.
const COUNTERS_FILE: &str = "counters.json";

/// Top-level store handle.
///
/// # Thread Safety
///
/// Every method takes `&self`. Increments to the same bucket from any number
/// of threads are never lost. A window read racing an increment may see the
/// current bucket either before or after it.
#[derive(Debug)]
pub struct Store {
    /// Path to the store directory.
    path: PathBuf,
    /// Configuration the store was opened with.
    config: StoreConfig,
    /// Known events.
    registry: EventRegistry,
    /// Counter buckets for every known event.
    counters: CounterStore,
    /// Serializes snapshot writers.
    flush_lock: Mutex<()>,
}

/// Contents of `meta.json`.
#[derive(Debug, Serialize, Deserialize)]
struct StoreMetadata {
    /// Snapshot format version.
    version: u32,
    /// Calendar that day buckets were cut in.
    calendar: Calendar,
}

/// Counts after recording one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedCounts {
    /// New count of the current minute bucket.
    pub minute: u64,
    /// New count of the current hour bucket.
    pub hour: u64,
    /// New count of the current day bucket.
    pub day: u64,
}

impl Store {
    /// Creates a new store or opens an existing one at the given path.
    ///
    /// If the directory holds no `meta.json`:
    /// - Creates the directory
    /// - Writes `meta.json` with the configured calendar
    /// - Writes an empty registry and counter snapshot
    ///
    /// Otherwise:
    /// - Reads `meta.json` and checks the version and calendar
    /// - Loads the registry, then the counters, validating both
    ///
    /// # Errors
    ///
    /// - [`MinimError::InvalidArgument`] if `config` is invalid
    /// - [`StorageError::DirectoryAccess`] if the directory cannot be created
    /// - [`StorageError::CalendarMismatch`] if the store was created with a
    ///   different calendar
    /// - [`StorageError::CorruptedSnapshot`] or [`StorageError::Parse`] if a
    ///   snapshot file is damaged
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        let store = if path.join(METADATA_FILE).exists() {
            Self::open_existing(path, config)?
        } else {
            Self::create_new(path, config)?
        };

        tracing::info!(
            path = %store.path.display(),
            events = store.registry.len(),
            calendar = %store.config.calendar,
            "store opened"
        );
        Ok(store)
    }

    /// Creates a new store directory with initial files.
    fn create_new(path: PathBuf, config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&path).map_err(|e| StorageError::DirectoryAccess {
            path: path.display().to_string(),
            source: e,
        })?;

        let metadata = StoreMetadata {
            version: snapshot::SNAPSHOT_VERSION,
            calendar: config.calendar,
        };
        snapshot::write_atomic(&path.join(METADATA_FILE), &metadata)?;

        let store = Self {
            counters: CounterStore::new(config.calendar),
            registry: EventRegistry::new(),
            path,
            config,
            flush_lock: Mutex::new(()),
        };
        store.flush()?;
        Ok(store)
    }

    /// Opens an existing store directory.
    fn open_existing(path: PathBuf, config: StoreConfig) -> Result<Self> {
        let metadata_path = path.join(METADATA_FILE);
        let metadata: StoreMetadata = snapshot::read(&metadata_path)?;
        snapshot::check_version(&metadata_path, metadata.version)?;

        if metadata.calendar != config.calendar {
            return Err(StorageError::CalendarMismatch {
                existing: metadata.calendar,
                expected: config.calendar,
            }
            .into());
        }

        let events_path = path.join(EVENTS_FILE);
        let registry = if events_path.exists() {
            EventRegistry::load(&events_path)?
        } else {
            EventRegistry::new()
        };

        let counters_path = path.join(COUNTERS_FILE);
        let counters = if counters_path.exists() {
            CounterStore::load(&counters_path, config.calendar, &registry)?
        } else {
            // No counter snapshot yet; every event starts empty.
            let counters = CounterStore::new(config.calendar);
            for definition in registry.list() {
                counters.provision(&definition.name);
            }
            counters
        };

        Ok(Self {
            path,
            config,
            registry,
            counters,
            flush_lock: Mutex::new(()),
        })
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Registers `event` at the current time. Idempotent.
    ///
    /// # Errors
    ///
    /// See [`Store::register_at`].
    pub fn register(&self, event: &str) -> Result<()> {
        self.register_at(event, unix_now()).map(|_| ())
    }

    /// Registers `event`, first seen at `at`, provisioning its minute, hour and
    /// day counters.
    ///
    /// Returns `true` if the event is new. Re-registering is a no-op that
    /// keeps `first_seen` and every counter.
    ///
    /// # Errors
    ///
    /// - [`MinimError::InvalidArgument`] if the name is empty, too long or
    ///   contains characters outside `[A-Za-z0-9_.:-]`
    ///
    /// The new definition reaches disk on the next [`Store::flush`].
    pub fn register_at(&self, event: &str, at: i64) -> Result<bool> {
        let created = self.registry.register_with(event, at, |name| {
            self.counters.provision(name);
        })?;

        if created {
            tracing::info!(event, "new event registered");
        }
        Ok(created)
    }

    /// Returns whether `event` has been registered.
    pub fn is_registered(&self, event: &str) -> bool {
        self.registry.is_registered(event)
    }

    /// Returns all event definitions in registration order.
    pub fn events(&self) -> Vec<EventDefinition> {
        self.registry.list()
    }

    /// Returns the definition of `event`, if registered.
    pub fn event(&self, event: &str) -> Option<EventDefinition> {
        self.registry.get(event)
    }

    /// Adds one occurrence at `at` to the `granularity` bucket containing it.
    ///
    /// Returns the bucket's new count.
    ///
    /// # Errors
    ///
    /// - [`MinimError::InvalidArgument`] for a malformed name or unbucketable
    ///   timestamp
    /// - [`MinimError::UnknownEvent`] if `event` was never registered
    pub fn increment(&self, event: &str, granularity: Granularity, at: i64) -> Result<u64> {
        self.ensure_registered(event)?;
        self.counters.increment(event, granularity, at)
    }

    /// Records one occurrence of `event` now.
    ///
    /// # Errors
    ///
    /// See [`Store::record_at`].
    pub fn record(&self, event: &str) -> Result<RecordedCounts> {
        self.record_at(event, unix_now())
    }

    /// Records one occurrence of `event` at `at`: registers the event if it
    /// is new, increments its minute, hour and day buckets, and advances
    /// `last_seen`.
    ///
    /// # Errors
    ///
    /// - [`MinimError::InvalidArgument`] for a malformed name or unbucketable
    ///   timestamp
    /// - [`MinimError::Storage`] if a new event cannot be persisted; nothing
    ///   is retried
    pub fn record_at(&self, event: &str, at: i64) -> Result<RecordedCounts> {
        self.register_at(event, at)?;

        let counts = RecordedCounts {
            minute: self.counters.increment(event, Granularity::Minute, at)?,
            hour: self.counters.increment(event, Granularity::Hour, at)?,
            day: self.counters.increment(event, Granularity::Day, at)?,
        };
        self.registry.touch(event, at)?;

        Ok(counts)
    }

    /// Returns the buckets of `event` at `granularity` whose starts lie in
    /// `from..=to`. Missing buckets are simply absent.
    ///
    /// # Errors
    ///
    /// - [`MinimError::InvalidArgument`] for a malformed name or `from > to`
    /// - [`MinimError::UnknownEvent`] if `event` was never registered
    pub fn query(
        &self,
        event: &str,
        granularity: Granularity,
        from: i64,
        to: i64,
    ) -> Result<BTreeMap<i64, u64>> {
        self.ensure_registered(event)?;
        self.counters.query(event, granularity, from, to)
    }

    /// Returns the last `length` buckets of `event`, ending at the bucket that
    /// contains the current time.
    ///
    /// # Errors
    ///
    /// See [`Store::window_at`].
    pub fn window(&self, event: &str, granularity: Granularity, length: usize) -> Result<Window> {
        self.window_at(event, granularity, length, unix_now())
    }

    /// Returns exactly `length` buckets of `event`, most recent first, ending
    /// at the bucket that contains `now`. Buckets with no recorded activity
    /// are reported with count zero.
    ///
    /// # Errors
    ///
    /// - [`MinimError::InvalidArgument`] for a malformed name, a length
    ///   outside `1..=MAX_WINDOW_LENGTH`, or an unrepresentable `now`
    /// - [`MinimError::UnknownEvent`] if `event` was never registered and the
    ///   store uses [`WindowPolicy::Strict`]
    pub fn window_at(
        &self,
        event: &str,
        granularity: Granularity,
        length: usize,
        now: i64,
    ) -> Result<Window> {
        validate_event_name(event)?;
        let starts = window::bucket_starts(self.config.calendar, granularity, length, now)?;

        let sparse = if self.registry.is_registered(event) {
            match window::covering_range(&starts) {
                Some((from, to)) => self.counters.query(event, granularity, from, to)?,
                None => BTreeMap::new(),
            }
        } else {
            match self.config.window_policy {
                WindowPolicy::Strict => return Err(MinimError::unknown_event(event)),
                WindowPolicy::Lenient => BTreeMap::new(),
            }
        };

        Ok(Window::new(
            event.to_string(),
            granularity,
            window::densify(&starts, &sparse),
        ))
    }

    /// Deletes expired minute and hour buckets of every event, relative to
    /// `now`. Best effort: per-event failures are logged and reported.
    pub fn sweep(&self, now: i64) -> SweepReport {
        retention::sweep(&self.registry, &self.counters, &self.config.retention, now)
    }

    /// Returns how many buckets `event` holds at `granularity`.
    ///
    /// # Errors
    ///
    /// Returns [`MinimError::UnknownEvent`] if `event` was never registered.
    pub fn bucket_count(&self, event: &str, granularity: Granularity) -> Result<usize> {
        self.ensure_registered(event)?;
        self.counters.bucket_count(event, granularity)
    }

    /// Writes every counter bucket and then the registry to disk.
    ///
    /// Each file is replaced atomically. Concurrent flushes are serialized.
    /// Counters go first: events are provisioned under the registry lock, so
    /// a registry written afterwards lists every event that has rows, even if
    /// the process dies between the two writes.
    ///
    /// # Errors
    ///
    /// Returns [`MinimError::Storage`] if a snapshot cannot be written.
    pub fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();
        self.save_counters()?;
        self.save_registry()?;
        tracing::debug!(path = %self.path.display(), "store flushed");
        Ok(())
    }

    fn save_counters(&self) -> Result<()> {
        self.counters.save(self.path.join(COUNTERS_FILE))
    }

    fn save_registry(&self) -> Result<()> {
        self.registry.save(self.path.join(EVENTS_FILE))
    }

    fn ensure_registered(&self, event: &str) -> Result<()> {
        validate_event_name(event)?;
        if !self.registry.is_registered(event) {
            return Err(MinimError::unknown_event(event));
        }
        Ok(())
    }
}
