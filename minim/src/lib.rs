//! # minim
//!
//! Embedded event counter store with minute, hour and day buckets.
//!
//! minim counts named events. Every recorded occurrence lands in one
//! minute bucket, one hour bucket and one calendar-day bucket. Reads return
//! fixed-length, zero-filled windows of the most recent buckets, which is
//! exactly what a dashboard sparkline or a "last 30 days" table needs.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Events are registered on first sight; no schema up front
//! - Concurrent increments to the same bucket are never lost
//! - Sparse storage: empty buckets cost nothing, windows fill them with zero
//! - Day buckets follow calendar-local midnight, not a 24-hour grid
//! - Minute and hour buckets expire; a background sweeper prunes them
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use minim::{Granularity, Store, StoreConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Open or create a store
//! let store = Store::open("./my_events", StoreConfig::default())?;
//!
//! // Record occurrences; the event is registered the first time
//! store.record("signup")?;
//! store.record("signup")?;
//!
//! // Last 30 days, most recent first, zero where nothing happened
//! let window = store.window("signup", Granularity::Day, 30)?;
//! for point in window.points() {
//!     println!("{}: {}", point.bucket_start, point.count);
//! }
//!
//! store.flush()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`]: Top-level handle; opens a directory, owns registry and counters
//! - [`EventRegistry`]: The set of known events
//! - [`CounterStore`]: Sparse per-event, per-granularity bucket tables
//! - [`Window`]: Dense, most-recent-first read result
//! - [`Sweeper`]: Background retention thread
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`store`]: Store lifecycle, record, window, flush
//! - [`registry`]: Event registration and name validation
//! - [`counter`]: Bucketed counters and their snapshot
//! - [`window`]: Window bucket arithmetic and zero filling
//! - [`retention`]: Retention policy, sweep pass and sweeper thread
//! - [`calendar`]: Bucket alignment and labels
//! - [`granularity`]: Minute, hour and day
//! - [`config`]: Store configuration
//! - [`error`]: Error types

pub mod calendar;
pub mod config;
pub mod counter;
pub mod error;
pub mod granularity;
pub mod registry;
pub mod retention;
mod snapshot;
pub mod store;
pub mod window;

// Re-export primary API types at crate root for convenience.
pub use calendar::Calendar;
pub use config::{StoreConfig, WindowPolicy};
pub use counter::{CounterRow, CounterStore};
pub use error::{ErrorKind, MinimError, Result};
pub use granularity::Granularity;
pub use registry::{EventDefinition, EventRegistry};
pub use retention::{RetentionPolicy, SweepReport, Sweeper};
pub use store::{RecordedCounts, Store};
pub use window::{Window, WindowPoint};
