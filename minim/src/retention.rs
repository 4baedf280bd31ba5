//! Retention sweeping.
//!
//! Fine-grained buckets are only useful for recent windows, so they are
//! deleted once they fall behind a per-granularity cutoff. With the default
//! [`RetentionPolicy`], minute buckets older than one hour and hour buckets
//! older than sixty hours are removed; day buckets are kept forever.
//!
//! [`sweep`] is a single best-effort pass over every registered event. A
//! failure for one event is logged and recorded in the [`SweepReport`]; the
//! remaining events are still swept. [`Sweeper`] runs that pass on a
//! dedicated background thread.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calendar::unix_now;
use crate::counter::CounterStore;
use crate::error::{ArgumentError, MinimError, Result};
use crate::granularity::Granularity;
use crate::registry::EventRegistry;
use crate::store::Store;

/// How long buckets of each granularity are kept. `None` keeps them forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Retention for minute buckets.
    pub minute: Option<Duration>,
    /// Retention for hour buckets.
    pub hour: Option<Duration>,
    /// Retention for day buckets.
    pub day: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            minute: Some(Duration::from_secs(3600)),
            hour: Some(Duration::from_secs(60 * 3600)),
            day: None,
        }
    }
}

impl RetentionPolicy {
    /// A policy that never deletes anything.
    pub fn keep_forever() -> Self {
        Self {
            minute: None,
            hour: None,
            day: None,
        }
    }

    /// Retention configured for `granularity`.
    pub fn for_granularity(&self, granularity: Granularity) -> Option<Duration> {
        match granularity {
            Granularity::Minute => self.minute,
            Granularity::Hour => self.hour,
            Granularity::Day => self.day,
        }
    }

    /// Buckets of `granularity` starting before the returned timestamp are
    /// expired at `now`. `None` if the granularity is kept forever.
    pub fn cutoff(&self, granularity: Granularity, now: i64) -> Option<i64> {
        let keep = self.for_granularity(granularity)?;
        let keep_secs = i64::try_from(keep.as_secs()).unwrap_or(i64::MAX);
        Some(now.saturating_sub(keep_secs))
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError::InvalidConfig`] if any retention is shorter
    /// than one second.
    pub fn validate(&self) -> Result<()> {
        for granularity in Granularity::ALL {
            if let Some(keep) = self.for_granularity(granularity)
                && keep.as_secs() == 0
            {
                return Err(ArgumentError::InvalidConfig {
                    reason: format!("{granularity} retention must be at least one second"),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// One event/granularity that could not be swept.
#[derive(Debug)]
pub struct SweepFailure {
    /// The event being swept.
    pub event: String,
    /// The granularity being swept.
    pub granularity: Granularity,
    /// What went wrong.
    pub error: MinimError,
}

/// Outcome of a [`sweep`] pass.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Number of events visited.
    pub events_swept: usize,
    /// Total buckets deleted across all events.
    pub buckets_removed: usize,
    /// Per-event failures; the pass continued past each of them.
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    /// `true` if every event was swept without error.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deletes every expired bucket of every registered event.
///
/// Events are visited in registration order. A failure for one event is
/// logged and recorded, and does not stop the pass.
pub fn sweep(
    registry: &EventRegistry,
    counters: &CounterStore,
    policy: &RetentionPolicy,
    now: i64,
) -> SweepReport {
    let mut report = SweepReport::default();

    for definition in registry.list() {
        report.events_swept += 1;

        for granularity in Granularity::ALL {
            let Some(cutoff) = policy.cutoff(granularity, now) else {
                continue;
            };

            match counters.remove_before(&definition.name, granularity, cutoff) {
                Ok(removed) => report.buckets_removed += removed,
                Err(error) => {
                    tracing::warn!(
                        event = %definition.name,
                        %granularity,
                        %error,
                        "sweep failed for event; continuing"
                    );
                    report.failures.push(SweepFailure {
                        event: definition.name.clone(),
                        granularity,
                        error,
                    });
                }
            }
        }
    }

    tracing::debug!(
        events = report.events_swept,
        removed = report.buckets_removed,
        failures = report.failures.len(),
        "sweep finished"
    );
    report
}

/// Handle to the background sweeper thread.
///
/// The thread sweeps once immediately, then every `interval`, flushing the
/// store after each pass. Dropping the handle stops and joins the thread.
#[derive(Debug)]
pub struct Sweeper {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Starts the sweeper thread for `store`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(store: Arc<Store>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("minim-sweeper".to_string())
            .spawn(move || sweep_loop(&store, interval, &stop_rx))?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the sweeper and waits for its thread to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        // Dropping the sender wakes the thread with `Disconnected`.
        self.stop.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("sweeper thread panicked");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn sweep_loop(store: &Store, interval: Duration, stop: &mpsc::Receiver<()>) {
    tracing::info!(interval_secs = interval.as_secs(), "sweeper started");

    loop {
        let report = store.sweep(unix_now());
        if report.buckets_removed > 0 {
            tracing::info!(removed = report.buckets_removed, "expired buckets removed");
        }

        if let Err(e) = store.flush() {
            tracing::warn!(error = %e, "flush after sweep failed");
        }

        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::info!("sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Calendar;
    use crate::error::ErrorKind;

    const NOW: i64 = 1_700_000_000;

    fn setup(events: &[&str]) -> (EventRegistry, CounterStore) {
        let registry = EventRegistry::new();
        let counters = CounterStore::new(Calendar::Utc);
        for event in events {
            registry
                .register_with(event, 0, |name| {
                    counters.provision(name);
                })
                .unwrap();
        }
        (registry, counters)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.cutoff(Granularity::Minute, NOW), Some(NOW - 3600));
        assert_eq!(policy.cutoff(Granularity::Hour, NOW), Some(NOW - 216_000));
        assert_eq!(policy.cutoff(Granularity::Day, NOW), None);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_zero_retention_is_invalid() {
        let policy = RetentionPolicy {
            minute: Some(Duration::ZERO),
            ..RetentionPolicy::default()
        };
        assert_eq!(policy.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_sweep_removes_only_expired_buckets() {
        let (registry, counters) = setup(&["e"]);

        // Minute buckets every 10 minutes over the last 3 hours.
        for i in 0..18 {
            counters.increment("e", Granularity::Minute, NOW - i * 600).unwrap();
        }
        // Hour buckets every 10 hours over the last 100 hours.
        for i in 0..10 {
            counters.increment("e", Granularity::Hour, NOW - i * 36_000).unwrap();
        }
        // Day buckets a year back.
        for i in 0..365 {
            counters.increment("e", Granularity::Day, NOW - i * 86_400).unwrap();
        }

        let report = sweep(&registry, &counters, &RetentionPolicy::default(), NOW);
        assert!(report.is_clean());
        assert_eq!(report.events_swept, 1);

        let minutes = counters.query("e", Granularity::Minute, i64::MIN, i64::MAX).unwrap();
        assert!(minutes.keys().all(|&b| b >= NOW - 3600));
        assert!(!minutes.is_empty());

        let hours = counters.query("e", Granularity::Hour, i64::MIN, i64::MAX).unwrap();
        assert!(hours.keys().all(|&b| b >= NOW - 216_000));

        assert_eq!(counters.bucket_count("e", Granularity::Day).unwrap(), 365);
    }

    #[test]
    fn test_sweep_isolates_failures() {
        let (registry, counters) = setup(&["first", "last"]);
        // Registered but never provisioned: every removal for it fails.
        registry.register("orphan", 0).unwrap();
        registry.register("after", 0).unwrap();
        counters.provision("after");

        for event in ["first", "last", "after"] {
            counters.increment(event, Granularity::Minute, NOW - 7200).unwrap();
        }

        let report = sweep(&registry, &counters, &RetentionPolicy::default(), NOW);
        assert_eq!(report.events_swept, 4);
        assert_eq!(report.buckets_removed, 3);
        assert!(!report.is_clean());
        assert!(report.failures.iter().all(|f| f.event == "orphan"));
        assert_eq!(report.failures[0].error.kind(), ErrorKind::UnknownEvent);
    }

    #[test]
    fn test_keep_forever_removes_nothing() {
        let (registry, counters) = setup(&["e"]);
        counters.increment("e", Granularity::Minute, 0).unwrap();

        let report = sweep(&registry, &counters, &RetentionPolicy::keep_forever(), NOW);
        assert_eq!(report.buckets_removed, 0);
        assert_eq!(counters.bucket_count("e", Granularity::Minute).unwrap(), 1);
    }
}
