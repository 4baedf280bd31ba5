//! Integration tests for retention sweeping and the background sweeper.

use std::sync::Arc;
use std::time::Duration;

use minim::calendar::unix_now;
use minim::{Calendar, Granularity, RetentionPolicy, Store, StoreConfig, Sweeper};
use tempfile::tempdir;

const NOW: i64 = 1_700_000_000;

fn utc(retention: RetentionPolicy) -> StoreConfig {
    StoreConfig {
        calendar: Calendar::Utc,
        retention,
        ..StoreConfig::default()
    }
}

#[test]
fn test_sweep_enforces_default_retention() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path().join("s"), utc(RetentionPolicy::default())).unwrap();

    // One occurrence every 15 minutes for the last four days.
    for i in 0..(4 * 24 * 4) {
        store.record_at("e", NOW - i * 900).unwrap();
    }
    let days_before = store.bucket_count("e", Granularity::Day).unwrap();

    let report = store.sweep(NOW);
    assert!(report.is_clean());
    assert!(report.buckets_removed > 0);

    let minutes = store.query("e", Granularity::Minute, i64::MIN, i64::MAX).unwrap();
    assert!(!minutes.is_empty());
    assert!(minutes.keys().all(|&start| start >= NOW - 3600));

    let hours = store.query("e", Granularity::Hour, i64::MIN, i64::MAX).unwrap();
    assert!(hours.keys().all(|&start| start >= NOW - 60 * 3600));
    // Hours inside the retention window are untouched.
    let recent_hour = Calendar::Utc.bucket_start(Granularity::Hour, NOW - 3600).unwrap();
    assert_eq!(hours[&recent_hour], 4);

    assert_eq!(store.bucket_count("e", Granularity::Day).unwrap(), days_before);
}

#[test]
fn test_sweep_is_idempotent() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path().join("s"), utc(RetentionPolicy::default())).unwrap();

    store.record_at("e", NOW - 7200).unwrap();
    assert_eq!(store.sweep(NOW).buckets_removed, 1);
    assert_eq!(store.sweep(NOW).buckets_removed, 0);
}

#[test]
fn test_sweep_with_day_retention() {
    let temp_dir = tempdir().unwrap();
    let policy = RetentionPolicy {
        day: Some(Duration::from_secs(7 * 86_400)),
        ..RetentionPolicy::default()
    };
    let store = Store::open(temp_dir.path().join("s"), utc(policy)).unwrap();

    for i in 0..30 {
        store.record_at("e", NOW - i * 86_400).unwrap();
    }
    store.sweep(NOW);

    let days = store.query("e", Granularity::Day, i64::MIN, i64::MAX).unwrap();
    assert!(days.keys().all(|&start| start >= NOW - 7 * 86_400));
    assert_eq!(days.len(), 7);
}

#[test]
fn test_sweeper_sweeps_and_flushes() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("s");
    let config = utc(RetentionPolicy::default());
    let now = unix_now();

    {
        let store = Arc::new(Store::open(&path, config.clone()).unwrap());
        store.record_at("e", now - 3 * 3600).unwrap();
        store.record_at("e", now).unwrap();

        // The first pass runs as soon as the thread starts.
        let sweeper = Sweeper::spawn(Arc::clone(&store), Duration::from_secs(3600)).unwrap();
        sweeper.shutdown();

        assert_eq!(store.bucket_count("e", Granularity::Minute).unwrap(), 1);
    }

    // The sweeper flushed after its pass; nothing else did.
    let store = Store::open(&path, config).unwrap();
    assert_eq!(store.bucket_count("e", Granularity::Minute).unwrap(), 1);
    assert_eq!(store.bucket_count("e", Granularity::Hour).unwrap(), 2);
}

#[test]
fn test_sweeper_stops_on_drop() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(
        Store::open(temp_dir.path().join("s"), utc(RetentionPolicy::default())).unwrap(),
    );

    let sweeper = Sweeper::spawn(Arc::clone(&store), Duration::from_millis(10)).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    drop(sweeper);

    // The sweeper thread released its handle to the store.
    assert_eq!(Arc::strong_count(&store), 1);
}
