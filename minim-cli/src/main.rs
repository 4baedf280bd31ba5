//! CLI for the minim event counter store.
//!
//! Provides commands for recording events, reading windows, inspecting and
//! sweeping stores, and benchmarking the increment path.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use minim::{Calendar, ErrorKind, Granularity, Store, StoreConfig, Sweeper, WindowPolicy};
use tracing_subscriber::EnvFilter;

/// minim: embedded event counter store CLI.
#[derive(Parser)]
#[command(name = "minim", version, about)]
struct Cli {
    /// Calendar for day buckets: "local", "utc", or a fixed offset like
    /// "+05:30". Defaults to the calendar recorded in the store.
    #[arg(long, global = true)]
    calendar: Option<Calendar>,

    /// Return all-zero windows for unknown events instead of failing.
    #[arg(long, global = true)]
    lenient: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Record occurrences of an event now.
    Record {
        /// Path to the store directory.
        store_path: PathBuf,

        /// Event name.
        event: String,

        /// Number of occurrences to record.
        #[arg(long, default_value = "1")]
        times: u64,
    },

    /// Print the most recent buckets of an event, newest first.
    Window {
        /// Path to the store directory.
        store_path: PathBuf,

        /// Event name.
        event: String,

        /// Bucket width: minute, hour or day.
        #[arg(long, default_value = "minute")]
        granularity: Granularity,

        /// Number of buckets (default: 60 minutes, 48 hours, 30 days).
        #[arg(long)]
        length: Option<usize>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// List registered events.
    Events {
        /// Path to the store directory.
        store_path: PathBuf,
    },

    /// Delete expired buckets now.
    Sweep {
        /// Path to the store directory.
        store_path: PathBuf,
    },

    /// Display store metadata, events, bucket counts and disk usage.
    Info {
        /// Path to the store directory.
        store_path: PathBuf,
    },

    /// Record one event per stdin line, sweeping in the background.
    Pipe {
        /// Path to the store directory.
        store_path: PathBuf,

        /// Seconds between background sweeps.
        #[arg(long, default_value = "60")]
        sweep_interval: u64,
    },

    /// Run a concurrent same-bucket increment benchmark.
    Bench {
        /// Number of writer threads.
        #[arg(long, default_value = "8")]
        threads: usize,

        /// Increments per thread.
        #[arg(long, default_value = "1000000")]
        increments: u64,
    },
}

/// Output format for window results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with a points array.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = GlobalOptions {
        calendar: cli.calendar,
        lenient: cli.lenient,
    };

    let result = match cli.command {
        Commands::Record {
            store_path,
            event,
            times,
        } => cmd_record(&options, &store_path, &event, times),
        Commands::Window {
            store_path,
            event,
            granularity,
            length,
            format,
        } => cmd_window(&options, &store_path, &event, granularity, length, &format),
        Commands::Events { store_path } => cmd_events(&options, &store_path),
        Commands::Sweep { store_path } => cmd_sweep(&options, &store_path),
        Commands::Info { store_path } => cmd_info(&options, &store_path),
        Commands::Pipe {
            store_path,
            sweep_interval,
        } => cmd_pipe(&options, &store_path, sweep_interval),
        Commands::Bench {
            threads,
            increments,
        } => cmd_bench(threads, increments),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Flags shared by every store command.
struct GlobalOptions {
    calendar: Option<Calendar>,
    lenient: bool,
}

impl GlobalOptions {
    /// Builds the store configuration, taking the calendar from `meta.json`
    /// when none was given on the command line.
    fn config(&self, store_path: &Path) -> Result<StoreConfig, Box<dyn std::error::Error>> {
        let calendar = match self.calendar {
            Some(calendar) => calendar,
            None => stored_calendar(store_path)?.unwrap_or_default(),
        };

        Ok(StoreConfig {
            calendar,
            window_policy: if self.lenient {
                WindowPolicy::Lenient
            } else {
                WindowPolicy::Strict
            },
            ..StoreConfig::default()
        })
    }

    fn open(&self, store_path: &Path) -> Result<Store, Box<dyn std::error::Error>> {
        Ok(Store::open(store_path, self.config(store_path)?)?)
    }

    /// Opens a store that must already exist.
    fn open_existing(&self, store_path: &Path) -> Result<Store, Box<dyn std::error::Error>> {
        if !store_path.join("meta.json").exists() {
            return Err(format!("No store found at '{}'", store_path.display()).into());
        }
        self.open(store_path)
    }
}

/// Reads the calendar recorded in `meta.json`, if the store exists.
fn stored_calendar(store_path: &Path) -> Result<Option<Calendar>, Box<dyn std::error::Error>> {
    let meta_path = store_path.join("meta.json");
    if !meta_path.exists() {
        return Ok(None);
    }

    let meta_data = std::fs::read_to_string(&meta_path)?;
    let meta: serde_json::Value = serde_json::from_str(&meta_data)?;
    let Some(calendar) = meta.get("calendar") else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(calendar.clone())?))
}

/// Implements `minim record <store_path> <event>`.
fn cmd_record(
    options: &GlobalOptions,
    store_path: &Path,
    event: &str,
    times: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    if times == 0 {
        return Err("--times must be at least 1".into());
    }

    let store = options.open(store_path)?;
    let mut counts = store.record(event)?;
    for _ in 1..times {
        counts = store.record(event)?;
    }
    store.flush()?;

    println!("{event}: minute={} hour={} day={}", counts.minute, counts.hour, counts.day);
    Ok(())
}

/// Implements `minim window <store_path> <event>`.
fn cmd_window(
    options: &GlobalOptions,
    store_path: &Path,
    event: &str,
    granularity: Granularity,
    length: Option<usize>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = options.open_existing(store_path)?;
    let calendar = store.config().calendar;
    let length = length.unwrap_or_else(|| granularity.default_window_length());

    let window = store.window(event, granularity, length)?;
    let labels = window.labeled(calendar)?;

    match format {
        OutputFormat::Csv => {
            println!(
                "# event={event}, granularity={granularity}, points={}, total={}",
                window.len(),
                window.total()
            );
            println!("bucket_start,label,count");
            for (point, (label, count)) in window.points().iter().zip(&labels) {
                println!("{},{label},{count}", point.bucket_start);
            }
        }
        OutputFormat::Json => {
            let json_points: Vec<serde_json::Value> = window
                .points()
                .iter()
                .zip(&labels)
                .map(|(point, (label, count))| {
                    serde_json::json!({
                        "bucket_start": point.bucket_start,
                        "label": label,
                        "count": count,
                    })
                })
                .collect();

            let output = serde_json::json!({
                "event": event,
                "granularity": granularity,
                "calendar": calendar.to_string(),
                "total": window.total(),
                "points": json_points,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `minim events <store_path>`.
fn cmd_events(options: &GlobalOptions, store_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = options.open_existing(store_path)?;
    let calendar = store.config().calendar;

    println!("name,first_seen,last_seen");
    for definition in store.events() {
        println!(
            "{},{},{}",
            definition.name,
            calendar.label(Granularity::Minute, definition.first_seen)?,
            calendar.label(Granularity::Minute, definition.last_seen)?,
        );
    }
    Ok(())
}

/// Implements `minim sweep <store_path>`.
fn cmd_sweep(options: &GlobalOptions, store_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = options.open_existing(store_path)?;

    let report = store.sweep(minim::calendar::unix_now());
    store.flush()?;

    println!("Events swept: {}", report.events_swept);
    println!("Buckets removed: {}", report.buckets_removed);
    for failure in &report.failures {
        println!("  Failed: {} ({}): {}", failure.event, failure.granularity, failure.error);
    }
    Ok(())
}

/// Implements `minim info <store_path>`.
fn cmd_info(options: &GlobalOptions, store_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = options.open_existing(store_path)?;
    let config = store.config();

    println!("Store: {}", store_path.display());
    println!("Calendar: {}", config.calendar);
    for granularity in Granularity::ALL {
        let retention = config
            .retention
            .for_granularity(granularity)
            .map_or_else(|| "forever".to_string(), |d| format_duration_secs(d.as_secs()));
        println!("  {granularity} retention: {retention}");
    }
    println!();

    let events = store.events();
    println!("Registered events: {}", events.len());
    for definition in &events {
        let mut counts = Vec::with_capacity(Granularity::ALL.len());
        for granularity in Granularity::ALL {
            counts.push(format!(
                "{granularity}={}",
                store.bucket_count(&definition.name, granularity)?
            ));
        }
        println!("  - {} ({})", definition.name, counts.join(", "));
    }
    println!();

    let total_size = dir_size(store_path)?;
    println!("Total disk usage: {} ({total_size} bytes)", format_bytes(total_size));

    Ok(())
}

/// Implements `minim pipe <store_path>`.
fn cmd_pipe(
    options: &GlobalOptions,
    store_path: &Path,
    sweep_interval: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = options.config(store_path)?;
    config.sweep_interval = Duration::from_secs(sweep_interval);
    let store = Arc::new(Store::open(store_path, config)?);

    let sweeper = Sweeper::spawn(Arc::clone(&store), store.config().sweep_interval)?;

    let mut recorded = 0u64;
    let mut rejected = 0u64;
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let event = line.trim();
        if event.is_empty() {
            continue;
        }

        match store.record(event) {
            Ok(_) => recorded += 1,
            // A bad line is skipped; storage faults end the pipe.
            Err(e) if e.kind() == ErrorKind::InvalidArgument => {
                tracing::warn!(line = event, error = %e, "skipping invalid event");
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    sweeper.shutdown();
    store.flush()?;

    println!("Recorded: {recorded}");
    println!("Rejected: {rejected}");
    Ok(())
}

/// Implements `minim bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(threads: usize, increments: u64) -> Result<(), Box<dyn std::error::Error>> {
    if threads == 0 {
        return Err("--threads must be at least 1".into());
    }

    println!("minim same-bucket increment benchmark");
    println!("  Threads: {threads}");
    println!("  Increments per thread: {increments}");
    println!();

    let temp_dir = std::env::temp_dir().join("minim_bench");
    let _ = std::fs::remove_dir_all(&temp_dir);

    let config = StoreConfig {
        calendar: Calendar::Utc,
        ..StoreConfig::default()
    };
    let store = Arc::new(Store::open(&temp_dir, config)?);

    let at = 1_700_000_000;
    store.register_at("bench", at)?;

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || -> minim::Result<()> {
                for _ in 0..increments {
                    store.increment("bench", Granularity::Minute, at)?;
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().map_err(|_| "bench thread panicked")??;
    }

    let elapsed = start.elapsed();
    let total_writes = increments * u64::try_from(threads)?;
    let ns_per_write = elapsed.as_nanos() as f64 / total_writes as f64;
    let writes_per_sec = total_writes as f64 / elapsed.as_secs_f64();

    let window = store.window_at("bench", Granularity::Minute, 1, at)?;
    let observed = window.total();

    println!("Results:");
    println!("  Total increments: {total_writes}");
    println!("  Final count: {observed}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_write:.1} ns/increment");
    println!("  Throughput: {writes_per_sec:.0} increments/sec");
    println!();

    // Clean up
    drop(store);
    let _ = std::fs::remove_dir_all(&temp_dir);

    if observed != total_writes {
        return Err(format!("lost increments: expected {total_writes}, counted {observed}").into());
    }
    Ok(())
}

/// Formats seconds as a human-readable duration.
fn format_duration_secs(secs: u64) -> String {
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Recursively calculates directory size.
fn dir_size(path: &Path) -> Result<u64, Box<dyn std::error::Error>> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}
