//! Store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::error::{ArgumentError, Result};
use crate::granularity::Granularity;
use crate::retention::RetentionPolicy;

/// What a window read returns for an event that was never registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Fail with `UnknownEvent`.
    #[default]
    Strict,
    /// Return an all-zero window of the requested length.
    Lenient,
}

/// Configuration for opening a [`Store`](crate::Store).
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use minim::{Calendar, StoreConfig, WindowPolicy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = StoreConfig {
///     calendar: Calendar::Utc,
///     window_policy: WindowPolicy::Lenient,
///     sweep_interval: Duration::from_secs(30),
///     ..StoreConfig::default()
/// };
/// config.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Time zone for day buckets and labels. Fixed for the life of a store.
    pub calendar: Calendar,

    /// Per-granularity retention applied by the sweeper.
    pub retention: RetentionPolicy,

    /// Behavior of window reads for unregistered events.
    pub window_policy: WindowPolicy,

    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            calendar: Calendar::default(),
            retention: RetentionPolicy::default(),
            window_policy: WindowPolicy::default(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl StoreConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError::InvalidConfig`] or
    /// [`ArgumentError::InvalidCalendar`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(ArgumentError::InvalidConfig {
                reason: "sweep interval must be greater than zero".to_string(),
            }
            .into());
        }

        self.retention.validate()?;

        // Surfaces an out-of-range fixed offset before any data is bucketed.
        self.calendar.bucket_start(Granularity::Day, 0)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_config_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.calendar, Calendar::Local);
        assert_eq!(config.window_policy, WindowPolicy::Strict);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_sweep_interval_is_invalid() {
        let config = StoreConfig {
            sweep_interval: Duration::ZERO,
            ..StoreConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_bad_fixed_offset_is_invalid() {
        let config = StoreConfig {
            calendar: Calendar::Fixed { offset_secs: 90_000 },
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde() {
        let config = StoreConfig {
            calendar: Calendar::Fixed { offset_secs: 3600 },
            window_policy: WindowPolicy::Lenient,
            ..StoreConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
