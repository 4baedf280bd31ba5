//! Error types for the minim event counter store.

use thiserror::Error;

use crate::calendar::Calendar;

/// The main error type for all minim operations.
///
/// Every error falls into one of three kinds (see [`ErrorKind`]): caller
/// mistakes ([`MinimError::InvalidArgument`]), operations against events that
/// were never registered ([`MinimError::UnknownEvent`]), and failures of the
/// persistence layer ([`MinimError::Storage`]).
#[derive(Error, Debug)]
pub enum MinimError {
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ArgumentError),

    /// The event was never passed to `register`.
    #[error("unknown event '{event}'")]
    UnknownEvent {
        /// The event name that was looked up.
        event: String,
    },

    /// The persistence layer failed.
    #[error("storage fault: {0}")]
    Storage(#[from] StorageError),
}

impl MinimError {
    /// Builds an [`MinimError::UnknownEvent`] for `event`.
    pub fn unknown_event(event: &str) -> Self {
        Self::UnknownEvent {
            event: event.to_string(),
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::UnknownEvent { .. } => ErrorKind::UnknownEvent,
            Self::Storage(_) => ErrorKind::StorageFault,
        }
    }
}

/// Coarse classification of a [`MinimError`].
///
/// `InvalidArgument` and `UnknownEvent` are always caller-correctable.
/// `StorageFault` is never retried by the store itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input: bad event name, window length, range or config.
    InvalidArgument,
    /// The event has not been registered.
    UnknownEvent,
    /// I/O failure, corrupted or mismatched on-disk state.
    StorageFault,
}

/// Errors raised while validating caller input.
#[derive(Error, Debug)]
pub enum ArgumentError {
    /// Event names must be non-empty.
    #[error("event name must not be empty")]
    EmptyEventName,

    /// The event name exceeds the maximum length.
    #[error("event name is {length} bytes long (max {max})")]
    EventNameTooLong {
        /// Length of the rejected name in bytes.
        length: usize,
        /// Maximum accepted length in bytes.
        max: usize,
    },

    /// The event name contains a character outside the accepted set.
    #[error("event name '{name}' contains invalid character {character:?}")]
    InvalidEventName {
        /// The rejected name.
        name: String,
        /// The first offending character.
        character: char,
    },

    /// Window length must be between 1 and the configured maximum.
    #[error("invalid window length {length} (must be between 1 and {max})")]
    InvalidWindowLength {
        /// The requested length.
        length: usize,
        /// The maximum accepted length.
        max: usize,
    },

    /// The lower bound of a query range is after its upper bound.
    #[error("invalid time range: from {from} > to {to}")]
    InvalidTimeRange {
        /// Start of the requested range (bucket start, unix seconds).
        from: i64,
        /// End of the requested range (bucket start, unix seconds).
        to: i64,
    },

    /// The timestamp cannot be represented in the configured calendar.
    #[error("timestamp {timestamp} is outside the representable range")]
    TimestampOutOfRange {
        /// The rejected timestamp (unix seconds).
        timestamp: i64,
    },

    /// A granularity name could not be parsed.
    #[error("unknown granularity '{value}' (expected minute, hour or day)")]
    UnknownGranularity {
        /// The rejected input.
        value: String,
    },

    /// A calendar specification could not be parsed.
    #[error("invalid calendar '{value}': {reason}")]
    InvalidCalendar {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The store configuration is inconsistent.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of what is invalid.
        reason: String,
    },
}

/// Errors raised by the persistence layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The store directory could not be created or accessed.
    #[error("failed to access store directory '{path}': {source}")]
    DirectoryAccess {
        /// The path that could not be accessed.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file could not be read.
    #[error("failed to read '{path}': {source}")]
    ReadFailed {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file could not be written or renamed into place.
    #[error("failed to write '{path}': {source}")]
    WriteFailed {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file is not valid JSON for its format.
    #[error("failed to parse '{path}': {source}")]
    Parse {
        /// The file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A snapshot file parsed but violates a store invariant.
    #[error("corrupted snapshot '{path}': {reason}")]
    CorruptedSnapshot {
        /// The file path.
        path: String,
        /// Description of the violation.
        reason: String,
    },

    /// Failed to serialize a snapshot to JSON.
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The store was created with a different day calendar.
    #[error("calendar mismatch: store uses {existing}, opened with {expected}")]
    CalendarMismatch {
        /// Calendar recorded in the store metadata.
        existing: Calendar,
        /// Calendar the store was opened with.
        expected: Calendar,
    },
}

/// Type alias for `Result<T, MinimError>`.
pub type Result<T> = std::result::Result<T, MinimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err: MinimError = ArgumentError::EmptyEventName.into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(MinimError::unknown_event("x").kind(), ErrorKind::UnknownEvent);

        let err: MinimError = StorageError::CorruptedSnapshot {
            path: "counters.json".to_string(),
            reason: "duplicate row".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::StorageFault);
    }

    #[test]
    fn test_error_messages() {
        let err = MinimError::unknown_event("signup");
        assert_eq!(err.to_string(), "unknown event 'signup'");

        let err: MinimError = ArgumentError::InvalidWindowLength { length: 0, max: 10 }.into();
        assert_eq!(
            err.to_string(),
            "invalid argument: invalid window length 0 (must be between 1 and 10)"
        );
    }
}
