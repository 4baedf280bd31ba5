//! Event registration.
//!
//! The [`EventRegistry`] is the set of known event names. Every counter write
//! is preceded by a registry lookup, and the retention sweeper walks the
//! registry to find the events it has to prune.
//!
//! # Registration Flow
//!
//! 1. Caller calls `register(name, at)` (or `register_with` to provision
//!    storage for the new event)
//! 2. The name is validated: non-empty, at most [`MAX_EVENT_NAME_LEN`] bytes,
//!    only `[A-Za-z0-9_.:-]`
//! 3. If the event already exists, nothing changes and `false` is returned
//! 4. Otherwise the provisioning callback runs and the definition is appended,
//!    both under the registry's write lock
//!
//! Event names are only ever used as map keys, never as file or table names.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ArgumentError, MinimError, Result};
use crate::snapshot;

/// Maximum event name length in bytes.
pub const MAX_EVENT_NAME_LEN: usize = 128;

/// A known event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    /// Unique, immutable event name.
    pub name: String,
    /// Unix seconds of the first registration.
    pub first_seen: i64,
    /// Unix seconds of the latest recorded occurrence.
    pub last_seen: i64,
}

/// Registry of event definitions, in insertion order.
///
/// All methods take `&self`; the registry is internally synchronized and can
/// be shared across threads.
#[derive(Debug, Default)]
pub struct EventRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// Definitions in insertion order.
    events: Vec<EventDefinition>,
    /// Map from name to position in `events`.
    index: HashMap<String, usize>,
}

impl RegistryInner {
    fn insert(&mut self, definition: EventDefinition) -> bool {
        if self.index.contains_key(&definition.name) {
            return false;
        }
        self.index.insert(definition.name.clone(), self.events.len());
        self.events.push(definition);
        true
    }
}

/// Serializable representation of the registry.
#[derive(Debug, Serialize, Deserialize)]
struct RegistrySnapshot {
    version: u32,
    events: Vec<EventDefinition>,
}

/// Checks that `name` is usable as an event name.
///
/// # Errors
///
/// - [`ArgumentError::EmptyEventName`] if `name` is empty
/// - [`ArgumentError::EventNameTooLong`] if it exceeds [`MAX_EVENT_NAME_LEN`]
/// - [`ArgumentError::InvalidEventName`] if it contains a character outside
///   `[A-Za-z0-9_.:-]`
pub fn validate_event_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ArgumentError::EmptyEventName.into());
    }

    if name.len() > MAX_EVENT_NAME_LEN {
        return Err(ArgumentError::EventNameTooLong {
            length: name.len(),
            max: MAX_EVENT_NAME_LEN,
        }
        .into());
    }

    if let Some(character) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
    {
        return Err(ArgumentError::InvalidEventName {
            name: name.to_string(),
            character,
        }
        .into());
    }

    Ok(())
}

impl EventRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, first seen at `at`.
    ///
    /// Returns `true` if the event was created, `false` if it already existed
    /// (in which case `first_seen` is left untouched).
    ///
    /// # Errors
    ///
    /// Returns [`MinimError::InvalidArgument`] if the name fails
    /// [`validate_event_name`].
    pub fn register(&self, name: &str, at: i64) -> Result<bool> {
        self.register_with(name, at, |_| {})
    }

    /// Registers `name` and runs `provision` for it if it is new.
    ///
    /// `provision` runs under the registry's write lock before the definition
    /// becomes visible, so any reader that observes the event also observes
    /// whatever `provision` set up.
    ///
    /// # Errors
    ///
    /// Returns [`MinimError::InvalidArgument`] if the name fails
    /// [`validate_event_name`].
    pub fn register_with(&self, name: &str, at: i64, provision: impl FnOnce(&str)) -> Result<bool> {
        validate_event_name(name)?;

        if self.is_registered(name) {
            return Ok(false);
        }

        let mut inner = self.inner.write();
        // Another writer may have won the race since the read above.
        if inner.index.contains_key(name) {
            return Ok(false);
        }

        provision(name);
        inner.insert(EventDefinition {
            name: name.to_string(),
            first_seen: at,
            last_seen: at,
        });

        tracing::debug!(event = name, "registered event");
        Ok(true)
    }

    /// Returns whether `name` has been registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.read().index.contains_key(name)
    }

    /// Returns a copy of the definition for `name`.
    pub fn get(&self, name: &str) -> Option<EventDefinition> {
        let inner = self.inner.read();
        inner.index.get(name).map(|&i| inner.events[i].clone())
    }

    /// Returns all definitions in insertion order.
    pub fn list(&self) -> Vec<EventDefinition> {
        self.inner.read().events.clone()
    }

    /// Returns the number of registered events.
    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    /// Returns `true` if no event has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advances `last_seen` of `name` to `at`. Never moves it backwards.
    ///
    /// # Errors
    ///
    /// Returns [`MinimError::UnknownEvent`] if `name` is not registered.
    pub fn touch(&self, name: &str, at: i64) -> Result<()> {
        let mut inner = self.inner.write();
        let Some(&i) = inner.index.get(name) else {
            return Err(MinimError::unknown_event(name));
        };
        let definition = &mut inner.events[i];
        definition.last_seen = definition.last_seen.max(at);
        Ok(())
    }

    /// Saves the registry to `path` as JSON.
    ///
    /// # Errors
    ///
    /// Returns a storage error if serialization or writing fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let snapshot = RegistrySnapshot {
            version: snapshot::SNAPSHOT_VERSION,
            events: self.list(),
        };
        snapshot::write_atomic(path.as_ref(), &snapshot)
    }

    /// Loads a registry previously written by [`EventRegistry::save`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be read or parsed, has an
    /// unsupported version, or contains invalid or duplicate names.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let snapshot: RegistrySnapshot = snapshot::read(path)?;
        snapshot::check_version(path, snapshot.version)?;

        let mut inner = RegistryInner::default();
        for definition in snapshot.events {
            if let Err(e) = validate_event_name(&definition.name) {
                return Err(snapshot::corrupted(path, e.to_string()));
            }
            let name = definition.name.clone();
            if !inner.insert(definition) {
                return Err(snapshot::corrupted(path, format!("duplicate event '{name}'")));
            }
        }

        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}
