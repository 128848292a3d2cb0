//! Read-only view of the engine for other threads.
//!
//! The engine thread owns the live [`crate::bus::StateBus`]. After each
//! batch of work it publishes a [`BusSnapshot`] through a [`StateManager`],
//! which any number of readers can hold clones of.

use crate::bus::Value;
use crate::form::Section;
use crate::voice::VoiceStatus;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Name and status of one voice.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceInfo {
    pub name: String,
    pub status: VoiceStatus,
    pub steps: u64,
}

/// Everything an observer can see.
#[derive(Clone, Debug, PartialEq)]
pub struct BusSnapshot {
    /// Engine time in beats.
    pub beat: f64,
    pub bar: u64,
    pub section: Section,
    /// Beat at which the current section began.
    pub section_entered: f64,
    pub values: BTreeMap<String, Value>,
    pub voices: Vec<VoiceInfo>,
    pub midi_enabled: bool,
    pub cc_enabled: bool,
    pub audio_enabled: bool,
    pub midi_port: String,
    pub sounding_notes: usize,
    pub stopped: bool,
    /// Bumped on every publish.
    pub version: u64,
}

impl Default for BusSnapshot {
    fn default() -> Self {
        Self {
            beat: 0.0,
            bar: 0,
            section: Section::Intro,
            section_entered: 0.0,
            values: BTreeMap::new(),
            voices: Vec::new(),
            midi_enabled: true,
            cc_enabled: true,
            audio_enabled: true,
            midi_port: String::new(),
            sounding_notes: 0,
            stopped: false,
            version: 0,
        }
    }
}

impl BusSnapshot {
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn voice(&self, name: &str) -> Option<&VoiceInfo> {
        self.voices.iter().find(|v| v.name == name)
    }
}

/// Thread-safe holder of the latest snapshot.
#[derive(Clone, Default)]
pub struct StateManager {
    state: Arc<RwLock<BusSnapshot>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the state with a closure.
    pub fn with_state_read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&BusSnapshot) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Replace the snapshot, bumping its version.
    pub fn publish(&self, mut snapshot: BusSnapshot) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        snapshot.version = state.version + 1;
        *state = snapshot;
    }

    /// Get a clone of the current state.
    pub fn snapshot(&self) -> BusSnapshot {
        self.with_state_read(|s| s.clone())
    }

    pub fn section(&self) -> Section {
        self.with_state_read(|s| s.section)
    }

    pub fn version(&self) -> u64 {
        self.with_state_read(|s| s.version)
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_bumps_version() {
        let manager = StateManager::new();
        assert_eq!(manager.version(), 0);

        let snapshot = BusSnapshot {
            section: Section::Ritual,
            bar: 40,
            ..BusSnapshot::default()
        };
        manager.publish(snapshot.clone());
        manager.publish(snapshot);

        assert_eq!(manager.version(), 2);
        assert_eq!(manager.section(), Section::Ritual);
        assert_eq!(manager.snapshot().bar, 40);
    }

    #[test]
    fn test_clones_share_state() {
        let manager = StateManager::new();
        let reader = manager.clone();
        let mut snapshot = BusSnapshot::default();
        snapshot.values.insert("climate".into(), Value::Number(0.1));
        manager.publish(snapshot);
        assert_eq!(
            reader.snapshot().value("climate"),
            Some(&Value::Number(0.1))
        );
    }
}
