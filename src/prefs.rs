//! Preference snapshots and their sources.
//!
//! The settings surface (out of process) writes a small key-value document;
//! this module only ever reads it. A load can never fail toward the caller:
//! missing files, unreadable files, and malformed fields all resolve to
//! documented defaults, because the policy engine sits on the interception
//! path and must not be destabilized by preference faults.

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const PREF_KEY_ENABLED: &str = "enabled";
pub const PREF_KEY_CAMERA_LOCKED: &str = "cameraLocked";
pub const PREF_KEY_MIC_LOCKED: &str = "micLocked";
pub const PREF_KEY_TEMP_UNLOCK_ACTIVE: &str = "tempUnlockActive";
pub const PREF_KEY_TEMP_UNLOCK_EXPIRY: &str = "tempUnlockExpiry";
pub const PREF_KEY_AGGRESSIVE_MODE: &str = "aggressiveMode";

/// Immutable view of the persisted preferences. Created whole on every
/// reload; never partially mutated.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PreferenceSnapshot {
    /// Master enable flag. A missing or corrupt value means the feature is
    /// active: an absent key must never silently disarm the lock.
    #[serde(rename = "enabled")]
    pub enabled: bool,
    #[serde(rename = "cameraLocked")]
    pub camera_locked: bool,
    #[serde(rename = "micLocked")]
    pub mic_locked: bool,
    #[serde(rename = "tempUnlockActive")]
    pub temp_unlock_active: bool,
    /// Expiry of the temporary-unlock window, seconds since the epoch.
    #[serde(rename = "tempUnlockExpiry")]
    pub temp_unlock_expiry: f64,
    /// Hint for the interception layer to hook deeper entry points. The
    /// engine carries it; it does not change the block decision.
    #[serde(rename = "aggressiveMode")]
    pub aggressive_mode: bool,
}

impl Default for PreferenceSnapshot {
    fn default() -> Self {
        Self {
            enabled: true,
            camera_locked: false,
            mic_locked: false,
            temp_unlock_active: false,
            temp_unlock_expiry: 0.0,
            aggressive_mode: false,
        }
    }
}

impl PreferenceSnapshot {
    /// Decode a snapshot from a parsed key-value document.
    ///
    /// Field-tolerant: each key independently falls back to its default when
    /// absent or of the wrong shape, so one bad value cannot poison the rest
    /// of the snapshot.
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        Self {
            enabled: bool_key(value, PREF_KEY_ENABLED).unwrap_or(defaults.enabled),
            camera_locked: bool_key(value, PREF_KEY_CAMERA_LOCKED)
                .unwrap_or(defaults.camera_locked),
            mic_locked: bool_key(value, PREF_KEY_MIC_LOCKED).unwrap_or(defaults.mic_locked),
            temp_unlock_active: bool_key(value, PREF_KEY_TEMP_UNLOCK_ACTIVE)
                .unwrap_or(defaults.temp_unlock_active),
            temp_unlock_expiry: f64_key(value, PREF_KEY_TEMP_UNLOCK_EXPIRY)
                .unwrap_or(defaults.temp_unlock_expiry),
            aggressive_mode: bool_key(value, PREF_KEY_AGGRESSIVE_MODE)
                .unwrap_or(defaults.aggressive_mode),
        }
    }
}

fn bool_key(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

fn f64_key(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

/// Producer of preference snapshots.
///
/// Infallible by contract: implementations substitute defaults rather than
/// surface storage faults.
pub trait PreferenceSource: Send + Sync {
    fn load(&self) -> PreferenceSnapshot;
}

/// Reads the preference document from a fixed path.
#[derive(Clone, Debug)]
pub struct FilePreferenceSource {
    path: PathBuf,
}

impl FilePreferenceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceSource for FilePreferenceSource {
    fn load(&self) -> PreferenceSnapshot {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!(
                    "preferences unreadable at {}, using defaults: {}",
                    self.path.display(),
                    e
                );
                return PreferenceSnapshot::default();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => PreferenceSnapshot::from_value(&value),
            Err(e) => {
                log::warn!(
                    "preferences malformed at {}, using defaults: {}",
                    self.path.display(),
                    e
                );
                PreferenceSnapshot::default()
            }
        }
    }
}

/// Shared in-memory source for tests and embedders that manage preferences
/// themselves.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPreferenceSource {
    inner: Arc<Mutex<PreferenceSnapshot>>,
}

impl InMemoryPreferenceSource {
    pub fn new(snapshot: PreferenceSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
        }
    }

    /// Replace the stored snapshot. Takes effect at the engine's next reload.
    pub fn set(&self, snapshot: PreferenceSnapshot) {
        let mut guard = self.inner.lock().expect("preference source poisoned");
        *guard = snapshot;
    }
}

impl PreferenceSource for InMemoryPreferenceSource {
    fn load(&self) -> PreferenceSnapshot {
        self.inner
            .lock()
            .expect("preference source poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_keep_feature_active_and_sensors_unlocked() {
        let snap = PreferenceSnapshot::default();
        assert!(snap.enabled);
        assert!(!snap.camera_locked);
        assert!(!snap.mic_locked);
        assert!(!snap.temp_unlock_active);
        assert_eq!(snap.temp_unlock_expiry, 0.0);
        assert!(!snap.aggressive_mode);
    }

    #[test]
    fn decodes_well_formed_document() {
        let value = json!({
            "enabled": true,
            "cameraLocked": true,
            "micLocked": false,
            "tempUnlockActive": true,
            "tempUnlockExpiry": 1_700_000_000.5,
            "aggressiveMode": true,
        });
        let snap = PreferenceSnapshot::from_value(&value);
        assert!(snap.enabled);
        assert!(snap.camera_locked);
        assert!(!snap.mic_locked);
        assert!(snap.temp_unlock_active);
        assert_eq!(snap.temp_unlock_expiry, 1_700_000_000.5);
        assert!(snap.aggressive_mode);
    }

    #[test]
    fn wrong_shape_fields_fall_back_independently() {
        let value = json!({
            "enabled": "yes",
            "cameraLocked": true,
            "micLocked": 3,
            "tempUnlockExpiry": "later",
        });
        let snap = PreferenceSnapshot::from_value(&value);
        // Bad fields take defaults, the good field survives.
        assert!(snap.enabled);
        assert!(snap.camera_locked);
        assert!(!snap.mic_locked);
        assert_eq!(snap.temp_unlock_expiry, 0.0);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let source = FilePreferenceSource::new("/nonexistent/veil/settings.json");
        assert_eq!(source.load(), PreferenceSnapshot::default());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{not json").expect("write");
        let source = FilePreferenceSource::new(&path);
        assert_eq!(source.load(), PreferenceSnapshot::default());
    }

    #[test]
    fn file_source_round_trips_serialized_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let snap = PreferenceSnapshot {
            enabled: true,
            camera_locked: true,
            mic_locked: true,
            temp_unlock_active: false,
            temp_unlock_expiry: 42.0,
            aggressive_mode: false,
        };
        let json = serde_json::to_string(&snap).expect("serialize");
        std::fs::write(&path, json).expect("write");
        assert_eq!(FilePreferenceSource::new(&path).load(), snap);
    }

    #[test]
    fn in_memory_source_reflects_set() {
        let source = InMemoryPreferenceSource::default();
        let mut snap = source.load();
        assert!(snap.enabled);
        snap.camera_locked = true;
        source.set(snap.clone());
        assert_eq!(source.load(), snap);
    }
}
