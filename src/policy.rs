//! The sensor-lock state machine.
//!
//! The engine holds the current [`PreferenceSnapshot`] behind an atomically
//! swapped handle and derives the effective [`LockState`] on every query by
//! comparing wall-clock time against the stored unlock expiry. There is no
//! scheduled transition out of the temporary-unlock window: the comparison
//! itself expires it, which keeps the policy correct across missed timers
//! and process restarts.

use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::prefs::{PreferenceSnapshot, PreferenceSource};
use crate::{Clock, LockState, SystemClock};

/// One engine per process, passed explicitly to the interception layer.
pub struct PolicyEngine {
    source: Box<dyn PreferenceSource>,
    clock: Arc<dyn Clock>,
    snapshot: RwLock<Arc<PreferenceSnapshot>>,
}

impl PolicyEngine {
    pub fn new(source: Box<dyn PreferenceSource>) -> Self {
        Self::with_clock(source, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Box<dyn PreferenceSource>, clock: Arc<dyn Clock>) -> Self {
        let snapshot = Arc::new(source.load());
        Self {
            source,
            clock,
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Force a fresh load from the preference source, replacing the snapshot
    /// atomically. Called on the inbound "preferences changed" signal;
    /// concurrent reloads are tolerated, the last swap wins whole.
    ///
    /// Returns the state derived from the new snapshot so callers can
    /// publish transitions.
    pub fn reload_state(&self) -> LockState {
        let fresh = Arc::new(self.source.load());
        let state = derive_state(&fresh, self.clock.now_epoch());
        let mut guard = self.snapshot.write().expect("policy snapshot poisoned");
        *guard = fresh;
        state
    }

    /// The snapshot currently in effect.
    pub fn snapshot(&self) -> Arc<PreferenceSnapshot> {
        self.snapshot
            .read()
            .expect("policy snapshot poisoned")
            .clone()
    }

    /// Effective lock state, re-derived from the snapshot and the clock on
    /// every call.
    pub fn current_state(&self) -> LockState {
        derive_state(&self.snapshot(), self.clock.now_epoch())
    }

    /// Whether a camera access by `bundle_id` must be blocked right now.
    ///
    /// The bundle identifier is accepted for future allow-listing; the
    /// current policy is bundle-agnostic.
    pub fn should_block_camera_for_bundle_id(&self, _bundle_id: Option<&str>) -> bool {
        let snap = self.snapshot();
        snap.camera_locked && derive_state(&snap, self.clock.now_epoch()) == LockState::Locked
    }

    /// Whether a microphone access by `bundle_id` must be blocked right now.
    pub fn should_block_microphone_for_bundle_id(&self, _bundle_id: Option<&str>) -> bool {
        let snap = self.snapshot();
        snap.mic_locked && derive_state(&snap, self.clock.now_epoch()) == LockState::Locked
    }

    pub fn should_block_camera(&self) -> bool {
        self.should_block_camera_for_bundle_id(None)
    }

    pub fn should_block_microphone(&self) -> bool {
        self.should_block_microphone_for_bundle_id(None)
    }

    pub fn is_camera_locked(&self) -> bool {
        self.snapshot().camera_locked
    }

    pub fn is_microphone_locked(&self) -> bool {
        self.snapshot().mic_locked
    }

    pub fn is_temporarily_unlocked(&self) -> bool {
        self.current_state() == LockState::TemporarilyUnlocked
    }

    pub fn aggressive_mode(&self) -> bool {
        self.snapshot().aggressive_mode
    }

    /// Expiry of the unlock window, if one is currently active and unexpired.
    pub fn unlock_expiry(&self) -> Option<SystemTime> {
        let snap = self.snapshot();
        if derive_state(&snap, self.clock.now_epoch()) != LockState::TemporarilyUnlocked {
            return None;
        }
        Some(UNIX_EPOCH + Duration::from_secs_f64(snap.temp_unlock_expiry))
    }

    /// Time left in the unlock window; zero when none is active. Clamped,
    /// never negative.
    pub fn remaining_unlock_time(&self) -> Duration {
        let snap = self.snapshot();
        let now = self.clock.now_epoch();
        if derive_state(&snap, now) != LockState::TemporarilyUnlocked {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((snap.temp_unlock_expiry - now).max(0.0))
    }
}

/// Pure state derivation: Disabled dominates; the Locked/TemporarilyUnlocked
/// boundary is the time comparison against the stored expiry.
fn derive_state(snapshot: &PreferenceSnapshot, now_epoch: f64) -> LockState {
    if !snapshot.enabled {
        return LockState::Disabled;
    }
    if snapshot.temp_unlock_active && now_epoch < snapshot.temp_unlock_expiry {
        return LockState::TemporarilyUnlocked;
    }
    LockState::Locked
}
