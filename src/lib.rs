//! Veil Kernel (VLK)
//!
//! This crate implements the core policy engine for camera/microphone lock
//! enforcement. An external interception layer observes processes opening
//! hardware services and asks the engine whether the access should be
//! blocked; blocked attempts are recorded for later audit.
//!
//! # Architecture
//!
//! The kernel enforces four invariants by construction:
//!
//! 1. **Best-Effort Boundary**: No error ever crosses the policy-query or
//!    audit-logging boundary. Missing or corrupt storage resolves to safe
//!    defaults, never a crash or a hang on the interception path.
//! 2. **Stateless Expiry**: The temporary-unlock window is a pure wall-clock
//!    comparison against a stored expiry. No timer has to fire for the lock
//!    to re-engage, so the policy survives missed timers and restarts.
//! 3. **Torn-Read Freedom**: Queries read an immutable snapshot behind an
//!    atomically swapped handle. A reader never observes a half-reloaded
//!    preference state.
//! 4. **Bounded Audit I/O**: Blocked-access events are deduplicated and
//!    coalesced on a private serial context; the persisted log is rewritten
//!    at most once per quiet period and trimmed to a fixed cap.
//!
//! # Module Structure
//!
//! - `classify`: service-name to sensor-category matcher
//! - `prefs`: preference snapshots and their sources
//! - `policy`: the sensor-lock state machine
//! - `audit`: debounced blocked-access log pipeline
//! - `config`: veild daemon configuration

use std::ops::BitOr;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod audit;
pub mod classify;
pub mod config;
pub mod policy;
pub mod prefs;

pub use audit::{AuditConfig, AuditPipeline, BlockLogStore, FileLogStore, InMemoryLogStore, LogEntry};
pub use classify::classify;
pub use policy::PolicyEngine;
pub use prefs::{FilePreferenceSource, InMemoryPreferenceSource, PreferenceSnapshot, PreferenceSource};

/// Default length of a temporary-unlock window, in seconds. Settings
/// surfaces writing `tempUnlockExpiry` are expected to use `now + this`
/// unless the user picked another duration.
pub const DEFAULT_UNLOCK_SECS: u64 = 300;

// -------------------- Sensor Kinds --------------------

/// Sensor category implicated by an access attempt.
///
/// Bitmask-composable: `Camera | Microphone == Both`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SensorKind {
    None,
    Camera,
    Microphone,
    Both,
}

impl SensorKind {
    const CAMERA_BIT: u8 = 1 << 0;
    const MICROPHONE_BIT: u8 = 1 << 1;

    pub fn bits(self) -> u8 {
        match self {
            SensorKind::None => 0,
            SensorKind::Camera => Self::CAMERA_BIT,
            SensorKind::Microphone => Self::MICROPHONE_BIT,
            SensorKind::Both => Self::CAMERA_BIT | Self::MICROPHONE_BIT,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & (Self::CAMERA_BIT | Self::MICROPHONE_BIT) {
            0 => SensorKind::None,
            Self::CAMERA_BIT => SensorKind::Camera,
            Self::MICROPHONE_BIT => SensorKind::Microphone,
            _ => SensorKind::Both,
        }
    }

    /// Whether `self` covers every sensor in `other`.
    pub fn contains(self, other: SensorKind) -> bool {
        self.bits() & other.bits() == other.bits()
    }
}

impl BitOr for SensorKind {
    type Output = SensorKind;

    fn bitor(self, rhs: SensorKind) -> SensorKind {
        SensorKind::from_bits(self.bits() | rhs.bits())
    }
}

// -------------------- Lock States --------------------

/// Effective lock state, derived on every query; never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    /// Master enable flag is off. Dominant over all other flags.
    Disabled,
    Locked,
    TemporarilyUnlocked,
}

// -------------------- Change Signals --------------------

/// Cross-process change notifications published by the kernel and its host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    StateChanged,
    Locked,
    Unlocked,
    PrefsChanged,
    LogUpdated,
}

impl Signal {
    /// Stable notification name for external listeners.
    pub fn name(self) -> &'static str {
        match self {
            Signal::StateChanged => "veil.state.changed",
            Signal::Locked => "veil.locked",
            Signal::Unlocked => "veil.unlocked",
            Signal::PrefsChanged => "veil.prefs.changed",
            Signal::LogUpdated => "veil.log.updated",
        }
    }
}

/// Delivery transport for outbound [`Signal`]s.
///
/// The wire mechanism (notification daemon, message bus) lives outside the
/// kernel; the core only needs something to hand a signal to.
pub trait SignalSink: Send {
    fn post(&self, signal: Signal);
}

/// Sink that reports signals through the process logger. Used by the daemon
/// binaries where no notification transport is wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSignalSink;

impl SignalSink for LogSignalSink {
    fn post(&self, signal: Signal) {
        log::info!("posted signal {}", signal.name());
    }
}

// -------------------- Clock --------------------

/// Wall-clock abstraction so expiry checks and audit timestamps are
/// deterministic under test.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_epoch(&self) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}
