//! veild - Veil Kernel daemon
//!
//! This daemon:
//! 1. Loads the sensor-lock preferences and builds the policy engine
//! 2. Polls the preference file for modification (the "preferences changed"
//!    signal in deployments without a notification transport)
//! 3. Reloads the engine on change and publishes state-transition signals
//! 4. Re-derives the effective state every tick so a temporary unlock
//!    expiring is noticed and announced without any scheduled timer

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use veil_kernel::config::VeildConfig;
use veil_kernel::{FilePreferenceSource, LockState, LogSignalSink, PolicyEngine, Signal, SignalSink};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = VeildConfig::load()?;
    let engine = PolicyEngine::new(Box::new(FilePreferenceSource::new(&cfg.prefs_path)));
    let sink = LogSignalSink;

    let running = Arc::new(AtomicBool::new(true));
    let running_flag = running.clone();
    ctrlc::set_handler(move || {
        running_flag.store(false, Ordering::SeqCst);
    })?;

    let mut last_mtime = prefs_mtime(&cfg);
    let mut last_state = engine.current_state();

    log::info!("veild running, version {}", env!("CARGO_PKG_VERSION"));
    log::info!(
        "prefs={} log={} poll={}ms",
        cfg.prefs_path.display(),
        cfg.log_path.display(),
        cfg.poll_interval.as_millis()
    );
    log_state(last_state, &engine);

    while running.load(Ordering::SeqCst) {
        let mtime = prefs_mtime(&cfg);
        if mtime != last_mtime {
            last_mtime = mtime;
            log::debug!("preference file changed, reloading");
            sink.post(Signal::PrefsChanged);
            engine.reload_state();
        }

        // Re-derive every tick: a temporary unlock expires by comparison,
        // not by a timer, so the transition surfaces here.
        let state = engine.current_state();
        if state != last_state {
            announce_transition(last_state, state, &sink);
            log_state(state, &engine);
            last_state = state;
        }

        std::thread::sleep(cfg.poll_interval);
    }

    log::info!("veild stopped");
    Ok(())
}

fn prefs_mtime(cfg: &VeildConfig) -> Option<SystemTime> {
    std::fs::metadata(&cfg.prefs_path)
        .and_then(|meta| meta.modified())
        .ok()
}

fn announce_transition(from: LockState, to: LockState, sink: &LogSignalSink) {
    sink.post(Signal::StateChanged);
    match to {
        LockState::Locked => sink.post(Signal::Locked),
        LockState::TemporarilyUnlocked | LockState::Disabled => sink.post(Signal::Unlocked),
    }
    log::info!("state transition: {:?} -> {:?}", from, to);
}

fn log_state(state: LockState, engine: &PolicyEngine) {
    match state {
        LockState::Disabled => log::info!("state=Disabled"),
        LockState::Locked => log::info!(
            "state=Locked camera_locked={} mic_locked={} aggressive={}",
            engine.is_camera_locked(),
            engine.is_microphone_locked(),
            engine.aggressive_mode()
        ),
        LockState::TemporarilyUnlocked => log::info!(
            "state=TemporarilyUnlocked remaining={}s",
            engine.remaining_unlock_time().as_secs()
        ),
    }
}
