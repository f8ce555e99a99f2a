//! Debounced blocked-access log pipeline.
//!
//! Recording a blocked access must never slow down the interception path, so
//! [`AuditPipeline::record_blocked_access`] only posts a message into a
//! private worker thread and returns. The worker owns the pending buffer and
//! the flush deadline; dedup, insertion, and flush scheduling are therefore
//! strictly ordered no matter how many threads record concurrently.
//!
//! A burst of distinct events keeps pushing the flush deadline out, so the
//! persisted log is rewritten at most once per quiet period. The persisted
//! log is newest-first and trimmed to [`AuditConfig::max_entries`] on every
//! flush.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::{Clock, Signal, SignalSink, SystemClock};

/// Sentinel bundle identifier for callers that could not resolve one.
pub const UNKNOWN_BUNDLE_ID: &str = "Unknown";
/// Sentinel sensor type for callers that could not resolve one.
pub const UNKNOWN_KIND: &str = "unknown";

/// One blocked-access observation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    #[serde(rename = "bundleID")]
    pub bundle_id: String,
    /// "camera" or "microphone".
    #[serde(rename = "type")]
    pub kind: String,
    /// Seconds since the epoch at record time.
    pub timestamp: f64,
}

/// Timing and capacity contract of the pipeline. The defaults are the
/// production behavior; tests compress them.
#[derive(Clone, Copy, Debug)]
pub struct AuditConfig {
    /// Quiet period after the last distinct event before a flush runs.
    pub debounce: Duration,
    /// Two events with equal (bundle, kind) within this many seconds are one.
    pub dedup_window: f64,
    /// Persisted log cap, enforced on every flush.
    pub max_entries: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            dedup_window: 1.0,
            max_entries: 100,
        }
    }
}

/// Persistence collaborator for the blocked-access log.
///
/// `load` is best-effort: absent or corrupt storage reads as empty, in line
/// with the rest of the kernel's storage-fault handling.
pub trait BlockLogStore: Send {
    fn load(&self) -> Vec<LogEntry>;
    fn replace(&mut self, entries: &[LogEntry]) -> Result<()>;
}

/// Newest-first JSON array at a fixed path, replaced atomically on flush.
#[derive(Clone, Debug)]
pub struct FileLogStore {
    path: PathBuf,
}

impl FileLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockLogStore for FileLogStore {
    fn load(&self) -> Vec<LogEntry> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(
                    "blocked-access log malformed at {}, treating as empty: {}",
                    self.path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    fn replace(&mut self, entries: &[LogEntry]) -> Result<()> {
        let json = serde_json::to_vec(entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| anyhow!("failed to write {}: {}", tmp.display(), e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| anyhow!("failed to replace {}: {}", self.path.display(), e))?;
        Ok(())
    }
}

/// In-memory store with shared handles so tests can observe flushes.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLogStore {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    replace_calls: Arc<AtomicUsize>,
    fail_replace: Arc<AtomicBool>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().expect("log store poisoned").clone()
    }

    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    /// Make subsequent `replace` calls fail, for write-fault tests.
    pub fn set_fail_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::SeqCst);
    }
}

impl BlockLogStore for InMemoryLogStore {
    fn load(&self) -> Vec<LogEntry> {
        self.entries()
    }

    fn replace(&mut self, entries: &[LogEntry]) -> Result<()> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(anyhow!("injected replace failure"));
        }
        let mut guard = self.entries.lock().expect("log store poisoned");
        *guard = entries.to_vec();
        Ok(())
    }
}

enum Command {
    Record { bundle_id: String, kind: String },
    Shutdown,
}

/// Handle to the pipeline worker. Cloneable senders are not exposed; callers
/// share the handle itself (it only needs `&self`).
pub struct AuditPipeline {
    tx: Sender<Command>,
    join: Option<JoinHandle<()>>,
}

impl AuditPipeline {
    pub fn spawn(store: Box<dyn BlockLogStore>, sink: Box<dyn SignalSink>) -> Self {
        Self::spawn_with_clock(store, sink, Arc::new(SystemClock), AuditConfig::default())
    }

    pub fn spawn_with_clock(
        store: Box<dyn BlockLogStore>,
        sink: Box<dyn SignalSink>,
        clock: Arc<dyn Clock>,
        cfg: AuditConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            store,
            sink,
            clock,
            cfg,
            pending: Vec::new(),
        };
        let join = std::thread::spawn(move || worker.run(rx));
        Self {
            tx,
            join: Some(join),
        }
    }

    /// Record a blocked access. Fire-and-forget: returns immediately, safe
    /// from any thread, never rejects a call. Missing fields normalize to
    /// sentinels rather than dropping the event.
    pub fn record_blocked_access(&self, bundle_id: Option<&str>, kind: Option<&str>) {
        let cmd = Command::Record {
            bundle_id: bundle_id.unwrap_or(UNKNOWN_BUNDLE_ID).to_string(),
            kind: kind.unwrap_or(UNKNOWN_KIND).to_string(),
        };
        // A closed channel means the worker is gone; logging is best-effort.
        let _ = self.tx.send(cmd);
    }

    /// Flush whatever is pending and join the worker. The process-lifetime
    /// singleton case never calls this; tests and clean daemon shutdown do.
    pub fn stop(mut self) -> Result<()> {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("audit pipeline worker panicked"))?;
        }
        Ok(())
    }
}

struct Worker {
    store: Box<dyn BlockLogStore>,
    sink: Box<dyn SignalSink>,
    clock: Arc<dyn Clock>,
    cfg: AuditConfig,
    pending: Vec<LogEntry>,
}

impl Worker {
    fn run(mut self, rx: Receiver<Command>) {
        // The flush deadline is the one-shot timer: re-arming it on a
        // genuine append replaces the previous schedule.
        let mut deadline: Option<Instant> = None;
        loop {
            let cmd = match deadline {
                Some(due) => {
                    let now = Instant::now();
                    if now >= due {
                        self.flush();
                        deadline = None;
                        continue;
                    }
                    match rx.recv_timeout(due - now) {
                        Ok(cmd) => cmd,
                        Err(RecvTimeoutError::Timeout) => {
                            self.flush();
                            deadline = None;
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                },
            };
            match cmd {
                Command::Record { bundle_id, kind } => {
                    if self.append(bundle_id, kind) {
                        deadline = Some(Instant::now() + self.cfg.debounce);
                    }
                }
                Command::Shutdown => break,
            }
        }
        // Drain on shutdown or handle drop rather than losing the tail.
        self.flush();
    }

    /// Append unless an equal (bundle, kind) entry sits within the dedup
    /// window. Returns whether the event was genuinely appended.
    fn append(&mut self, bundle_id: String, kind: String) -> bool {
        let now = self.clock.now_epoch();
        let duplicate = self.pending.iter().any(|entry| {
            entry.bundle_id == bundle_id
                && entry.kind == kind
                && (now - entry.timestamp).abs() < self.cfg.dedup_window
        });
        if duplicate {
            return false;
        }
        self.pending.push(LogEntry {
            bundle_id,
            kind,
            timestamp: now,
        });
        true
    }

    /// Merge pending entries into the persisted log: pending first in
    /// accumulation order (they are newer than everything on disk), then the
    /// old entries, trimmed to the cap. No-op when nothing is pending.
    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut merged = std::mem::take(&mut self.pending);
        merged.extend(self.store.load());
        merged.truncate(self.cfg.max_entries);
        match self.store.replace(&merged) {
            Ok(()) => self.sink.post(Signal::LogUpdated),
            // Best-effort logging: the buffer stays cleared, no retry.
            Err(e) => log::warn!("blocked-access log flush failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ManualClock(Mutex<f64>);

    impl ManualClock {
        fn new(start: f64) -> Arc<Self> {
            Arc::new(Self(Mutex::new(start)))
        }

        fn advance(&self, secs: f64) {
            *self.0.lock().unwrap() += secs;
        }
    }

    impl Clock for ManualClock {
        fn now_epoch(&self) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Clone, Default)]
    struct CapturingSink(Arc<Mutex<Vec<Signal>>>);

    impl SignalSink for CapturingSink {
        fn post(&self, signal: Signal) {
            self.0.lock().unwrap().push(signal);
        }
    }

    impl CapturingSink {
        fn posted(&self) -> Vec<Signal> {
            self.0.lock().unwrap().clone()
        }
    }

    fn worker(
        store: InMemoryLogStore,
        sink: CapturingSink,
        clock: Arc<ManualClock>,
    ) -> Worker {
        Worker {
            store: Box::new(store),
            sink: Box::new(sink),
            clock,
            cfg: AuditConfig::default(),
            pending: Vec::new(),
        }
    }

    fn entry(bundle_id: &str, kind: &str, timestamp: f64) -> LogEntry {
        LogEntry {
            bundle_id: bundle_id.to_string(),
            kind: kind.to_string(),
            timestamp,
        }
    }

    #[test]
    fn duplicate_within_window_is_dropped() {
        let clock = ManualClock::new(1000.0);
        let mut w = worker(
            InMemoryLogStore::new(),
            CapturingSink::default(),
            clock.clone(),
        );
        assert!(w.append("com.app.x".into(), "camera".into()));
        clock.advance(0.5);
        assert!(!w.append("com.app.x".into(), "camera".into()));
        assert_eq!(w.pending.len(), 1);
    }

    #[test]
    fn same_pair_outside_window_is_distinct() {
        let clock = ManualClock::new(1000.0);
        let mut w = worker(
            InMemoryLogStore::new(),
            CapturingSink::default(),
            clock.clone(),
        );
        assert!(w.append("com.app.x".into(), "camera".into()));
        clock.advance(1.5);
        assert!(w.append("com.app.x".into(), "camera".into()));
        assert_eq!(w.pending.len(), 2);
    }

    #[test]
    fn different_bundle_or_kind_never_dedups() {
        let clock = ManualClock::new(1000.0);
        let mut w = worker(
            InMemoryLogStore::new(),
            CapturingSink::default(),
            clock.clone(),
        );
        assert!(w.append("com.app.x".into(), "camera".into()));
        assert!(w.append("com.app.x".into(), "microphone".into()));
        assert!(w.append("com.app.y".into(), "camera".into()));
        assert_eq!(w.pending.len(), 3);
    }

    #[test]
    fn flush_prepends_pending_and_trims_to_cap() {
        let clock = ManualClock::new(2000.0);
        let store = InMemoryLogStore::new();
        let mut seeded: Vec<LogEntry> = (0..98)
            .map(|i| entry(&format!("com.old.{i}"), "camera", 1000.0 - i as f64))
            .collect();
        {
            let mut s = store.clone();
            s.replace(&seeded).unwrap();
        }
        let sink = CapturingSink::default();
        let mut w = worker(store.clone(), sink.clone(), clock.clone());
        for i in 0..5 {
            assert!(w.append(format!("com.new.{i}"), "camera".into()));
            clock.advance(2.0);
        }
        w.flush();

        let persisted = store.entries();
        assert_eq!(persisted.len(), 100);
        for (i, entry) in persisted.iter().take(5).enumerate() {
            assert_eq!(entry.bundle_id, format!("com.new.{i}"));
        }
        assert_eq!(persisted[5].bundle_id, "com.old.0");
        // The two oldest persisted entries fell off the end.
        seeded.truncate(95);
        assert_eq!(&persisted[5..], seeded.as_slice());
        assert!(w.pending.is_empty());
        assert_eq!(sink.posted(), vec![Signal::LogUpdated]);
    }

    #[test]
    fn empty_flush_is_a_no_op() {
        let store = InMemoryLogStore::new();
        let sink = CapturingSink::default();
        let mut w = worker(store.clone(), sink.clone(), ManualClock::new(0.0));
        w.flush();
        assert_eq!(store.replace_calls(), 0);
        assert!(sink.posted().is_empty());
    }

    #[test]
    fn failed_flush_clears_buffer_and_posts_nothing() {
        let store = InMemoryLogStore::new();
        store.set_fail_replace(true);
        let sink = CapturingSink::default();
        let mut w = worker(store.clone(), sink.clone(), ManualClock::new(0.0));
        assert!(w.append("com.app.x".into(), "camera".into()));
        w.flush();

        assert_eq!(store.replace_calls(), 1);
        assert!(store.entries().is_empty());
        assert!(w.pending.is_empty());
        assert!(sink.posted().is_empty());

        // Nothing left to flush, so the failure is not retried.
        w.flush();
        assert_eq!(store.replace_calls(), 1);
    }

    #[test]
    fn log_entries_use_the_persisted_key_names() {
        let json = serde_json::to_string(&entry("com.app.x", "camera", 12.5)).unwrap();
        assert!(json.contains("\"bundleID\":\"com.app.x\""));
        assert!(json.contains("\"type\":\"camera\""));
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry("com.app.x", "camera", 12.5));
    }
}
