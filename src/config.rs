use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PREFS_PATH: &str = "/var/lib/veil/settings.json";
const DEFAULT_LOG_PATH: &str = "/var/lib/veil/blocked.json";
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, Deserialize, Default)]
struct VeildConfigFile {
    prefs_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
    poll: Option<PollConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PollConfigFile {
    interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct VeildConfig {
    /// Preference document written by the settings surface; read-only here.
    pub prefs_path: PathBuf,
    /// Blocked-access log owned by the audit pipeline.
    pub log_path: PathBuf,
    /// How often veild checks the preference file for modification.
    pub poll_interval: Duration,
}

impl VeildConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VEIL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VeildConfigFile) -> Self {
        let prefs_path = file
            .prefs_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFS_PATH));
        let log_path = file
            .log_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH));
        let poll_interval = Duration::from_millis(
            file.poll
                .and_then(|poll| poll.interval_ms)
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        );
        Self {
            prefs_path,
            log_path,
            poll_interval,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("VEIL_PREFS_PATH") {
            if !path.trim().is_empty() {
                self.prefs_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("VEIL_LOG_PATH") {
            if !path.trim().is_empty() {
                self.log_path = PathBuf::from(path);
            }
        }
        if let Ok(interval) = std::env::var("VEIL_POLL_INTERVAL_MS") {
            let millis: u64 = interval.parse().map_err(|_| {
                anyhow!("VEIL_POLL_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.poll_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.prefs_path == self.log_path {
            return Err(anyhow!(
                "prefs_path and log_path must differ: both are {}",
                self.prefs_path.display()
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<VeildConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
