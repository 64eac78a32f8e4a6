//! Layered configuration.
//!
//! The coordinator never derives paths on its own: the caller hands in a
//! [`Config`] whose defaults it chose, and that base is then overlaid by an
//! optional TOML file and by environment variables. Per-invocation flags
//! are applied last by the command surface.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default lease for a claim: two hours.
pub const DEFAULT_LEASE_MS: i64 = 2 * 60 * 60 * 1000;

/// Queue tag an item must carry to be eligible when nothing else is configured.
pub const DEFAULT_QUEUE: &str = "zsc";

/// Timings for the state-file mutual-exclusion gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    /// How long to keep polling before giving up with a lock timeout.
    pub wait: Duration,
    /// Marker age after which the holder is presumed dead.
    pub stale: Duration,
    /// Sleep between acquisition attempts.
    pub poll: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_millis(10_000),
            stale: Duration::from_millis(30_000),
            poll: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub state_path: PathBuf,
    pub lock_dir: PathBuf,
    pub gate: GateConfig,
    pub lease_ms: i64,
    pub queue: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Base configuration with built-in timings and the caller's paths.
    pub fn new(state_path: impl Into<PathBuf>, lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            lock_dir: lock_dir.into(),
            gate: GateConfig::default(),
            lease_ms: DEFAULT_LEASE_MS,
            queue: DEFAULT_QUEUE.to_string(),
            otel_endpoint: None,
            log_level: "warn".to_string(),
        }
    }

    /// Overlay `defaults` with a TOML file and then the environment.
    ///
    /// The file is `file` when given, else `WORKQ_CONFIG` if set. A missing
    /// explicit file is an error; no file at all is fine.
    pub fn load(defaults: Self, file: Option<&Path>) -> Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| env_var("WORKQ_CONFIG").map(PathBuf::from));

        let config = match file {
            Some(path) => defaults.apply_file(&path)?,
            None => defaults,
        };
        config.apply_env()
    }

    /// Overlay values found in a TOML file.
    pub fn apply_file(mut self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config {}: {e}", path.display())))?;
        let file: FileConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))?;

        if let Some(p) = file.state_path {
            self.state_path = p;
        }
        if let Some(p) = file.lock_dir {
            self.lock_dir = p;
        }
        if let Some(ms) = file.lease_ms {
            if ms < 0 {
                return Err(Error::Config(format!(
                    "bad config {}: lease_ms must be non-negative, got {ms}",
                    path.display()
                )));
            }
            self.lease_ms = ms;
        }
        if let Some(q) = file.queue {
            self.queue = q.to_lowercase();
        }
        if file.otel_endpoint.is_some() {
            self.otel_endpoint = file.otel_endpoint;
        }
        if let Some(level) = file.log_level {
            self.log_level = level;
        }
        if let Some(gate) = file.gate {
            if let Some(ms) = gate.wait_ms {
                self.gate.wait = Duration::from_millis(ms);
            }
            if let Some(ms) = gate.stale_ms {
                self.gate.stale = Duration::from_millis(ms);
            }
            if let Some(ms) = gate.poll_ms {
                self.gate.poll = Duration::from_millis(ms);
            }
        }
        Ok(self)
    }

    /// Overlay `WORKQ_*`, `OTEL_ENDPOINT` and `LOG_LEVEL` from the environment.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(p) = env_var("WORKQ_STATE") {
            self.state_path = PathBuf::from(p);
        }
        if let Some(p) = env_var("WORKQ_LOCK_DIR") {
            self.lock_dir = PathBuf::from(p);
        }
        if let Some(ms) = env_ms("WORKQ_LEASE_MS")? {
            self.lease_ms = i64::try_from(ms)
                .map_err(|_| Error::Config(format!("WORKQ_LEASE_MS out of range: {ms}")))?;
        }
        if let Some(q) = env_var("WORKQ_QUEUE") {
            self.queue = q.to_lowercase();
        }
        if let Some(ms) = env_ms("WORKQ_STATE_LOCK_WAIT_MS")? {
            self.gate.wait = Duration::from_millis(ms);
        }
        if let Some(ms) = env_ms("WORKQ_STATE_LOCK_STALE_MS")? {
            self.gate.stale = Duration::from_millis(ms);
        }
        if let Some(ms) = env_ms("WORKQ_STATE_LOCK_POLL_MS")? {
            self.gate.poll = Duration::from_millis(ms);
        }
        if let Some(endpoint) = env_var("OTEL_ENDPOINT") {
            self.otel_endpoint = Some(endpoint);
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(self)
    }
}

/// On-disk shape of the optional TOML config file.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    state_path: Option<PathBuf>,
    lock_dir: Option<PathBuf>,
    lease_ms: Option<i64>,
    queue: Option<String>,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
    gate: Option<FileGateConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct FileGateConfig {
    wait_ms: Option<u64>,
    stale_ms: Option<u64>,
    poll_ms: Option<u64>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_ms(name: &str) -> Result<Option<u64>> {
    env_var(name)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("{name} must be a non-negative integer, got {raw:?}"))
            })
        })
        .transpose()
}
