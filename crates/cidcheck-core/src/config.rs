//! Configuration system for cidcheck.
//!
//! Resolution order: command-line flags → environment variables → config
//! file → defaults. Flags are applied by the binary on top of `load()`.
//!
//! Config file location:
//!   1. $CIDCHECK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cidcheck/config.toml
//!   3. ~/.config/cidcheck/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    pub probe: ProbeConfig,
    pub output: OutputConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// CIDs per want-have query.
    pub batch_size: usize,
    /// Batches in flight at once.
    pub concurrency: usize,
    /// How long a batch waits for signals before abandoning the rest.
    pub batch_timeout_secs: u64,
    /// Deadline for a single query send.
    pub send_timeout_secs: u64,
    /// Deadline for the initial connection to the peer.
    pub dial_timeout_secs: u64,
    /// Per-batch reply stream capacity.
    pub stream_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for the per-run not-found, progress and debug logs.
    pub dir: PathBuf,
    /// Also write every probe result as a JSON line.
    pub debug_log: bool,
}

/// Which resolved CIDs are handed to the export pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportSelection {
    #[default]
    NotFound,
    Found,
}

impl std::str::FromStr for ExportSelection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" | "not-found" => Ok(Self::NotFound),
            "found" => Ok(Self::Found),
            other => Err(ConfigError::Invalid(format!(
                "unknown export selection {other:?} (expected not_found or found)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    pub selection: ExportSelection,
    /// Exports running at once. Separate from, and larger than, the probe pool.
    pub concurrency: usize,
    /// External archive exporter; the CID is appended as the last argument.
    pub program: String,
    pub args: Vec<String>,
    /// Where `<cid>.car` files are written.
    pub out_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            concurrency: 5,
            batch_timeout_secs: 5,
            send_timeout_secs: 5,
            dial_timeout_secs: 3,
            stream_capacity: 64,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            debug_log: false,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            selection: ExportSelection::NotFound,
            concurrency: 500,
            program: "ipfs".to_string(),
            args: vec!["dag".to_string(), "export".to_string()],
            out_dir: PathBuf::from("."),
        }
    }
}

impl ProbeConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cidcheck")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CheckConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path; a missing file yields defaults.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            CheckConfig::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CIDCHECK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Reject settings that would stall or never admit a batch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe.batch_size == 0 {
            return Err(ConfigError::Invalid("probe.batch_size must be at least 1".into()));
        }
        if self.probe.concurrency == 0 {
            return Err(ConfigError::Invalid("probe.concurrency must be at least 1".into()));
        }
        if self.probe.stream_capacity == 0 {
            return Err(ConfigError::Invalid(
                "probe.stream_capacity must be at least 1".into(),
            ));
        }
        if self.export.enabled && self.export.concurrency == 0 {
            return Err(ConfigError::Invalid("export.concurrency must be at least 1".into()));
        }
        Ok(())
    }

    /// Apply CIDCHECK_* env var overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("CIDCHECK_PROBE__BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.probe.batch_size = n;
            }
        }
        if let Ok(v) = std::env::var("CIDCHECK_PROBE__CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.probe.concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("CIDCHECK_PROBE__BATCH_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.probe.batch_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("CIDCHECK_OUTPUT__DIR") {
            self.output.dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CIDCHECK_OUTPUT__DEBUG_LOG") {
            self.output.debug_log = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("CIDCHECK_EXPORT__ENABLED") {
            self.export.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("CIDCHECK_EXPORT__SELECTION") {
            self.export.selection = v.parse()?;
        }
        Ok(())
    }
}
