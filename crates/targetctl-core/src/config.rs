//! Persistent configuration for targetctl.
//!
//! Stores user settings in `~/.targetctl/config.json`. Every field has a
//! default, so a missing or partial file is fine.
//!
//! # Example
//!
//! ```no_run
//! use targetctl_core::config::TargetctlConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = TargetctlConfig::load();
//! let termination = config.termination();
//! println!("waiting up to {:?} for processes to exit", termination.timeout);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const CONFIG_FILENAME: &str = "config.json";

/// Returns the targetctl state directory (`~/.targetctl/`).
///
/// Creates the directory if it doesn't exist.
pub fn targetctl_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".targetctl");
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_termination_timeout_ms() -> u64 {
    10_000
}

fn default_xcrun_path() -> PathBuf {
    PathBuf::from("xcrun")
}

/// Persistent targetctl configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetctlConfig {
    /// How often to re-read a target's process list while waiting for a
    /// terminated process to disappear.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long to wait for a terminated process to disappear before failing.
    #[serde(default = "default_termination_timeout_ms")]
    pub termination_timeout_ms: u64,

    /// The `xcrun` executable used by the simulator provider.
    #[serde(default = "default_xcrun_path")]
    pub xcrun_path: PathBuf,
}

impl Default for TargetctlConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            termination_timeout_ms: default_termination_timeout_ms(),
            xcrun_path: default_xcrun_path(),
        }
    }
}

impl TargetctlConfig {
    /// Load config from `~/.targetctl/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        let path = targetctl_dir().join(CONFIG_FILENAME);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.targetctl/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        let path = targetctl_dir().join(CONFIG_FILENAME);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// The termination settings derived from this config.
    pub fn termination(&self) -> TerminationConfig {
        TerminationConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.termination_timeout_ms),
        }
    }
}

/// Timing used by the [`TerminationCoordinator`](crate::termination::TerminationCoordinator)
/// while confirming that a process has gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationConfig {
    /// Delay between inventory reads.
    pub poll_interval: Duration,
    /// Upper bound on the confirmation wait.
    pub timeout: Duration,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        TargetctlConfig::default().termination()
    }
}
