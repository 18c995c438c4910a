//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-system overrides keyed by alias or type name.
    #[serde(default)]
    pub systems: BTreeMap<String, SystemConfig>,
}

impl Config {
    /// Names of systems switched off by configuration.
    pub fn disabled_systems(&self) -> impl Iterator<Item = &str> {
        self.systems
            .iter()
            .filter(|(_, system)| !system.enabled)
            .map(|(name, _)| name.as_str())
    }

    /// Configured priority overrides.
    pub fn priority_overrides(&self) -> impl Iterator<Item = (&str, i32)> {
        self.systems
            .iter()
            .filter_map(|(name, system)| system.priority.map(|p| (name.as_str(), p)))
    }
}

/// Kernel startup switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Use the editor-initialize path instead of async initialization.
    #[serde(default)]
    pub editor_mode: bool,

    /// Time every update-slot call.
    #[serde(default)]
    pub profiling: bool,

    /// Only discover systems marked for the automatic scan.
    #[serde(default = "default_true")]
    pub require_auto_register: bool,

    /// Active conditional-enable symbols.
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            editor_mode: false,
            profiling: false,
            require_auto_register: default_true(),
            symbols: Vec::new(),
        }
    }
}

/// Tick loop of the reference host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Variable-rate ticks per second.
    #[serde(default = "default_tick_rate")]
    pub tick_rate: f64,

    /// Fixed-interval ticks per second.
    #[serde(default = "default_fixed_tick_rate")]
    pub fixed_tick_rate: f64,

    /// Stop after this many ticks; 0 runs until interrupted.
    #[serde(default)]
    pub max_ticks: u64,
}

fn default_tick_rate() -> f64 {
    60.0
}

fn default_fixed_tick_rate() -> f64 {
    50.0
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_rate: default_tick_rate(),
            fixed_tick_rate: default_fixed_tick_rate(),
            max_ticks: 0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for the daily log files. `~` is expanded.
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Write log files in addition to the console.
    #[serde(default = "default_true")]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("~/.keel/logs")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_directory(),
            file: default_true(),
        }
    }
}

/// Override for one system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Replaces the declared priority.
    #[serde(default)]
    pub priority: Option<i32>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            priority: None,
        }
    }
}
