//! Controller Configuration - checks, bounds, timing, feed and sink as TOML
//!
//! Every section implements `Default`, so an empty file is a valid (if idle)
//! configuration. The check registry validates the active checks against
//! the resolved bounds separately, once the registry is built.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::registry::MissingMapping;
use crate::types::{BoundsTable, ACQ_TIME};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one controller deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Detector identification and loop timing
    #[serde(default)]
    pub controller: ControllerSection,

    /// Active quality checks and optional JSON bounds file
    #[serde(default)]
    pub checks: ChecksConfig,

    /// Inline bounds tables keyed by check id or sub-bound name
    #[serde(default)]
    pub bounds: BoundsTable,

    /// Auxiliary reading name → process variable name
    #[serde(default = "default_pvs")]
    pub pvs: HashMap<String, String>,

    /// Dispatch worker tuning
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Frame feed selection
    #[serde(default)]
    pub feed: FeedConfig,

    /// Process-value sink selection
    #[serde(default)]
    pub sink: SinkConfig,

    /// Simulated detector, used by the `simulate` feed
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Directory of the file this config was loaded from
    #[serde(skip)]
    pub source_dir: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller: ControllerSection::default(),
            checks: ChecksConfig::default(),
            bounds: BoundsTable::default(),
            pvs: default_pvs(),
            dispatch: DispatchConfig::default(),
            feed: FeedConfig::default(),
            sink: SinkConfig::default(),
            simulation: SimulationConfig::default(),
            source_dir: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration using the standard search order:
    /// 1. `$DQ_CONTROLLER_CONFIG` environment variable
    /// 2. `./controller.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), detector = %config.controller.detector, "Loaded controller config from {}", defaults::CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        // 2. Check ./controller.toml
        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(detector = %config.controller.detector, "Loaded controller config from ./{}", defaults::CONFIG_FILE_NAME);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::CONFIG_FILE_NAME);
                }
            }
        }

        // 3. Defaults
        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let mut config = Self::from_toml_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.source_dir = path.parent().map(Path::to_path_buf);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string, warning about unknown keys. Does not validate.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        // Two-pass: check for unknown keys first (warnings only)
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        toml::from_str(contents)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate value ranges and inline bounds.
    ///
    /// Errors prevent startup; warnings are only logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!("{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Final bounds table: the JSON bounds file (if any) overlaid with the
    /// inline `[bounds]` tables.
    pub fn resolve_bounds(&self) -> Result<BoundsTable, ConfigError> {
        let mut table = match &self.checks.bounds_file {
            Some(file) => {
                let path = self.resolve_path(file);
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::Io(path.clone(), e))?;
                let table = BoundsTable::from_json_str(&contents)
                    .map_err(|e| ConfigError::BoundsFile(path.clone(), e))?;
                info!(path = %path.display(), entries = table.len(), "Loaded bounds file");
                table
            }
            None => BoundsTable::new(),
        };
        table.merge(self.bounds.clone());

        let errors: Vec<String> = table
            .iter()
            .flat_map(|(name, b)| b.consistency_errors(name))
            .collect();
        if errors.is_empty() {
            Ok(table)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Resolve a config-relative path against the config file's directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.source_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Shared cooldown duration. Invalid values fall back to the default;
    /// `validate()` rejects them before this is reached.
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.controller.cooldown_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(defaults::DEFAULT_COOLDOWN_SECS))
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    BoundsFile(PathBuf, serde_json::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
    /// Active checks without a formula, bounds entry, or required bound
    Unmapped(Vec<MissingMapping>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::BoundsFile(path, e) => {
                write!(f, "Bounds file parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
            ConfigError::Unmapped(missing) => {
                writeln!(f, "Active checks are not fully mapped:")?;
                for m in missing {
                    writeln!(f, "  - {}", m)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Controller Section
// ============================================================================

/// How corrective actions are executed relative to frame ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Writes complete before the next frame is evaluated
    Inline,
    /// One serial worker per check; frames keep flowing during writes
    #[default]
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSection {
    /// Detector PV prefix (appears in logs)
    #[serde(default = "default_detector")]
    pub detector: String,

    /// Minimum time between corrective actions for the same check (seconds)
    #[serde(default = "default_cooldown_secs", alias = "adjust_time")]
    pub cooldown_secs: f64,

    #[serde(default)]
    pub dispatch_mode: DispatchMode,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            detector: default_detector(),
            cooldown_secs: default_cooldown_secs(),
            dispatch_mode: DispatchMode::default(),
        }
    }
}

// ============================================================================
// Checks
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecksConfig {
    /// Check ids to run against every frame, in order
    #[serde(default)]
    pub active: Vec<String>,

    /// JSON bounds file, relative to the config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds_file: Option<PathBuf>,
}

// ============================================================================
// Dispatch
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Pending actions buffered per check worker
    #[serde(default = "default_dispatch_capacity")]
    pub channel_capacity: usize,

    /// Upper bound on a single process-value write (ms)
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Time allowed for in-flight writes at shutdown (ms)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_dispatch_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl DispatchConfig {
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ============================================================================
// Feed
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// JSON-lines frames on stdin
    #[default]
    Stdin,
    /// JSON-lines frames replayed from a file
    File,
    /// JSON-lines frames from a TCP frame server
    Tcp,
    /// Built-in simulated detector
    Simulate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub kind: FeedKind,

    /// Replay file (`kind = "file"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Frame server `HOST:PORT` (`kind = "tcp"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,

    /// Delay between replayed frames (ms)
    #[serde(default)]
    pub delay_ms: u64,
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Log writes only (dry run)
    #[default]
    Log,
    /// JSON-lines commands to a control gateway
    Tcp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,

    /// Gateway `HOST:PORT` (`kind = "tcp"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

// ============================================================================
// Simulation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_sim_rows")]
    pub rows: usize,
    #[serde(default = "default_sim_cols")]
    pub cols: usize,
    /// Mean counts per pixel per second of exposure
    #[serde(default = "default_sim_mean_rate")]
    pub mean_rate: f64,
    /// Exposure time the simulated detector starts with (s)
    #[serde(default = "default_sim_initial_acq_time")]
    pub initial_acq_time: f64,
    #[serde(default = "default_sim_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Stop after this many frames (0 = run until cancelled)
    #[serde(default)]
    pub frames: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rows: default_sim_rows(),
            cols: default_sim_cols(),
            mean_rate: default_sim_mean_rate(),
            initial_acq_time: default_sim_initial_acq_time(),
            frame_interval_ms: default_sim_frame_interval_ms(),
            frames: 0,
        }
    }
}

// ============================================================================
// Serde default functions
// ============================================================================

fn default_detector() -> String { defaults::DEFAULT_DETECTOR.to_string() }
fn default_cooldown_secs() -> f64 { defaults::DEFAULT_COOLDOWN_SECS }
fn default_dispatch_capacity() -> usize { defaults::DISPATCH_CHANNEL_CAPACITY }
fn default_write_timeout_ms() -> u64 { defaults::WRITE_TIMEOUT_MS }
fn default_shutdown_grace_ms() -> u64 { defaults::SHUTDOWN_GRACE_MS }
fn default_sim_rows() -> usize { defaults::SIMULATION_ROWS }
fn default_sim_cols() -> usize { defaults::SIMULATION_COLS }
fn default_sim_mean_rate() -> f64 { defaults::SIMULATION_MEAN_RATE }
fn default_sim_initial_acq_time() -> f64 { defaults::SIMULATION_INITIAL_ACQ_TIME }
fn default_sim_frame_interval_ms() -> u64 { defaults::SIMULATION_FRAME_INTERVAL_MS }

fn default_pvs() -> HashMap<String, String> {
    HashMap::from([(
        ACQ_TIME.to_string(),
        format!("{}:cam1:AcquireTime", defaults::DEFAULT_DETECTOR),
    )])
}
