//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Configuration Loading
// ============================================================================

/// Environment variable naming the controller config file.
pub const CONFIG_ENV_VAR: &str = "DQ_CONTROLLER_CONFIG";

/// Config file looked up in the working directory when the env var is unset.
pub const CONFIG_FILE_NAME: &str = "controller.toml";

/// Detector prefix used when none is configured (areaDetector simulator).
pub const DEFAULT_DETECTOR: &str = "13SIM1";

// ============================================================================
// Pipeline
// ============================================================================

/// Cooldown between two corrective actions for the same check (seconds).
///
/// Long enough for a new exposure time to show up in the following frames.
pub const DEFAULT_COOLDOWN_SECS: f64 = 5.0;

/// Longest accepted cooldown (one day)
pub const MAX_COOLDOWN_SECS: f64 = 86_400.0;

/// Log a progress line every this many frames.
pub const PROGRESS_LOG_INTERVAL_FRAMES: u64 = 100;

// ============================================================================
// Dispatch
// ============================================================================

/// Pending corrective actions buffered per check worker.
pub const DISPATCH_CHANNEL_CAPACITY: usize = 16;

/// Maximum time a single process-value write may take (milliseconds).
pub const WRITE_TIMEOUT_MS: u64 = 2_000;

/// How long shutdown waits for in-flight writes before abandoning them (ms).
pub const SHUTDOWN_GRACE_MS: u64 = 5_000;

// ============================================================================
// Simulation
// ============================================================================

/// Simulated frame size (rows, cols).
pub const SIMULATION_ROWS: usize = 64;
pub const SIMULATION_COLS: usize = 64;

/// Mean photon counts per pixel per second of exposure.
pub const SIMULATION_MEAN_RATE: f64 = 2_000.0;

/// Exposure time the simulated detector starts with (seconds).
pub const SIMULATION_INITIAL_ACQ_TIME: f64 = 0.5;

/// Delay between simulated frames (milliseconds).
pub const SIMULATION_FRAME_INTERVAL_MS: u64 = 100;

/// Counts at which a simulated pixel saturates (16-bit detector).
pub const SIMULATION_SATURATION: f64 = 65_535.0;
