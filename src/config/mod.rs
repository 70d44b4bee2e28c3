//! Controller Configuration Module
//!
//! Loads the controller configuration (active checks, bounds, cooldown,
//! feed and sink selection) from a TOML file.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `DQ_CONTROLLER_CONFIG` environment variable (path to TOML file)
//! 3. `controller.toml` in the current working directory
//! 4. Built-in defaults
//!
//! Bounds may be given inline (`[bounds.intensity_rate]`) or in the JSON
//! bounds file named by `checks.bounds_file`; inline tables win.

mod controller_config;
pub mod defaults;
pub mod validation;

pub use controller_config::*;
