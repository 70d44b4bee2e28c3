//! Config Validation Tests
//!
//! Typo detection, range validation and startup mapping checks, exercised
//! independently from the frame pipeline.

use dq_controller::config::validation::{
    known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys,
};
use dq_controller::config::{ConfigError, ControllerConfig, DispatchMode};
use dq_controller::registry::{CheckRegistry, MissingMapping};
use dq_controller::types::BoundField;
use tokio_test::assert_ok;

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_controller_section_warns_with_suggestion() {
    let toml_str = r#"
[controller]
dispatch_mod = "inline"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert_eq!(warnings[0].field, "controller.dispatch_mod");
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("controller.dispatch_mode")
    );
}

#[test]
fn typo_in_bound_field_warns() {
    let toml_str = r#"
[bounds.Npix_oversat_cnt_rate]
tagret = 10.0
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("bounds.Npix_oversat_cnt_rate.target")
    );
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
[controller]
detector = "13SIM1"
cooldown_secs = 5.0
dispatch_mode = "worker"

[checks]
active = ["intensity_rate", "Npix_oversat_cnt_rate"]
bounds_file = "bounds.json"

[bounds.intensity_rate]
high_threshold = 100.0
target = 80.0

[pvs]
acq_time = "13SIM1:cam1:AcquireTime"

[dispatch]
channel_capacity = 8
write_timeout_ms = 1000
shutdown_grace_ms = 3000

[feed]
kind = "file"
path = "run.jsonl"
delay_ms = 10

[sink]
kind = "log"

[simulation]
rows = 32
cols = 32
frames = 100
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.is_empty(), "Expected 0 warnings, got: {:?}", warnings);
}

#[test]
fn garbage_key_has_no_suggestion() {
    let known = known_config_keys();
    assert!(suggest_correction("zzzzzzzzzzzzzzzzzz", known.iter().copied()).is_none());
}

#[test]
fn unknown_keys_do_not_break_parsing() {
    let toml_str = r#"
[controller]
detector = "2BMA"
colour = "blue"
"#;
    let config = ControllerConfig::from_toml_str(toml_str).expect("unknown keys are warnings only");
    assert_eq!(config.controller.detector, "2BMA");
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn negative_cooldown_is_rejected() {
    let mut config = ControllerConfig::default();
    config.controller.cooldown_secs = -5.0;
    let (errors, _) = validate_ranges(&config);
    assert!(errors.iter().any(|e| e.contains("cooldown_secs")));
}

#[test]
fn zero_channel_capacity_is_rejected() {
    let mut config = ControllerConfig::default();
    config.dispatch.channel_capacity = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
}

#[test]
fn validation_error_lists_every_problem() {
    let mut config = ControllerConfig::default();
    config.controller.cooldown_secs = f64::INFINITY;
    config.dispatch.write_timeout_ms = 0;
    let err = config.validate().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("cooldown_secs"));
    assert!(message.contains("write_timeout_ms"));
}

#[test]
fn load_from_file_applies_dispatch_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("controller.toml");
    std::fs::write(&path, "[controller]\ndispatch_mode = \"inline\"\n").unwrap();
    let config = ControllerConfig::load_from_file(&path).unwrap();
    assert_eq!(config.controller.dispatch_mode, DispatchMode::Inline);
    assert_eq!(config.source_dir.as_deref(), Some(dir.path()));
}

#[test]
fn load_from_file_rejects_bad_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("controller.toml");
    std::fs::write(&path, "[controller\ndetector = ").unwrap();
    assert!(matches!(
        ControllerConfig::load_from_file(&path),
        Err(ConfigError::Parse(..))
    ));
}

// ============================================================================
// Startup Mapping Checks
// ============================================================================

#[test]
fn count_check_requires_sub_bounds_table() {
    let toml_str = r#"
[checks]
active = ["Npix_undersat_cnt_rate"]

[bounds.Npix_undersat_cnt_rate]
low_threshold = 5.0
target = 10.0
"#;
    let config = ControllerConfig::from_toml_str(toml_str).unwrap();
    let bounds = config.resolve_bounds().unwrap();
    let missing = CheckRegistry::with_builtins().missing_mappings(&config.checks.active, &bounds);
    assert_eq!(
        missing,
        vec![MissingMapping::SubBounds {
            check_id: "Npix_undersat_cnt_rate".to_string(),
            table: "pix_sat_cnt_rate".to_string(),
        }]
    );
}

#[test]
fn count_check_requires_its_rate_bound() {
    let toml_str = r#"
[checks]
active = ["Npix_undersat_cnt_rate"]

[bounds.Npix_undersat_cnt_rate]
target = 10.0

[bounds.pix_sat_cnt_rate]
high_limit = 30000.0
target = 20000.0
"#;
    let config = ControllerConfig::from_toml_str(toml_str).unwrap();
    let bounds = config.resolve_bounds().unwrap();
    let err = CheckRegistry::with_builtins()
        .validate(&config.checks.active, &bounds)
        .unwrap_err();
    let ConfigError::Unmapped(missing) = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(
        missing,
        &vec![MissingMapping::BoundField {
            check_id: "Npix_undersat_cnt_rate".to_string(),
            table: "pix_sat_cnt_rate".to_string(),
            field: BoundField::LowLimit,
        }]
    );
    assert!(err.to_string().contains("bounds.pix_sat_cnt_rate.low_limit"));
}

#[test]
fn complete_config_passes_registry_validation() {
    let toml_str = r#"
[checks]
active = ["intensity_rate", "Npix_oversat_cnt_rate", "Npix_undersat_cnt_rate"]

[bounds.intensity_rate]
high_threshold = 100.0
target = 80.0

[bounds.Npix_oversat_cnt_rate]
high_threshold = 50.0
target = 10.0

[bounds.Npix_undersat_cnt_rate]
low_threshold = 5.0
target = 10.0

[bounds.pix_sat_cnt_rate]
low_limit = 10.0
high_limit = 30000.0
target = 20000.0
"#;
    let config = ControllerConfig::from_toml_str(toml_str).unwrap();
    config.validate().unwrap();
    let bounds = config.resolve_bounds().unwrap();
    assert_ok!(CheckRegistry::with_builtins().validate(&config.checks.active, &bounds));
}
