//! Config validation: unknown-key detection with Levenshtein suggestions
//! and value range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use crate::types::BoundField;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the set of valid fixed dotted key paths for `ControllerConfig`.
///
/// `[bounds.<name>]` and `[pvs]` have user-chosen keys and are checked
/// separately in [`validate_unknown_keys`].
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [controller]
        "controller",
        "controller.detector",
        "controller.cooldown_secs",
        "controller.adjust_time",
        "controller.dispatch_mode",
        // [checks]
        "checks",
        "checks.active",
        "checks.bounds_file",
        // [bounds], [pvs]
        "bounds",
        "pvs",
        // [dispatch]
        "dispatch",
        "dispatch.channel_capacity",
        "dispatch.write_timeout_ms",
        "dispatch.shutdown_grace_ms",
        // [feed]
        "feed",
        "feed.kind",
        "feed.path",
        "feed.addr",
        "feed.delay_ms",
        // [sink]
        "sink",
        "sink.kind",
        "sink.addr",
        // [simulation]
        "simulation",
        "simulation.rows",
        "simulation.cols",
        "simulation.mean_rate",
        "simulation.initial_acq_time",
        "simulation.frame_interval_ms",
        "simulation.frames",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest candidate for an unknown key, if within edit distance 3.
pub fn suggest_correction<'a>(
    unknown: &str,
    known: impl IntoIterator<Item = &'a str>,
) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for k in known {
        let dist = levenshtein(unknown, k);
        if dist > 3 {
            continue;
        }
        match best {
            Some((_, best_dist)) if dist >= best_dist => {}
            _ => best = Some((k, dist)),
        }
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys; it only warns. Under `[bounds.<name>]`
/// only the five bound field names are accepted; `[pvs]` accepts anything.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    let mut warnings = Vec::new();

    for key in walk_toml_keys(&value, "") {
        if known.contains(key.as_str()) || key.starts_with("pvs.") {
            continue;
        }
        if let Some(rest) = key.strip_prefix("bounds.") {
            if let Some(w) = check_bounds_key(&key, rest) {
                warnings.push(w);
            }
            continue;
        }
        let suggestion = suggest_correction(&key, known.iter().copied());
        warnings.push(ValidationWarning {
            message: format!("Unknown config key '{key}'"),
            field: key,
            suggestion,
        });
    }

    warnings
}

/// `rest` is the part after `bounds.`: either `<name>` or `<name>.<field>`.
fn check_bounds_key(key: &str, rest: &str) -> Option<ValidationWarning> {
    let (table, field) = rest.split_once('.')?;
    if BoundField::ALL.iter().any(|f| f.name() == field) {
        return None;
    }
    let suggestion = suggest_correction(field, BoundField::ALL.iter().map(|f| f.name()))
        .map(|s| format!("bounds.{table}.{s}"));
    Some(ValidationWarning {
        field: key.to_string(),
        message: format!("Unknown bound field '{key}'"),
        suggestion,
    })
}

// ============================================================================
// Range Validation
// ============================================================================

/// Validate value ranges on a parsed `ControllerConfig`.
///
/// Returns (errors, warnings): errors are impossible values that must
/// prevent startup; warnings are suspicious but not fatal.
pub fn validate_ranges(config: &super::ControllerConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let cooldown = config.controller.cooldown_secs;
    if !cooldown.is_finite() || cooldown < 0.0 {
        errors.push(format!(
            "controller.cooldown_secs = {cooldown} must be a finite number >= 0"
        ));
    } else if cooldown > super::defaults::MAX_COOLDOWN_SECS {
        errors.push(format!(
            "controller.cooldown_secs = {cooldown} exceeds the maximum of {} seconds",
            super::defaults::MAX_COOLDOWN_SECS
        ));
    } else if cooldown > 3600.0 {
        warnings.push(ValidationWarning {
            field: "controller.cooldown_secs".to_string(),
            message: format!("controller.cooldown_secs = {cooldown:.0} is over an hour"),
            suggestion: None,
        });
    }

    if config.controller.detector.trim().is_empty() {
        errors.push("controller.detector must not be empty".to_string());
    }

    let mut seen = HashSet::new();
    for id in &config.checks.active {
        if !seen.insert(id.as_str()) {
            errors.push(format!("checks.active lists '{id}' more than once"));
        }
    }
    if config.checks.active.is_empty() {
        warnings.push(ValidationWarning {
            field: "checks.active".to_string(),
            message: "checks.active is empty; frames will be read but never evaluated".to_string(),
            suggestion: None,
        });
    }

    for (name, bounds) in config.bounds.iter() {
        errors.extend(bounds.consistency_errors(name));
    }

    if config.dispatch.channel_capacity == 0 {
        errors.push("dispatch.channel_capacity must be > 0".to_string());
    }
    if config.dispatch.write_timeout_ms == 0 {
        errors.push("dispatch.write_timeout_ms must be > 0".to_string());
    }

    match config.feed.kind {
        super::FeedKind::File if config.feed.path.is_none() => {
            errors.push("feed.kind = \"file\" requires feed.path".to_string());
        }
        super::FeedKind::Tcp if config.feed.addr.is_none() => {
            errors.push("feed.kind = \"tcp\" requires feed.addr".to_string());
        }
        _ => {}
    }
    if config.sink.kind == super::SinkKind::Tcp && config.sink.addr.is_none() {
        errors.push("sink.kind = \"tcp\" requires sink.addr".to_string());
    }

    let sim = &config.simulation;
    if sim.rows == 0 || sim.cols == 0 {
        errors.push(format!(
            "simulation.rows x simulation.cols = {}x{} must be non-empty",
            sim.rows, sim.cols
        ));
    }
    if !sim.mean_rate.is_finite() || sim.mean_rate <= 0.0 {
        errors.push(format!("simulation.mean_rate = {} must be > 0", sim.mean_rate));
    }
    if !sim.initial_acq_time.is_finite() || sim.initial_acq_time <= 0.0 {
        errors.push(format!(
            "simulation.initial_acq_time = {} must be > 0",
            sim.initial_acq_time
        ));
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
