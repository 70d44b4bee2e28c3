//! Limit / threshold / target bounds per quality check

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bounds record for one check (or one sub-bound table).
///
/// Every field is optional; a missing field means no bound in that direction.
/// Limits are the hard boundary, thresholds the soft one inside them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
}

/// Individual fields of a [`Bounds`] record, used to declare requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundField {
    LowLimit,
    HighLimit,
    LowThreshold,
    HighThreshold,
    Target,
}

impl BoundField {
    pub const ALL: [Self; 5] = [
        Self::LowLimit,
        Self::HighLimit,
        Self::LowThreshold,
        Self::HighThreshold,
        Self::Target,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::LowLimit => "low_limit",
            Self::HighLimit => "high_limit",
            Self::LowThreshold => "low_threshold",
            Self::HighThreshold => "high_threshold",
            Self::Target => "target",
        }
    }
}

impl std::fmt::Display for BoundField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Bounds {
    pub fn with_low_limit(mut self, value: f64) -> Self {
        self.low_limit = Some(value);
        self
    }

    pub fn with_high_limit(mut self, value: f64) -> Self {
        self.high_limit = Some(value);
        self
    }

    pub fn with_low_threshold(mut self, value: f64) -> Self {
        self.low_threshold = Some(value);
        self
    }

    pub fn with_high_threshold(mut self, value: f64) -> Self {
        self.high_threshold = Some(value);
        self
    }

    pub fn with_target(mut self, value: f64) -> Self {
        self.target = Some(value);
        self
    }

    pub const fn get(&self, field: BoundField) -> Option<f64> {
        match field {
            BoundField::LowLimit => self.low_limit,
            BoundField::HighLimit => self.high_limit,
            BoundField::LowThreshold => self.low_threshold,
            BoundField::HighThreshold => self.high_threshold,
            BoundField::Target => self.target,
        }
    }

    /// Internal consistency problems, each prefixed with `name`.
    ///
    /// Non-finite values and inverted low/high pairs are reported; a
    /// threshold outside its limits is allowed (it simply never fires).
    pub fn consistency_errors(&self, name: &str) -> Vec<String> {
        let mut errors = Vec::new();
        for field in BoundField::ALL {
            if let Some(v) = self.get(field) {
                if !v.is_finite() {
                    errors.push(format!("bounds.{name}.{field} = {v} is not a finite number"));
                }
            }
        }
        if let (Some(lo), Some(hi)) = (self.low_limit, self.high_limit) {
            if lo > hi {
                errors.push(format!(
                    "bounds.{name}: low_limit ({lo}) must be <= high_limit ({hi})"
                ));
            }
        }
        if let (Some(lo), Some(hi)) = (self.low_threshold, self.high_threshold) {
            if lo > hi {
                errors.push(format!(
                    "bounds.{name}: low_threshold ({lo}) must be <= high_threshold ({hi})"
                ));
            }
        }
        errors
    }
}

/// Bounds keyed by check id or sub-bound table name.
///
/// Loaded once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundsTable {
    entries: HashMap<String, Bounds>,
}

impl BoundsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON bounds format: `{"intensity_rate": {"high_limit": 1e6}, ...}`.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn insert(&mut self, name: impl Into<String>, bounds: Bounds) -> Option<Bounds> {
        self.entries.insert(name.into(), bounds)
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, bounds: Bounds) -> Self {
        self.insert(name, bounds);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Bounds> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bounds)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overlay `other` on top of this table; entries in `other` win.
    pub fn merge(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_bounds_file() {
        let json = r#"{
            "intensity_rate": {"low_limit": 10.0, "high_limit": 1000.0, "target": 500},
            "pix_sat_cnt_rate": {"high_limit": 30000, "low_limit": 100, "target": 20000}
        }"#;
        let table = BoundsTable::from_json_str(json).expect("valid bounds json");
        assert_eq!(table.len(), 2);
        let ir = table.get("intensity_rate").expect("entry");
        assert_eq!(ir.low_limit, Some(10.0));
        assert_eq!(ir.target, Some(500.0));
        assert_eq!(ir.low_threshold, None);
        assert_eq!(
            table.get("pix_sat_cnt_rate").and_then(|b| b.get(BoundField::HighLimit)),
            Some(30000.0)
        );
    }

    #[test]
    fn merge_prefers_overlay() {
        let mut base = BoundsTable::new()
            .with("a", Bounds::default().with_target(1.0))
            .with("b", Bounds::default().with_target(2.0));
        base.merge(BoundsTable::new().with("a", Bounds::default().with_target(9.0)));
        assert_eq!(base.get("a").and_then(|b| b.target), Some(9.0));
        assert_eq!(base.get("b").and_then(|b| b.target), Some(2.0));
    }

    #[test]
    fn inverted_pairs_are_reported() {
        let b = Bounds::default()
            .with_low_limit(10.0)
            .with_high_limit(5.0)
            .with_low_threshold(1.0)
            .with_high_threshold(2.0);
        let errors = b.consistency_errors("intensity_rate");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("low_limit"));
    }

    #[test]
    fn non_finite_values_are_reported() {
        let b = Bounds::default().with_target(f64::NAN);
        let errors = b.consistency_errors("x");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("bounds.x.target"));
    }
}
