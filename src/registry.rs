//! Check registry: check id → (evaluation formula, adjustment formula)
//!
//! Built once at startup and validated against the active-check list and the
//! bounds table before the first frame is processed. A check id that cannot
//! be evaluated *and* adjusted is a configuration error.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::config::ConfigError;
use crate::monitoring::checks::{
    self, INTENSITY_RATE, NPIX_OVERSAT_CNT_RATE, NPIX_UNDERSAT_CNT_RATE, PIX_SAT_CNT_RATE,
};
use crate::monitoring::{CheckInput, EvaluationError, Verdict};
use crate::response::adjusters::{self, Adjustment};
use crate::response::DispatchError;
use crate::types::{BoundField, Bounds, BoundsTable, CheckEvent, CheckId};

/// Evaluation formula signature.
pub type EvaluateFn = fn(&CheckInput<'_>) -> Result<Verdict, EvaluationError>;

/// Adjustment formula signature.
pub type AdjustFn = fn(&CheckEvent, &Bounds) -> Result<Adjustment, DispatchError>;

/// Secondary bounds table a check reads per-pixel bounds from.
#[derive(Debug, Clone, Copy)]
pub struct SubBoundSpec {
    pub table: &'static str,
    pub required: &'static [BoundField],
}

/// One registered check / adjustment pair.
#[derive(Clone, Copy)]
pub struct CheckSpec {
    pub evaluate: EvaluateFn,
    pub adjust: AdjustFn,
    /// Fields that must be present in the check's own bounds entry
    pub required: &'static [BoundField],
    pub sub_bounds: Option<SubBoundSpec>,
}

impl fmt::Debug for CheckSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckSpec")
            .field("required", &self.required)
            .field("sub_bounds", &self.sub_bounds)
            .finish_non_exhaustive()
    }
}

/// A mapping the active configuration needs but does not have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingMapping {
    /// No formula pair registered under this id
    Formula(CheckId),
    /// No bounds entry for this id
    Bounds(CheckId),
    /// Sub-bound table required by a check is absent
    SubBounds { check_id: CheckId, table: String },
    /// A bounds entry lacks a field the check reads
    BoundField {
        check_id: CheckId,
        table: String,
        field: BoundField,
    },
    /// Id listed more than once in the active checks
    Duplicate(CheckId),
}

impl MissingMapping {
    pub fn check_id(&self) -> &str {
        match self {
            Self::Formula(id) | Self::Bounds(id) | Self::Duplicate(id) => id,
            Self::SubBounds { check_id, .. } | Self::BoundField { check_id, .. } => check_id,
        }
    }
}

impl fmt::Display for MissingMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Formula(id) => write!(f, "check '{id}' has no registered check/adjustment formula"),
            Self::Bounds(id) => write!(f, "check '{id}' has no entry in the bounds table"),
            Self::SubBounds { check_id, table } => {
                write!(f, "check '{check_id}' requires bounds table '{table}'")
            }
            Self::BoundField {
                check_id,
                table,
                field,
            } => write!(f, "check '{check_id}' requires bounds.{table}.{field}"),
            Self::Duplicate(id) => write!(f, "check '{id}' is listed more than once"),
        }
    }
}

/// Registered checks keyed by id.
#[derive(Debug, Clone, Default)]
pub struct CheckRegistry {
    checks: HashMap<CheckId, CheckSpec>,
}

impl CheckRegistry {
    /// Registry with no checks.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the three built-in detector checks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(
            INTENSITY_RATE,
            CheckSpec {
                evaluate: checks::intensity_rate,
                adjust: adjusters::intensity_rate_adj,
                required: &[BoundField::Target],
                sub_bounds: None,
            },
        );
        registry.register(
            NPIX_OVERSAT_CNT_RATE,
            CheckSpec {
                evaluate: checks::npix_oversat_cnt_rate,
                adjust: adjusters::npix_oversat_cnt_rate_adj,
                required: &[BoundField::Target],
                sub_bounds: Some(SubBoundSpec {
                    table: PIX_SAT_CNT_RATE,
                    required: &[BoundField::HighLimit, BoundField::Target],
                }),
            },
        );
        registry.register(
            NPIX_UNDERSAT_CNT_RATE,
            CheckSpec {
                evaluate: checks::npix_undersat_cnt_rate,
                adjust: adjusters::npix_undersat_cnt_rate_adj,
                required: &[BoundField::Target],
                sub_bounds: Some(SubBoundSpec {
                    table: PIX_SAT_CNT_RATE,
                    required: &[BoundField::LowLimit, BoundField::Target],
                }),
            },
        );
        registry
    }

    /// Register (or replace) a check. Returns the replaced spec.
    pub fn register(&mut self, check_id: impl Into<CheckId>, spec: CheckSpec) -> Option<CheckSpec> {
        self.checks.insert(check_id.into(), spec)
    }

    pub fn get(&self, check_id: &str) -> Option<&CheckSpec> {
        self.checks.get(check_id)
    }

    pub fn contains(&self, check_id: &str) -> bool {
        self.checks.contains_key(check_id)
    }

    /// Registered ids, sorted for stable log output.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.checks.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Every mapping `active_checks` needs from this registry and `bounds`
    /// that is missing. Empty when the configuration is complete.
    pub fn missing_mappings(
        &self,
        active_checks: &[CheckId],
        bounds: &BoundsTable,
    ) -> Vec<MissingMapping> {
        let mut missing = Vec::new();
        let mut seen = HashSet::new();

        for check_id in active_checks {
            if !seen.insert(check_id.as_str()) {
                missing.push(MissingMapping::Duplicate(check_id.clone()));
                continue;
            }
            let Some(spec) = self.get(check_id) else {
                missing.push(MissingMapping::Formula(check_id.clone()));
                continue;
            };

            match bounds.get(check_id) {
                Some(own) => {
                    missing.extend(missing_fields(check_id, check_id, own, spec.required));
                }
                None => missing.push(MissingMapping::Bounds(check_id.clone())),
            }

            if let Some(sub) = spec.sub_bounds {
                match bounds.get(sub.table) {
                    Some(table) => {
                        missing.extend(missing_fields(check_id, sub.table, table, sub.required));
                    }
                    None => missing.push(MissingMapping::SubBounds {
                        check_id: check_id.clone(),
                        table: sub.table.to_string(),
                    }),
                }
            }
        }

        missing
    }

    /// Startup gate: reject the configuration if any mapping is missing.
    pub fn validate(&self, active_checks: &[CheckId], bounds: &BoundsTable) -> Result<(), ConfigError> {
        let missing = self.missing_mappings(active_checks, bounds);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Unmapped(missing))
        }
    }
}

fn missing_fields<'a>(
    check_id: &'a str,
    table: &'a str,
    bounds: &'a Bounds,
    required: &'a [BoundField],
) -> impl Iterator<Item = MissingMapping> + 'a {
    required
        .iter()
        .filter(|field| bounds.get(**field).is_none())
        .map(move |field| MissingMapping::BoundField {
            check_id: check_id.to_string(),
            table: table.to_string(),
            field: *field,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_bounds() -> BoundsTable {
        BoundsTable::new()
            .with(INTENSITY_RATE, Bounds::default().with_high_threshold(100.0).with_target(80.0))
            .with(NPIX_OVERSAT_CNT_RATE, Bounds::default().with_high_limit(10.0).with_target(5.0))
            .with(
                PIX_SAT_CNT_RATE,
                Bounds::default()
                    .with_low_limit(100.0)
                    .with_high_limit(30_000.0)
                    .with_target(20_000.0),
            )
    }

    #[test]
    fn builtins_cover_the_detector_checks() {
        let registry = CheckRegistry::with_builtins();
        assert_eq!(
            registry.ids(),
            vec![NPIX_OVERSAT_CNT_RATE, NPIX_UNDERSAT_CNT_RATE, INTENSITY_RATE]
        );
    }

    #[test]
    fn complete_configuration_validates() {
        let registry = CheckRegistry::with_builtins();
        let active = vec![INTENSITY_RATE.to_string(), NPIX_OVERSAT_CNT_RATE.to_string()];
        assert!(registry.validate(&active, &complete_bounds()).is_ok());
    }

    #[test]
    fn missing_bounds_entry_names_the_check() {
        let registry = CheckRegistry::with_builtins();
        let active = vec![NPIX_UNDERSAT_CNT_RATE.to_string()];
        let bounds = BoundsTable::new();
        let missing = registry.missing_mappings(&active, &bounds);
        assert_eq!(
            missing,
            vec![
                MissingMapping::Bounds(NPIX_UNDERSAT_CNT_RATE.to_string()),
                MissingMapping::SubBounds {
                    check_id: NPIX_UNDERSAT_CNT_RATE.to_string(),
                    table: PIX_SAT_CNT_RATE.to_string(),
                },
            ]
        );
        let err = registry.validate(&active, &bounds).expect_err("must reject");
        assert!(err.to_string().contains(NPIX_UNDERSAT_CNT_RATE));
    }

    #[test]
    fn unknown_check_id_is_rejected() {
        let registry = CheckRegistry::with_builtins();
        let missing = registry.missing_mappings(&["focus_score".to_string()], &complete_bounds());
        assert_eq!(missing, vec![MissingMapping::Formula("focus_score".to_string())]);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let registry = CheckRegistry::with_builtins();
        let bounds = BoundsTable::new().with(INTENSITY_RATE, Bounds::default().with_high_limit(1.0));
        let missing = registry.missing_mappings(&[INTENSITY_RATE.to_string()], &bounds);
        assert_eq!(
            missing,
            vec![MissingMapping::BoundField {
                check_id: INTENSITY_RATE.to_string(),
                table: INTENSITY_RATE.to_string(),
                field: BoundField::Target,
            }]
        );
    }

    #[test]
    fn duplicate_active_check_is_rejected() {
        let registry = CheckRegistry::with_builtins();
        let active = vec![INTENSITY_RATE.to_string(), INTENSITY_RATE.to_string()];
        let missing = registry.missing_mappings(&active, &complete_bounds());
        assert_eq!(missing, vec![MissingMapping::Duplicate(INTENSITY_RATE.to_string())]);
    }

    #[test]
    fn custom_checks_can_be_registered() {
        fn always_high(input: &CheckInput<'_>) -> Result<Verdict, EvaluationError> {
            checks::intensity_rate(input).map(|mut v| {
                v.classification = crate::types::Classification::HighLimit;
                v
            })
        }

        let mut registry = CheckRegistry::with_builtins();
        let replaced = registry.register(
            "always_high",
            CheckSpec {
                evaluate: always_high,
                adjust: adjusters::intensity_rate_adj,
                required: &[],
                sub_bounds: None,
            },
        );
        assert!(replaced.is_none());
        assert!(registry.contains("always_high"));
    }
}
