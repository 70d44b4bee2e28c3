//! Monitoring: run the active quality checks against each frame
//!
//! The [`Evaluator`] is formula-agnostic. It looks every active check up in
//! the [`CheckRegistry`](crate::registry::CheckRegistry), hands the formula
//! the frame plus its bounds, and turns alert verdicts into [`CheckEvent`]s.
//! A check that cannot be computed is skipped and reported as a diagnostic;
//! the remaining checks still run.

pub mod checks;

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::registry::CheckRegistry;
use crate::types::{
    BoundField, Bounds, BoundsTable, CheckEvent, CheckId, Classification, EventPayload,
    FrameObservation,
};

/// Per-check evaluation failures. Never fatal for the frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("missing auxiliary reading '{0}'")]
    MissingReading(String),

    #[error("elapsed time from {pv} is {value}, cannot divide by it")]
    InvalidElapsedTime { pv: String, value: f64 },

    #[error("frame has no pixels ({rows}x{cols})")]
    EmptyFrame { rows: usize, cols: usize },

    #[error("bounds table '{0}' not found")]
    MissingBoundsTable(String),

    #[error("bounds '{table}' has no {field}")]
    MissingBound { table: String, field: BoundField },

    #[error("check result is not finite ({0})")]
    NonFiniteResult(f64),

    #[error("no formula registered for check")]
    UnknownCheck,
}

/// What a check formula is handed.
pub struct CheckInput<'a> {
    pub frame: &'a FrameObservation,
    /// The check's own bounds entry
    pub bounds: &'a Bounds,
    /// The sub-bound table the check declared, if any
    pub sub_bounds: Option<&'a Bounds>,
}

/// What a check formula returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub classification: Classification,
    pub payload: EventPayload,
}

/// A skipped check, with enough context to find the frame again.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckDiagnostic {
    pub check_id: CheckId,
    pub frame_id: u64,
    pub error: EvaluationError,
}

impl std::fmt::Display for CheckDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "check '{}' skipped for frame {}: {}",
            self.check_id, self.frame_id, self.error
        )
    }
}

/// Result of evaluating one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Checks in the alert band, in active-list order
    pub events: Vec<CheckEvent>,
    pub diagnostics: Vec<CheckDiagnostic>,
}

/// Runs check formulas against frames.
#[derive(Clone)]
pub struct Evaluator {
    registry: Arc<CheckRegistry>,
}

impl Evaluator {
    pub const fn new(registry: Arc<CheckRegistry>) -> Self {
        Self { registry }
    }

    /// Evaluate every check in `active_checks` against `frame`.
    pub fn evaluate(
        &self,
        frame: &FrameObservation,
        active_checks: &[CheckId],
        bounds: &BoundsTable,
    ) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for check_id in active_checks {
            match self.evaluate_one(frame, check_id, bounds) {
                Ok(verdict) if verdict.classification.is_alert() => {
                    debug!(
                        check_id = %check_id,
                        frame_id = frame.frame_id,
                        classification = %verdict.classification,
                        "Check out of bounds"
                    );
                    evaluation.events.push(CheckEvent {
                        check_id: check_id.clone(),
                        classification: verdict.classification,
                        frame_id: frame.frame_id,
                        payload: verdict.payload,
                    });
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(
                        check_id = %check_id,
                        frame_id = frame.frame_id,
                        error = %error,
                        "Check skipped"
                    );
                    evaluation.diagnostics.push(CheckDiagnostic {
                        check_id: check_id.clone(),
                        frame_id: frame.frame_id,
                        error,
                    });
                }
            }
        }

        evaluation
    }

    fn evaluate_one(
        &self,
        frame: &FrameObservation,
        check_id: &str,
        bounds: &BoundsTable,
    ) -> Result<Verdict, EvaluationError> {
        let spec = self
            .registry
            .get(check_id)
            .ok_or(EvaluationError::UnknownCheck)?;
        let own = bounds
            .get(check_id)
            .ok_or_else(|| EvaluationError::MissingBoundsTable(check_id.to_string()))?;
        let sub_bounds = match spec.sub_bounds {
            Some(sub) => Some(
                bounds
                    .get(sub.table)
                    .ok_or_else(|| EvaluationError::MissingBoundsTable(sub.table.to_string()))?,
            ),
            None => None,
        };

        (spec.evaluate)(&CheckInput {
            frame,
            bounds: own,
            sub_bounds,
        })
    }
}
