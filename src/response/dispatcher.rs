//! Dispatcher: run adjusters for admitted events and write the results

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::adjusters::Adjustment;
use super::{DispatchError, ProcessValueSink};
use crate::registry::CheckRegistry;
use crate::types::{BoundsTable, CheckEvent, CheckId};

/// What happened to one admitted event.
#[derive(Debug)]
pub enum DispatchOutcome {
    Written {
        check_id: CheckId,
        frame_id: u64,
        pv: String,
        value: f64,
    },
    Skipped {
        check_id: CheckId,
        frame_id: u64,
        reason: String,
    },
    Failed {
        check_id: CheckId,
        frame_id: u64,
        error: DispatchError,
    },
}

impl DispatchOutcome {
    pub fn check_id(&self) -> &str {
        match self {
            Self::Written { check_id, .. }
            | Self::Skipped { check_id, .. }
            | Self::Failed { check_id, .. } => check_id,
        }
    }

    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Running counts of dispatch outcomes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTally {
    pub written: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl DispatchTally {
    pub fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Written { .. } => self.written += 1,
            DispatchOutcome::Skipped { .. } => self.skipped += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    pub const fn total(&self) -> u64 {
        self.written + self.skipped + self.failed
    }
}

/// Outcomes of one dispatched batch, in event order.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    pub fn tally(&self) -> DispatchTally {
        let mut tally = DispatchTally::default();
        for outcome in &self.outcomes {
            tally.record(outcome);
        }
        tally
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }
}

/// Maps events to their adjustment formula and performs the write.
///
/// Cheap to clone; workers each hold their own copy.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CheckRegistry>,
    sink: Arc<dyn ProcessValueSink>,
    write_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CheckRegistry>,
        sink: Arc<dyn ProcessValueSink>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sink,
            write_timeout,
        }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.sink_name()
    }

    /// Dispatch a batch. Every event is attempted; a failure never stops
    /// the events after it.
    pub async fn dispatch(&self, events: Vec<CheckEvent>, bounds: &BoundsTable) -> DispatchReport {
        let mut report = DispatchReport {
            outcomes: Vec::with_capacity(events.len()),
        };
        for event in &events {
            report.outcomes.push(self.dispatch_one(event, bounds).await);
        }
        report
    }

    /// Run the adjuster for one event and write its result.
    pub async fn dispatch_one(&self, event: &CheckEvent, bounds: &BoundsTable) -> DispatchOutcome {
        let check_id = event.check_id.clone();
        let frame_id = event.frame_id;

        let outcome = match self.adjust(event, bounds) {
            Ok(Adjustment::Write { pv, value }) => match self.write(&pv, value).await {
                Ok(()) => DispatchOutcome::Written {
                    check_id,
                    frame_id,
                    pv,
                    value,
                },
                Err(error) => DispatchOutcome::Failed {
                    check_id,
                    frame_id,
                    error,
                },
            },
            Ok(Adjustment::Skip { reason }) => DispatchOutcome::Skipped {
                check_id,
                frame_id,
                reason,
            },
            Err(error) => DispatchOutcome::Failed {
                check_id,
                frame_id,
                error,
            },
        };

        log_outcome(event, &outcome);
        outcome
    }

    fn adjust(&self, event: &CheckEvent, bounds: &BoundsTable) -> Result<Adjustment, DispatchError> {
        let spec = self
            .registry
            .get(&event.check_id)
            .ok_or_else(|| DispatchError::UnknownCheck(event.check_id.clone()))?;
        let own = bounds
            .get(&event.check_id)
            .ok_or_else(|| DispatchError::MissingBounds {
                check_id: event.check_id.clone(),
            })?;
        (spec.adjust)(event, own)
    }

    async fn write(&self, pv: &str, value: f64) -> Result<(), DispatchError> {
        match tokio::time::timeout(self.write_timeout, self.sink.set_process_value(pv, value)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DispatchError::Write {
                pv: pv.to_string(),
                source,
            }),
            Err(_) => Err(DispatchError::WriteTimeout {
                pv: pv.to_string(),
                timeout_ms: self.write_timeout.as_millis(),
            }),
        }
    }
}

fn log_outcome(event: &CheckEvent, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Written { pv, value, .. } => info!(
            check_id = %event.check_id,
            frame_id = event.frame_id,
            classification = %event.classification,
            pv = %pv,
            value,
            "Corrective write issued"
        ),
        DispatchOutcome::Skipped { reason, .. } => info!(
            check_id = %event.check_id,
            frame_id = event.frame_id,
            reason = %reason,
            "Corrective write skipped"
        ),
        DispatchOutcome::Failed { error, .. } => warn!(
            check_id = %event.check_id,
            frame_id = event.frame_id,
            error = %error,
            "Corrective action failed"
        ),
    }
}
