//! Response: debounce failing checks and issue corrective writes
//!
//! - [`CooldownFilter`]: at most one corrective action per check per window
//! - [`adjusters`]: pure formulas turning an event into a process-value write
//! - [`Dispatcher`]: runs adjusters and performs the writes through a sink
//! - [`sink`]: the hardware boundary (`set_process_value`)

pub mod adjusters;
mod cooldown;
mod dispatcher;
pub mod sink;

pub use cooldown::CooldownFilter;
pub use dispatcher::{DispatchOutcome, DispatchReport, DispatchTally, Dispatcher};
pub use sink::{LogSink, ProcessValueSink, RecordingSink, SinkError, TcpSink};

use thiserror::Error;

use crate::types::CheckId;

/// Per-event dispatch failures. Never block the rest of the batch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no adjustment formula registered for check '{0}'")]
    UnknownCheck(CheckId),

    #[error("check '{check_id}' has no bounds entry")]
    MissingBounds { check_id: CheckId },

    #[error("check '{check_id}' has no usable target ({reason})")]
    MissingTarget { check_id: CheckId, reason: String },

    #[error("check '{check_id}' received a {found} payload")]
    PayloadMismatch {
        check_id: CheckId,
        found: &'static str,
    },

    #[error("check '{check_id}': degenerate adjustment ({reason})")]
    Degenerate { check_id: CheckId, reason: String },

    #[error("write to {pv} failed: {source}")]
    Write {
        pv: String,
        #[source]
        source: SinkError,
    },

    #[error("write to {pv} timed out after {timeout_ms} ms")]
    WriteTimeout { pv: String, timeout_ms: u128 },

    #[error("dispatch worker for check '{0}' is gone")]
    WorkerClosed(CheckId),
}
