//! Pipeline statistics, reported at shutdown

use chrono::{DateTime, Utc};
use tracing::info;

use crate::response::DispatchTally;

/// Why the controller stopped consuming frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Cancelled,
    FeedError(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "end of stream"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::FeedError(e) => write!(f, "feed error: {e}"),
        }
    }
}

/// Counters accumulated over one controller run.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub frames_processed: u64,
    /// Frames the detector counter skipped over
    pub frames_missed: u64,
    /// Alert events produced by the evaluator
    pub events_raised: u64,
    /// Alert events dropped by the cooldown filter
    pub events_suppressed: u64,
    /// Checks skipped because they could not be evaluated
    pub diagnostics: u64,
    pub dispatch: DispatchTally,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<StopReason>,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            frames_processed: 0,
            frames_missed: 0,
            events_raised: 0,
            events_suppressed: 0,
            diagnostics: 0,
            dispatch: DispatchTally::default(),
            started_at: Utc::now(),
            finished_at: None,
            stop_reason: None,
        }
    }
}

impl PipelineStats {
    /// Events that passed the cooldown filter.
    pub const fn events_admitted(&self) -> u64 {
        self.events_raised.saturating_sub(self.events_suppressed)
    }

    pub fn log_summary(&self) {
        let runtime = self
            .finished_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(self.started_at);
        let reason = self
            .stop_reason
            .as_ref()
            .map_or_else(|| "running".to_string(), ToString::to_string);

        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("📊 FINAL STATISTICS");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("   Frames Processed:     {}", self.frames_processed);
        info!("   Frames Missed:        {}", self.frames_missed);
        info!("   Events Raised:        {}", self.events_raised);
        info!("   Suppressed (cooldown): {}", self.events_suppressed);
        info!("   Evaluation Skips:     {}", self.diagnostics);
        info!("   Writes Issued:        {}", self.dispatch.written);
        info!("   Writes Skipped:       {}", self.dispatch.skipped);
        info!("   Writes Failed:        {}", self.dispatch.failed);
        info!("   Runtime:              {}s", runtime.num_seconds());
        info!("   Stopped:              {}", reason);
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admitted_is_raised_minus_suppressed() {
        let stats = PipelineStats {
            events_raised: 7,
            events_suppressed: 5,
            ..PipelineStats::default()
        };
        assert_eq!(stats.events_admitted(), 2);
    }

    #[test]
    fn stop_reason_display() {
        assert_eq!(StopReason::EndOfStream.to_string(), "end of stream");
        assert_eq!(
            StopReason::FeedError("reset".into()).to_string(),
            "feed error: reset"
        );
    }
}
