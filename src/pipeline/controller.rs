//! Pipeline controller: evaluate → cooldown → dispatch, once per frame.
//!
//! Evaluation and filtering run synchronously in frame arrival order. Writes
//! either complete before the next frame (`inline`) or are handed to the
//! per-check [`DispatchWorkers`] (`worker`).

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::source::{FrameEvent, FrameSource};
use super::state::{PipelineStats, StopReason};
use super::workers::DispatchWorkers;
use crate::config::defaults::PROGRESS_LOG_INTERVAL_FRAMES;
use crate::config::{ConfigError, ControllerConfig, DispatchMode};
use crate::monitoring::{CheckDiagnostic, Evaluator};
use crate::registry::CheckRegistry;
use crate::response::{CooldownFilter, DispatchReport, Dispatcher, ProcessValueSink};
use crate::types::{BoundsTable, CheckId, FrameObservation};

// ============================================================================
// Settings
// ============================================================================

/// Runtime knobs for one controller, independent of where they came from.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub active_checks: Vec<CheckId>,
    pub cooldown: Duration,
    pub dispatch_mode: DispatchMode,
    pub channel_capacity: usize,
    pub write_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl PipelineSettings {
    /// Settings for `active_checks` with every other knob at its default.
    pub fn new(active_checks: Vec<CheckId>) -> Self {
        Self::from_config(&ControllerConfig {
            checks: crate::config::ChecksConfig {
                active: active_checks,
                bounds_file: None,
            },
            ..ControllerConfig::default()
        })
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            active_checks: config.checks.active.clone(),
            cooldown: config.cooldown(),
            dispatch_mode: config.controller.dispatch_mode,
            channel_capacity: config.dispatch.channel_capacity,
            write_timeout: config.dispatch.write_timeout(),
            shutdown_grace: config.dispatch.shutdown_grace(),
        }
    }

    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub const fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }
}

// ============================================================================
// Frame Report
// ============================================================================

/// What the controller did with one frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub frame_id: u64,
    /// Alert events the evaluator produced
    pub events_raised: usize,
    /// Check ids that passed the cooldown filter, in order
    pub admitted: Vec<CheckId>,
    pub diagnostics: Vec<CheckDiagnostic>,
    /// Write outcomes; only present in inline mode
    pub dispatch: Option<DispatchReport>,
}

// ============================================================================
// Controller
// ============================================================================

/// Owns the cooldown state and drives frames through the pipeline.
pub struct PipelineController {
    settings: PipelineSettings,
    evaluator: Evaluator,
    cooldown: CooldownFilter,
    dispatcher: Dispatcher,
    bounds: Arc<BoundsTable>,
    workers: Option<DispatchWorkers>,
    stats: PipelineStats,
    last_frame_id: Option<u64>,
}

impl PipelineController {
    /// Build a controller, rejecting any active check that lacks a formula,
    /// a bounds entry, or a bound it needs.
    pub fn new(
        settings: PipelineSettings,
        registry: Arc<CheckRegistry>,
        bounds: BoundsTable,
        sink: Arc<dyn ProcessValueSink>,
    ) -> Result<Self, ConfigError> {
        registry.validate(&settings.active_checks, &bounds)?;

        let bounds = Arc::new(bounds);
        let dispatcher = Dispatcher::new(Arc::clone(&registry), sink, settings.write_timeout);
        let workers = match settings.dispatch_mode {
            DispatchMode::Worker => Some(DispatchWorkers::new(
                dispatcher.clone(),
                Arc::clone(&bounds),
                settings.channel_capacity,
            )),
            DispatchMode::Inline => None,
        };

        info!(
            checks = ?settings.active_checks,
            cooldown_ms = settings.cooldown.as_millis(),
            dispatch_mode = ?settings.dispatch_mode,
            sink = dispatcher.sink_name(),
            "Pipeline controller ready"
        );

        Ok(Self {
            evaluator: Evaluator::new(registry),
            cooldown: CooldownFilter::new(settings.cooldown),
            dispatcher,
            bounds,
            workers,
            stats: PipelineStats::default(),
            last_frame_id: None,
            settings,
        })
    }

    pub const fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process one frame, stamping the cooldown with the current time.
    pub async fn on_frame(&mut self, frame: FrameObservation) -> FrameReport {
        self.on_frame_at(frame, Instant::now()).await
    }

    /// Process one frame as if it arrived at `now`.
    pub async fn on_frame_at(&mut self, frame: FrameObservation, now: Instant) -> FrameReport {
        let frame_id = frame.frame_id;
        self.track_frame_counter(frame_id);
        self.stats.frames_processed += 1;

        let evaluation = self
            .evaluator
            .evaluate(&frame, &self.settings.active_checks, &self.bounds);

        let events_raised = evaluation.events.len();
        let admitted = self.cooldown.filter(evaluation.events, now);
        let suppressed = events_raised - admitted.len();

        self.stats.events_raised += events_raised as u64;
        self.stats.events_suppressed += suppressed as u64;
        self.stats.diagnostics += evaluation.diagnostics.len() as u64;

        let mut report = FrameReport {
            frame_id,
            events_raised,
            admitted: admitted.iter().map(|e| e.check_id.clone()).collect(),
            diagnostics: evaluation.diagnostics,
            dispatch: None,
        };
        if suppressed > 0 {
            debug!(frame_id, suppressed, "Events suppressed by cooldown");
        }

        match self.workers.as_mut() {
            Some(workers) => {
                for event in admitted {
                    if let Err(e) = workers.submit(event).await {
                        warn!(frame_id, error = %e, "Could not queue corrective action");
                        self.stats.dispatch.failed += 1;
                    }
                }
            }
            None if !admitted.is_empty() => {
                let dispatch = self.dispatcher.dispatch(admitted, &self.bounds).await;
                self.stats.dispatch.merge(dispatch.tally());
                report.dispatch = Some(dispatch);
            }
            None => {}
        }

        report
    }

    fn track_frame_counter(&mut self, frame_id: u64) {
        if let Some(last) = self.last_frame_id {
            if frame_id > last.saturating_add(1) {
                let missed = frame_id - last - 1;
                warn!(frame_id, last_frame_id = last, missed, "Frame counter gap");
                self.stats.frames_missed += missed;
            } else if frame_id <= last {
                debug!(frame_id, last_frame_id = last, "Frame counter restarted");
            }
        }
        self.last_frame_id = Some(frame_id);
    }

    /// Drive `source` until end of stream, feed error, or cancellation,
    /// then shut down and return the final statistics.
    pub async fn run<S>(mut self, source: &mut S, cancel: CancellationToken) -> PipelineStats
    where
        S: FrameSource + ?Sized,
    {
        let source_name = source.source_name().to_string();
        info!("📊 Processing frames from {}...", source_name);
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        let reason = loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Controller] Shutdown signal received");
                    break StopReason::Cancelled;
                }
                result = source.next_frame() => match result {
                    Ok(ev) => ev,
                    Err(e) => {
                        error!(source = %source_name, error = %e, "[Controller] Feed error, shutting down");
                        break StopReason::FeedError(e.to_string());
                    }
                }
            };

            let frame = match event {
                FrameEvent::Frame(f) => f,
                FrameEvent::Eof => {
                    info!(
                        "[Controller] Feed reached end ({} frames processed)",
                        self.stats.frames_processed
                    );
                    break StopReason::EndOfStream;
                }
            };

            self.on_frame(frame).await;

            if self.stats.frames_processed % PROGRESS_LOG_INTERVAL_FRAMES == 0 {
                info!(
                    frames = self.stats.frames_processed,
                    raised = self.stats.events_raised,
                    suppressed = self.stats.events_suppressed,
                    "Progress"
                );
            }
        };

        source.close().await;
        self.stats.stop_reason = Some(reason);
        self.shutdown().await
    }

    /// Stop dispatching: close worker queues and wait for in-flight writes
    /// (bounded by the shutdown grace period).
    pub async fn shutdown(mut self) -> PipelineStats {
        if let Some(workers) = self.workers.take() {
            let tally = workers.shutdown(self.settings.shutdown_grace).await;
            self.stats.dispatch.merge(tally);
        }
        self.stats.finished_at = Some(chrono::Utc::now());
        self.stats.log_summary();
        self.stats
    }
}
