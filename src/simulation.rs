//! Simulated detector: a frame source and a process-value sink sharing one
//! exposure time, so corrective writes visibly change the next frames.
//!
//! Pixel counts are Poisson-distributed with mean `mean_rate × acq_time`
//! and clipped at the detector's saturation level.

use async_trait::async_trait;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::defaults::SIMULATION_SATURATION;
use crate::config::SimulationConfig;
use crate::pipeline::{FeedError, FrameEvent, FrameSource};
use crate::response::{ProcessValueSink, SinkError};
use crate::types::{FrameObservation, PvReading, ACQ_TIME};

// ============================================================================
// Detector State
// ============================================================================

/// Exposure time shared between the simulated feed and sink.
#[derive(Debug, Clone)]
pub struct SimulatedDetector {
    acq_time_pv: String,
    acq_time_bits: Arc<AtomicU64>,
}

impl SimulatedDetector {
    pub fn new(acq_time_pv: impl Into<String>, initial_acq_time: f64) -> Self {
        Self {
            acq_time_pv: acq_time_pv.into(),
            acq_time_bits: Arc::new(AtomicU64::new(initial_acq_time.to_bits())),
        }
    }

    pub fn acq_time(&self) -> f64 {
        f64::from_bits(self.acq_time_bits.load(Ordering::Acquire))
    }

    pub fn acq_time_pv(&self) -> &str {
        &self.acq_time_pv
    }

    /// Frame source reading this detector.
    pub fn source(&self, config: &SimulationConfig) -> SyntheticSource {
        SyntheticSource {
            detector: self.clone(),
            rows: config.rows,
            cols: config.cols,
            mean_rate: config.mean_rate,
            interval: Duration::from_millis(config.frame_interval_ms),
            limit: (config.frames > 0).then_some(config.frames),
            next_frame_id: 1,
            rng: StdRng::from_entropy(),
        }
    }
}

#[async_trait]
impl ProcessValueSink for SimulatedDetector {
    async fn set_process_value(&self, pv: &str, value: f64) -> Result<(), SinkError> {
        if pv != self.acq_time_pv {
            return Err(SinkError::Rejected {
                pv: pv.to_string(),
                reason: "simulated detector only exposes its acquire time".to_string(),
            });
        }
        if !value.is_finite() || value <= 0.0 {
            return Err(SinkError::Rejected {
                pv: pv.to_string(),
                reason: format!("invalid exposure time {value}"),
            });
        }
        let previous = f64::from_bits(self.acq_time_bits.swap(value.to_bits(), Ordering::AcqRel));
        info!(pv, previous, value, "Simulated detector exposure changed");
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "simulated-detector"
    }
}

// ============================================================================
// Synthetic Frame Source
// ============================================================================

pub struct SyntheticSource {
    detector: SimulatedDetector,
    rows: usize,
    cols: usize,
    mean_rate: f64,
    interval: Duration,
    limit: Option<u64>,
    next_frame_id: u64,
    rng: StdRng,
}

impl SyntheticSource {
    /// Reproducible pixel noise.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn generate(&mut self) -> Result<FrameObservation, FeedError> {
        let acq_time = self.detector.acq_time();
        let lambda = self.mean_rate * acq_time;
        let poisson = Poisson::new(lambda).map_err(|e| {
            FeedError::Upstream(format!("cannot simulate exposure {acq_time}s: {e}"))
        })?;

        let rng = &mut self.rng;
        let slice = Array2::from_shape_simple_fn((self.rows, self.cols), || {
            poisson.sample(&mut *rng).min(SIMULATION_SATURATION)
        });

        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        debug!(frame_id, acq_time, "Simulated frame");

        Ok(FrameObservation::new(frame_id, slice).with_reading(
            ACQ_TIME,
            PvReading::new(self.detector.acq_time_pv(), acq_time),
        ))
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn next_frame(&mut self) -> Result<FrameEvent, FeedError> {
        if self.limit.is_some_and(|limit| self.next_frame_id > limit) {
            return Ok(FrameEvent::Eof);
        }
        if self.next_frame_id > 1 && !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        self.generate().map(FrameEvent::Frame)
    }

    fn source_name(&self) -> &str {
        "simulation"
    }
}
