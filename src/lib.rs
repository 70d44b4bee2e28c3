//! dq-controller: Detector Data-Quality Feedback Controller
//!
//! Watches a stream of detector frames, classifies each against configured
//! quality bounds, and corrects acquisition parameters when a check fails.
//!
//! ## Architecture
//!
//! - **Monitoring**: check formulas and two-tier limit/threshold classification
//! - **Response**: per-check cooldown, adjustment formulas, process-value sinks
//! - **Registry**: check id → formulas, validated against config at startup
//! - **Pipeline**: frame sources, feed channel, dispatch workers, controller loop

pub mod config;
pub mod monitoring;
pub mod pipeline;
pub mod registry;
pub mod response;
pub mod simulation;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, ControllerConfig, DispatchMode};

// Re-export commonly used types
pub use types::{
    Bounds, BoundsTable, CheckEvent, CheckId, Classification, EventPayload, FrameObservation,
    PvReading,
};

// Re-export pipeline components
pub use monitoring::{Evaluation, EvaluationError, Evaluator};
pub use pipeline::{
    feed_channel, FeedError, FrameSource, PipelineController, PipelineSettings, PipelineStats,
};
pub use registry::CheckRegistry;
pub use response::{CooldownFilter, DispatchError, Dispatcher, ProcessValueSink, SinkError};
