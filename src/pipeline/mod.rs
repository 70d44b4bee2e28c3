//! Frame pipeline: sources, the feed channel, dispatch workers and the
//! controller loop that ties them together.

mod controller;
pub mod feed;
pub mod source;
mod state;
mod workers;

pub use controller::{FrameReport, PipelineController, PipelineSettings};
pub use feed::{feed_channel, FeedReceiver, FeedSender};
pub use source::{
    FeedError, FrameEvent, FrameSource, JsonLinesSource, ReplaySource, StdinSource, TcpSource,
};
pub use state::{PipelineStats, StopReason};
pub use workers::DispatchWorkers;
