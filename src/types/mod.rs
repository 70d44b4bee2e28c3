//! Shared data structures for the detector quality feedback loop
//!
//! - `FrameObservation`: one detector frame plus auxiliary process readings
//! - `Bounds` / `BoundsTable`: limit, threshold and target values per check
//! - `CheckEvent`: a failing check, carrying the payload its adjuster needs

mod bounds;
mod event;
mod frame;

pub use bounds::*;
pub use event::*;
pub use frame::*;

/// Name of a quality-check / adjustment pair (e.g. `"intensity_rate"`).
pub type CheckId = String;
