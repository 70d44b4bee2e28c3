//! Check classifications and the events raised by failing checks

use serde::{Deserialize, Serialize};

use super::{CheckId, PvReading};

/// Outcome of evaluating one check result against its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Inside every configured limit and threshold; no event
    InBounds,
    /// Below `low_threshold` while inside the limits
    LowThreshold,
    /// Above `high_threshold` while inside the limits
    HighThreshold,
    /// Below `low_limit`
    LowLimit,
    /// Above `high_limit`
    HighLimit,
}

impl Classification {
    /// Whether this classification needs a corrective action.
    pub const fn is_alert(self) -> bool {
        !matches!(self, Self::InBounds)
    }

    pub const fn is_limit(self) -> bool {
        matches!(self, Self::LowLimit | Self::HighLimit)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InBounds => write!(f, "IN_BOUNDS"),
            Self::LowThreshold => write!(f, "LOW_THRESHOLD"),
            Self::HighThreshold => write!(f, "HIGH_THRESHOLD"),
            Self::LowLimit => write!(f, "LOW_LIMIT"),
            Self::HighLimit => write!(f, "HIGH_LIMIT"),
        }
    }
}

/// Payload of an `intensity_rate` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityPayload {
    /// Summed intensity divided by exposure time
    pub result: f64,
    pub acq_time: PvReading,
}

/// Payload of the saturated-pixel count events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelCountPayload {
    /// Pixels whose rate exceeds the per-pixel limit (limit tier input)
    pub points_over_limit: u64,
    /// Pixels whose rate exceeds the per-pixel target (threshold tier input)
    pub points_over_threshold: u64,
    pub acq_time: PvReading,
}

/// Check-specific event fields.
///
/// Each formula produces exactly one variant and its adjuster reads only
/// that variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Intensity(IntensityPayload),
    PixelCount(PixelCountPayload),
}

impl EventPayload {
    pub const fn acq_time(&self) -> &PvReading {
        match self {
            Self::Intensity(p) => &p.acq_time,
            Self::PixelCount(p) => &p.acq_time,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Intensity(_) => "intensity",
            Self::PixelCount(_) => "pixel_count",
        }
    }
}

/// A check that landed outside its bounds for one frame.
///
/// Lives for a single pipeline pass: created by the evaluator, consumed by
/// the cooldown filter and, if admitted, by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckEvent {
    pub check_id: CheckId,
    pub classification: Classification,
    pub frame_id: u64,
    pub payload: EventPayload,
}
