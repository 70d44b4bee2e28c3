//! Frame observation types

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Auxiliary reading holding the frame exposure time in seconds.
///
/// Every built-in check divides by this value.
pub const ACQ_TIME: &str = "acq_time";

/// A numeric reading paired with the process variable it came from.
///
/// Adjusters write corrections back to `pv`, so the identifier has to travel
/// with the value through the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvReading {
    pub pv: String,
    pub value: f64,
}

impl PvReading {
    pub fn new(pv: impl Into<String>, value: f64) -> Self {
        Self {
            pv: pv.into(),
            value,
        }
    }
}

/// One sampled detector frame.
///
/// Immutable once produced. The pipeline takes ownership for a single pass
/// and drops it after evaluation.
#[derive(Debug, Clone)]
pub struct FrameObservation {
    /// Detector frame counter (`uniqueId` / `ArrayCounter`)
    pub frame_id: u64,
    /// 2-D pixel intensities, rows × columns
    pub slice: Array2<f64>,
    /// Named auxiliary readings sampled with the frame
    pub readings: HashMap<String, PvReading>,
}

impl FrameObservation {
    pub fn new(frame_id: u64, slice: Array2<f64>) -> Self {
        Self {
            frame_id,
            slice,
            readings: HashMap::new(),
        }
    }

    /// Attach an auxiliary reading (builder style).
    pub fn with_reading(mut self, name: impl Into<String>, reading: PvReading) -> Self {
        self.readings.insert(name.into(), reading);
        self
    }

    pub fn reading(&self, name: &str) -> Option<&PvReading> {
        self.readings.get(name)
    }

    /// The exposure time reading, if the feed delivered one.
    pub fn acq_time(&self) -> Option<&PvReading> {
        self.reading(ACQ_TIME)
    }
}

/// JSON shape of a frame as delivered by line-oriented feeds.
///
/// Pixels are flattened row-major; `shape` is `[rows, cols]`. Attributes are
/// bare values keyed by reading name; the feed pairs them with process
/// variable names from the `[pvs]` configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(alias = "image_number", alias = "uniqueId")]
    pub frame_id: u64,
    pub shape: [usize; 2],
    pub pixels: Vec<f64>,
    #[serde(default)]
    pub attributes: HashMap<String, f64>,
}

/// Reasons a wire frame cannot become an observation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameShapeError {
    #[error("frame {frame_id}: shape {rows}x{cols} does not match {len} pixels")]
    Mismatch {
        frame_id: u64,
        rows: usize,
        cols: usize,
        len: usize,
    },
}

impl WireFrame {
    /// Build an observation, pairing attributes with their process variables.
    ///
    /// Attributes without a `pvs` entry are dropped.
    pub fn into_observation(
        self,
        pvs: &HashMap<String, String>,
    ) -> Result<FrameObservation, FrameShapeError> {
        let [rows, cols] = self.shape;
        let len = self.pixels.len();
        let slice = Array2::from_shape_vec((rows, cols), self.pixels).map_err(|_| {
            FrameShapeError::Mismatch {
                frame_id: self.frame_id,
                rows,
                cols,
                len,
            }
        })?;

        let mut frame = FrameObservation::new(self.frame_id, slice);
        for (name, value) in self.attributes {
            match pvs.get(&name) {
                Some(pv) => {
                    frame.readings.insert(name, PvReading::new(pv.clone(), value));
                }
                None => {
                    tracing::debug!(frame_id = frame.frame_id, attribute = %name, "No PV mapping for attribute, dropping");
                }
            }
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pvs() -> HashMap<String, String> {
        HashMap::from([(ACQ_TIME.to_string(), "13SIM1:cam1:AcquireTime".to_string())])
    }

    #[test]
    fn wire_frame_pairs_attributes_with_pvs() {
        let wire = WireFrame {
            frame_id: 7,
            shape: [2, 3],
            pixels: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            attributes: HashMap::from([
                (ACQ_TIME.to_string(), 0.5),
                ("temperature".to_string(), 21.0),
            ]),
        };
        let frame = wire.into_observation(&pvs()).expect("valid frame");
        assert_eq!(frame.slice.dim(), (2, 3));
        assert_eq!(frame.slice[[1, 0]], 4.0);
        let acq = frame.acq_time().expect("acq_time mapped");
        assert_eq!(acq.pv, "13SIM1:cam1:AcquireTime");
        assert_eq!(acq.value, 0.5);
        assert!(frame.reading("temperature").is_none());
    }

    #[test]
    fn wire_frame_rejects_shape_mismatch() {
        let wire = WireFrame {
            frame_id: 3,
            shape: [2, 2],
            pixels: vec![1.0, 2.0, 3.0],
            attributes: HashMap::new(),
        };
        let err = wire.into_observation(&pvs()).expect_err("shape mismatch");
        assert!(err.to_string().contains("2x2"));
    }

    #[test]
    fn wire_frame_accepts_alias_field_names() {
        let json = r#"{"image_number": 12, "shape": [1, 2], "pixels": [3.0, 4.0]}"#;
        let wire: WireFrame = serde_json::from_str(json).expect("parse");
        assert_eq!(wire.frame_id, 12);
        assert!(wire.attributes.is_empty());
    }
}
