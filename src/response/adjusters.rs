//! Corrective-action formulas
//!
//! Each adjuster maps an event and its check's bounds to a new exposure
//! time. The formulas are pure; the [`Dispatcher`](super::Dispatcher)
//! performs the actual write.

use super::DispatchError;
use crate::types::{Bounds, CheckEvent, EventPayload, IntensityPayload, PixelCountPayload, PvReading};

/// What an adjuster decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Adjustment {
    /// Write `value` to process variable `pv`
    Write { pv: String, value: f64 },
    /// Nothing to write; `reason` is logged
    Skip { reason: String },
}

/// `intensity_rate_adj`: scale exposure so the rate lands on target.
///
/// `new_acq_time = result / target * old_acq_time`
pub fn intensity_rate_adj(event: &CheckEvent, bounds: &Bounds) -> Result<Adjustment, DispatchError> {
    let IntensityPayload { result, acq_time } = intensity_payload(event)?;
    let target = nonzero_target(event, bounds)?;
    write_positive(event, acq_time, result / target * acq_time.value)
}

/// `Npix_oversat_cnt_rate_adj`:
/// `new_acq_time = old_acq_time / ln(points_over_threshold / target)`
pub fn npix_oversat_cnt_rate_adj(
    event: &CheckEvent,
    bounds: &Bounds,
) -> Result<Adjustment, DispatchError> {
    let payload = pixel_count_payload(event)?;
    let target = nonzero_target(event, bounds)?;
    #[allow(clippy::cast_precision_loss)]
    let points = payload.points_over_threshold as f64;
    log_ratio_adjust(event, &payload.acq_time, points, target, points / target)
}

/// `Npix_undersat_cnt_rate_adj`:
/// `new_acq_time = old_acq_time / ln(target / points_over_threshold)`
pub fn npix_undersat_cnt_rate_adj(
    event: &CheckEvent,
    bounds: &Bounds,
) -> Result<Adjustment, DispatchError> {
    let payload = pixel_count_payload(event)?;
    let target = nonzero_target(event, bounds)?;
    #[allow(clippy::cast_precision_loss)]
    let points = payload.points_over_threshold as f64;
    log_ratio_adjust(event, &payload.acq_time, points, target, target / points)
}

/// Shared tail of the count adjusters.
///
/// `points == target` makes the logarithm zero: no write. A ratio whose
/// logarithm is undefined is degenerate.
#[allow(clippy::float_cmp)]
fn log_ratio_adjust(
    event: &CheckEvent,
    acq_time: &PvReading,
    points: f64,
    target: f64,
    ratio: f64,
) -> Result<Adjustment, DispatchError> {
    if points == target {
        return Ok(Adjustment::Skip {
            reason: format!("points over threshold ({points}) equal target, ln(1) = 0"),
        });
    }
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(DispatchError::Degenerate {
            check_id: event.check_id.clone(),
            reason: format!("log of non-positive or infinite ratio {ratio}"),
        });
    }
    write_positive(event, acq_time, acq_time.value / ratio.ln())
}

/// Accept only a finite, positive exposure time.
fn write_positive(
    event: &CheckEvent,
    acq_time: &PvReading,
    value: f64,
) -> Result<Adjustment, DispatchError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DispatchError::Degenerate {
            check_id: event.check_id.clone(),
            reason: format!("computed acquisition time {value} for {} is not positive", acq_time.pv),
        });
    }
    Ok(Adjustment::Write {
        pv: acq_time.pv.clone(),
        value,
    })
}

#[allow(clippy::float_cmp)]
fn nonzero_target(event: &CheckEvent, bounds: &Bounds) -> Result<f64, DispatchError> {
    match bounds.target {
        None => Err(DispatchError::MissingTarget {
            check_id: event.check_id.clone(),
            reason: "target not set".to_string(),
        }),
        Some(t) if t == 0.0 || !t.is_finite() => Err(DispatchError::MissingTarget {
            check_id: event.check_id.clone(),
            reason: format!("target is {t}"),
        }),
        Some(t) => Ok(t),
    }
}

fn intensity_payload(event: &CheckEvent) -> Result<&IntensityPayload, DispatchError> {
    match &event.payload {
        EventPayload::Intensity(p) => Ok(p),
        other => Err(DispatchError::PayloadMismatch {
            check_id: event.check_id.clone(),
            found: other.kind(),
        }),
    }
}

fn pixel_count_payload(event: &CheckEvent) -> Result<&PixelCountPayload, DispatchError> {
    match &event.payload {
        EventPayload::PixelCount(p) => Ok(p),
        other => Err(DispatchError::PayloadMismatch {
            check_id: event.check_id.clone(),
            found: other.kind(),
        }),
    }
}
