//! Built-in quality check formulas and the two-tier classifier
//!
//! Every formula computes a scalar (or a pixel count) from the frame and its
//! exposure time, then classifies it: limits first, thresholds only when the
//! limits hold. Comparisons are strict, so a value equal to a bound is inside.

use ndarray::Array2;

use super::{CheckInput, EvaluationError, Verdict};
use crate::types::{
    BoundField, Bounds, Classification, EventPayload, FrameObservation, IntensityPayload,
    PixelCountPayload, PvReading, ACQ_TIME,
};

/// Check id: summed intensity per second of exposure.
pub const INTENSITY_RATE: &str = "intensity_rate";
/// Check id: number of pixels saturating too fast.
pub const NPIX_OVERSAT_CNT_RATE: &str = "Npix_oversat_cnt_rate";
/// Check id: number of pixels filling too slowly.
pub const NPIX_UNDERSAT_CNT_RATE: &str = "Npix_undersat_cnt_rate";
/// Sub-bound table with the per-pixel rate bounds used by the count checks.
pub const PIX_SAT_CNT_RATE: &str = "pix_sat_cnt_rate";

/// Limit tier. `None` when no limit is violated.
pub fn check_limits(result: f64, bounds: &Bounds) -> Option<Classification> {
    if bounds.low_limit.is_some_and(|ll| result < ll) {
        return Some(Classification::LowLimit);
    }
    if bounds.high_limit.is_some_and(|hl| result > hl) {
        return Some(Classification::HighLimit);
    }
    None
}

/// Threshold tier. `None` when no threshold is violated.
pub fn check_thresholds(result: f64, bounds: &Bounds) -> Option<Classification> {
    if bounds.low_threshold.is_some_and(|lt| result < lt) {
        return Some(Classification::LowThreshold);
    }
    if bounds.high_threshold.is_some_and(|ht| result > ht) {
        return Some(Classification::HighThreshold);
    }
    None
}

/// Full two-tier classification of a single result.
pub fn classify(result: f64, bounds: &Bounds) -> Classification {
    check_limits(result, bounds)
        .or_else(|| check_thresholds(result, bounds))
        .unwrap_or(Classification::InBounds)
}

/// `intensity_rate`: `sum(slice) / acq_time`.
pub fn intensity_rate(input: &CheckInput<'_>) -> Result<Verdict, EvaluationError> {
    let acq_time = elapsed_time(input.frame)?;
    let slice = non_empty(&input.frame.slice)?;

    let result = slice.sum() / acq_time.value;
    if !result.is_finite() {
        return Err(EvaluationError::NonFiniteResult(result));
    }

    Ok(Verdict {
        classification: classify(result, input.bounds),
        payload: EventPayload::Intensity(IntensityPayload {
            result,
            acq_time: acq_time.clone(),
        }),
    })
}

/// `Npix_oversat_cnt_rate`: pixels whose rate exceeds `pix_sat_cnt_rate.high_limit`.
pub fn npix_oversat_cnt_rate(input: &CheckInput<'_>) -> Result<Verdict, EvaluationError> {
    pixel_count_check(input, BoundField::HighLimit)
}

/// `Npix_undersat_cnt_rate`: pixels whose rate exceeds `pix_sat_cnt_rate.low_limit`.
///
/// A low count means too few pixels are collecting enough signal.
pub fn npix_undersat_cnt_rate(input: &CheckInput<'_>) -> Result<Verdict, EvaluationError> {
    pixel_count_check(input, BoundField::LowLimit)
}

/// Shared body of the two count checks.
///
/// The limit tier runs on the count over `rate_bound`; the threshold tier on
/// the count over the sub-table `target`.
fn pixel_count_check(
    input: &CheckInput<'_>,
    rate_bound: BoundField,
) -> Result<Verdict, EvaluationError> {
    let sub = input
        .sub_bounds
        .ok_or_else(|| EvaluationError::MissingBoundsTable(PIX_SAT_CNT_RATE.to_string()))?;
    let per_pixel_limit = required(sub, PIX_SAT_CNT_RATE, rate_bound)?;
    let per_pixel_target = required(sub, PIX_SAT_CNT_RATE, BoundField::Target)?;

    let acq_time = elapsed_time(input.frame)?;
    let slice = non_empty(&input.frame.slice)?;

    let points_over_limit = count_rate_above(slice, acq_time.value, per_pixel_limit);
    let points_over_threshold = count_rate_above(slice, acq_time.value, per_pixel_target);

    #[allow(clippy::cast_precision_loss)]
    let classification = check_limits(points_over_limit as f64, input.bounds)
        .or_else(|| check_thresholds(points_over_threshold as f64, input.bounds))
        .unwrap_or(Classification::InBounds);

    Ok(Verdict {
        classification,
        payload: EventPayload::PixelCount(PixelCountPayload {
            points_over_limit,
            points_over_threshold,
            acq_time: acq_time.clone(),
        }),
    })
}

/// Number of pixels whose `value / acq_time` is strictly above `bound`.
fn count_rate_above(slice: &Array2<f64>, acq_time: f64, bound: f64) -> u64 {
    slice.iter().filter(|&&v| v / acq_time > bound).count() as u64
}

/// Exposure time reading, rejected when it cannot be used as a divisor.
fn elapsed_time(frame: &FrameObservation) -> Result<&PvReading, EvaluationError> {
    let reading = frame
        .reading(ACQ_TIME)
        .ok_or_else(|| EvaluationError::MissingReading(ACQ_TIME.to_string()))?;
    if !reading.value.is_finite() || reading.value <= 0.0 {
        return Err(EvaluationError::InvalidElapsedTime {
            pv: reading.pv.clone(),
            value: reading.value,
        });
    }
    Ok(reading)
}

fn non_empty(slice: &Array2<f64>) -> Result<&Array2<f64>, EvaluationError> {
    if slice.is_empty() {
        let (rows, cols) = slice.dim();
        return Err(EvaluationError::EmptyFrame { rows, cols });
    }
    Ok(slice)
}

fn required(bounds: &Bounds, table: &str, field: BoundField) -> Result<f64, EvaluationError> {
    bounds.get(field).ok_or_else(|| EvaluationError::MissingBound {
        table: table.to_string(),
        field,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn frame(slice: Array2<f64>, acq_time: f64) -> FrameObservation {
        FrameObservation::new(1, slice)
            .with_reading(ACQ_TIME, PvReading::new("13SIM1:cam1:AcquireTime", acq_time))
    }

    fn input<'a>(
        frame: &'a FrameObservation,
        bounds: &'a Bounds,
        sub: Option<&'a Bounds>,
    ) -> CheckInput<'a> {
        CheckInput {
            frame,
            bounds,
            sub_bounds: sub,
        }
    }

    #[test]
    fn high_limit_is_strict() {
        let b = Bounds::default().with_high_limit(100.0);
        assert_eq!(classify(100.0, &b), Classification::InBounds);
        assert_eq!(classify(100.000_1, &b), Classification::HighLimit);
    }

    #[test]
    fn low_limit_is_strict() {
        let b = Bounds::default().with_low_limit(10.0);
        assert_eq!(classify(10.0, &b), Classification::InBounds);
        assert_eq!(classify(9.99, &b), Classification::LowLimit);
    }

    #[test]
    fn thresholds_fire_inside_limits() {
        let b = Bounds::default()
            .with_low_limit(0.0)
            .with_high_limit(1000.0)
            .with_low_threshold(100.0)
            .with_high_threshold(900.0);
        assert_eq!(classify(50.0, &b), Classification::LowThreshold);
        assert_eq!(classify(950.0, &b), Classification::HighThreshold);
        assert_eq!(classify(500.0, &b), Classification::InBounds);
        assert_eq!(classify(900.0, &b), Classification::InBounds);
    }

    #[test]
    fn limits_take_precedence_over_thresholds() {
        let b = Bounds::default()
            .with_high_limit(1000.0)
            .with_high_threshold(900.0);
        assert_eq!(classify(1500.0, &b), Classification::HighLimit);
    }

    #[test]
    fn no_bounds_means_in_bounds() {
        assert_eq!(classify(f64::MAX, &Bounds::default()), Classification::InBounds);
    }

    #[test]
    fn intensity_rate_divides_sum_by_acq_time() {
        let f = frame(array![[10.0, 20.0], [30.0, 15.0]], 0.5);
        let b = Bounds::default().with_high_threshold(100.0).with_target(80.0);
        let verdict = intensity_rate(&input(&f, &b, None)).expect("evaluates");
        assert_eq!(verdict.classification, Classification::HighThreshold);
        match verdict.payload {
            EventPayload::Intensity(p) => {
                assert!((p.result - 150.0).abs() < 1e-9);
                assert_eq!(p.acq_time.value, 0.5);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn intensity_rate_rejects_zero_acq_time() {
        let f = frame(array![[1.0]], 0.0);
        let b = Bounds::default();
        let err = intensity_rate(&input(&f, &b, None)).expect_err("zero divisor");
        assert!(matches!(err, EvaluationError::InvalidElapsedTime { .. }));
    }

    #[test]
    fn intensity_rate_requires_acq_time() {
        let f = FrameObservation::new(1, array![[1.0]]);
        let err = intensity_rate(&input(&f, &Bounds::default(), None)).expect_err("missing");
        assert_eq!(err, EvaluationError::MissingReading(ACQ_TIME.to_string()));
    }

    #[test]
    fn intensity_rate_rejects_empty_frame() {
        let f = frame(Array2::zeros((0, 4)), 1.0);
        let err = intensity_rate(&input(&f, &Bounds::default(), None)).expect_err("empty");
        assert_eq!(err, EvaluationError::EmptyFrame { rows: 0, cols: 4 });
    }

    #[test]
    fn oversat_limits_on_count_over_high_limit() {
        // rates: 20, 40, 60, 80 with acq_time 0.5
        let f = frame(array![[10.0, 20.0], [30.0, 40.0]], 0.5);
        let sub = Bounds::default().with_high_limit(50.0).with_target(30.0);
        let b = Bounds::default().with_high_limit(1.0).with_high_threshold(0.0);
        let verdict = npix_oversat_cnt_rate(&input(&f, &b, Some(&sub))).expect("evaluates");
        assert_eq!(verdict.classification, Classification::HighLimit);
        match verdict.payload {
            EventPayload::PixelCount(p) => {
                assert_eq!(p.points_over_limit, 2);
                assert_eq!(p.points_over_threshold, 3);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn oversat_threshold_uses_count_over_target() {
        let f = frame(array![[10.0, 20.0], [30.0, 40.0]], 0.5);
        let sub = Bounds::default().with_high_limit(50.0).with_target(30.0);
        // 2 points over limit is fine, 3 points over target is above threshold 2
        let b = Bounds::default().with_high_limit(5.0).with_high_threshold(2.0);
        let verdict = npix_oversat_cnt_rate(&input(&f, &b, Some(&sub))).expect("evaluates");
        assert_eq!(verdict.classification, Classification::HighThreshold);
    }

    #[test]
    fn undersat_counts_over_low_limit() {
        // rates: 2, 4, 6, 8
        let f = frame(array![[1.0, 2.0], [3.0, 4.0]], 0.5);
        let sub = Bounds::default().with_low_limit(5.0).with_target(3.0);
        let b = Bounds::default().with_low_limit(3.0).with_low_threshold(4.0);
        let verdict = npix_undersat_cnt_rate(&input(&f, &b, Some(&sub))).expect("evaluates");
        // only 2 pixels over 5 -> below low_limit 3
        assert_eq!(verdict.classification, Classification::LowLimit);
    }

    #[test]
    fn count_checks_need_sub_bounds() {
        let f = frame(array![[1.0]], 1.0);
        let err = npix_oversat_cnt_rate(&input(&f, &Bounds::default(), None))
            .expect_err("no sub bounds");
        assert_eq!(
            err,
            EvaluationError::MissingBoundsTable(PIX_SAT_CNT_RATE.to_string())
        );

        let sub = Bounds::default().with_target(1.0);
        let err = npix_oversat_cnt_rate(&input(&f, &Bounds::default(), Some(&sub)))
            .expect_err("no high_limit");
        assert_eq!(
            err,
            EvaluationError::MissingBound {
                table: PIX_SAT_CNT_RATE.to_string(),
                field: BoundField::HighLimit,
            }
        );
    }
}
