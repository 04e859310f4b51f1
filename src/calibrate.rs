use crate::constants::CALIBRATION_OFFSET_BIAS;
use crate::error::CalibrationError;

/// Two converged operating points of the valve.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationPoints {
    pub pwm1: i32,
    pub flow1: f64,
    pub pwm2: i32,
    pub flow2: f64,
}

impl CalibrationPoints {
    /// Both points recorded with positive values.
    pub fn is_complete(&self) -> bool {
        self.pwm1 > 0 && self.pwm2 > 0 && self.flow1 > 0.0 && self.flow2 > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    pub slope: f64,
    pub offset: i32,
}

/// Linear PWM-to-flow fit through both points. Rounding is half away from
/// zero: slope to two decimals, offset to an integer.
pub fn approximate(points: &CalibrationPoints) -> Result<CalibrationResult, CalibrationError> {
    let flow_span = points.flow2 - points.flow1;
    if flow_span == 0.0 {
        return Err(CalibrationError::DegenerateCalibration(points.flow1));
    }

    let raw_slope = f64::from(points.pwm1 - points.pwm2) / flow_span;
    let slope = (raw_slope * 100.0).round() / 100.0;
    let offset = (f64::from(points.pwm1) + points.flow1 * slope - CALIBRATION_OFFSET_BIAS).round();
    if !slope.is_finite() || !offset.is_finite() {
        return Err(CalibrationError::DegenerateCalibration(points.flow1));
    }

    Ok(CalibrationResult {
        slope,
        offset: clamp_i32(offset),
    })
}

/// Like [`approximate`], but refuses points that were never recorded.
pub fn approximate_recorded(
    points: &CalibrationPoints,
) -> Result<CalibrationResult, CalibrationError> {
    if !points.is_complete() {
        return Err(CalibrationError::IncompletePoints {
            pwm1: points.pwm1,
            flow1: points.flow1,
            pwm2: points.pwm2,
            flow2: points.flow2,
        });
    }
    approximate(points)
}

#[allow(clippy::cast_possible_truncation)]
fn clamp_i32(value: f64) -> i32 {
    value.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::{CalibrationPoints, approximate, approximate_recorded};
    use crate::error::CalibrationError;

    #[test]
    fn fits_line_through_two_points() {
        let points = CalibrationPoints {
            pwm1: 2950,
            flow1: 2.1,
            pwm2: 1200,
            flow2: 19.8,
        };
        let result = approximate(&points).expect("fit should succeed");

        let expected_slope = ((2950.0 - 1200.0) / (19.8 - 2.1) * 100.0_f64).round() / 100.0;
        assert!((result.slope - expected_slope).abs() < 1e-9);
        assert!((result.slope - 98.87).abs() < 1e-9);
        assert_eq!(result.offset, 2358);
    }

    #[test]
    fn offset_rounds_half_away_from_zero() {
        // 1000 + 1.5 * 1.0 - 800 = 201.5
        let points = CalibrationPoints {
            pwm1: 1000,
            flow1: 1.5,
            pwm2: 999,
            flow2: 2.5,
        };
        let result = approximate(&points).expect("fit should succeed");
        assert!((result.slope - 1.0).abs() < 1e-9);
        assert_eq!(result.offset, 202);
    }

    #[test]
    fn equal_flows_are_degenerate() {
        let points = CalibrationPoints {
            pwm1: 2950,
            flow1: 5.0,
            pwm2: 1200,
            flow2: 5.0,
        };
        let err = approximate(&points).expect_err("equal flows should fail");
        assert_eq!(err, CalibrationError::DegenerateCalibration(5.0));
    }

    #[test]
    fn completeness_requires_all_positive_values() {
        let mut points = CalibrationPoints {
            pwm1: 2950,
            flow1: 2.1,
            pwm2: 1200,
            flow2: 19.8,
        };
        assert!(points.is_complete());
        points.pwm2 = 0;
        assert!(!points.is_complete());
        assert!(!CalibrationPoints::default().is_complete());
    }

    #[test]
    fn unrecorded_points_are_rejected_before_fitting() {
        let points = CalibrationPoints {
            pwm1: 2950,
            flow1: 2.1,
            ..CalibrationPoints::default()
        };
        let err = approximate_recorded(&points).expect_err("second point missing");
        assert!(matches!(err, CalibrationError::IncompletePoints { pwm2: 0, .. }));
        assert!(err.to_string().contains("incomplete"));
    }
}
