use crate::error::{Result, TsError};

use super::CALIBRATION_SCALE;

const DETERMINANT_EPSILON: f64 = 0.1;

/// A raw reading paired with the screen position the user touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalibrationPoint {
    pub raw_x: i32,
    pub raw_y: i32,
    pub screen_x: i32,
    pub screen_y: i32,
}

/// Least-squares fit of the affine map from five point pairs.
///
/// Returns `a0..a6` in the layout the linear stage expects:
/// `screen_x = (a2 + a0 * raw_x + a1 * raw_y) / a6` and likewise for y.
pub fn perform_calibration(points: &[CalibrationPoint; 5]) -> Result<[i32; 7]> {
    let mut n = 0.0f64;
    let (mut x, mut y, mut x2, mut y2, mut xy) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for point in points {
        let px = f64::from(point.raw_x);
        let py = f64::from(point.raw_y);
        n += 1.0;
        x += px;
        y += py;
        x2 += px * px;
        y2 += py * py;
        xy += px * py;
    }

    let det = n * (x2 * y2 - xy * xy) + x * (xy * y - x * y2) + y * (x * xy - y * x2);
    if det.abs() < DETERMINANT_EPSILON {
        return Err(TsError::Calibration(format!(
            "points are degenerate (determinant {det})"
        )));
    }

    // Inverse of the symmetric normal matrix.
    let a = (x2 * y2 - xy * xy) / det;
    let b = (xy * y - x * y2) / det;
    let c = (x * xy - y * x2) / det;
    let e = (n * y2 - y * y) / det;
    let f = (x * y - n * xy) / det;
    let i = (n * x2 - x * x) / det;

    let fit = |target: fn(&CalibrationPoint) -> i32| {
        let (mut z, mut zx, mut zy) = (0.0f64, 0.0f64, 0.0f64);
        for point in points {
            let t = f64::from(target(point));
            z += t;
            zx += t * f64::from(point.raw_x);
            zy += t * f64::from(point.raw_y);
        }
        let constant = a * z + b * zx + c * zy;
        let x_coef = b * z + e * zx + f * zy;
        let y_coef = c * z + f * zx + i * zy;
        [x_coef, y_coef, constant].map(scale_coefficient)
    };

    let [a0, a1, a2] = fit(|p| p.screen_x);
    let [a3, a4, a5] = fit(|p| p.screen_y);
    let coefficients = [a0?, a1?, a2?, a3?, a4?, a5?, CALIBRATION_SCALE];
    log::debug!("calibration solved: {coefficients:?}");
    Ok(coefficients)
}

fn scale_coefficient(value: f64) -> Result<i32> {
    let scaled = (value * f64::from(CALIBRATION_SCALE)).round();
    if !scaled.is_finite() || scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
        return Err(TsError::Calibration(format!(
            "coefficient {value} does not fit the fixed-point range"
        )));
    }
    Ok(scaled as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(raw_x: i32, raw_y: i32, screen_x: i32, screen_y: i32) -> CalibrationPoint {
        CalibrationPoint {
            raw_x,
            raw_y,
            screen_x,
            screen_y,
        }
    }

    #[test]
    fn recovers_a_pure_scale_and_offset() {
        // screen = raw / 5 - 10 on both axes
        let points = [
            point(300, 300, 50, 50),
            point(3800, 300, 750, 50),
            point(3800, 2200, 750, 430),
            point(300, 2200, 50, 430),
            point(2050, 1250, 400, 240),
        ];
        let a = perform_calibration(&points).unwrap();
        assert_eq!(a[6], CALIBRATION_SCALE);
        assert_eq!(a[0], CALIBRATION_SCALE / 5);
        assert_eq!(a[1], 0);
        assert_eq!(a[2], -10 * CALIBRATION_SCALE);
        assert_eq!(a[3], 0);
        assert_eq!(a[4], CALIBRATION_SCALE / 5);
    }

    #[test]
    fn collinear_points_are_rejected() {
        let points = [
            point(0, 0, 0, 0),
            point(1, 1, 1, 1),
            point(2, 2, 2, 2),
            point(3, 3, 3, 3),
            point(4, 4, 4, 4),
        ];
        assert!(matches!(
            perform_calibration(&points),
            Err(TsError::Calibration(_))
        ));
    }
}
