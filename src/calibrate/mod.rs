pub mod file;
pub mod linear;
pub mod solve;

pub use file::CalibrationFile;
pub use linear::Linear;
pub use solve::{perform_calibration, CalibrationPoint};

/// Fixed-point divisor the solver stores in `a6`.
pub const CALIBRATION_SCALE: i32 = 65_536;

/// Identity affine map in `a0..a6` layout.
pub const IDENTITY_COEFFICIENTS: [i32; 7] = [
    CALIBRATION_SCALE,
    0,
    0,
    0,
    CALIBRATION_SCALE,
    0,
    CALIBRATION_SCALE,
];

/// Display rotation in 90 degree steps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Normal,
    Cw90,
    UpsideDown,
    Ccw90,
}

impl Rotation {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Rotation::Normal),
            1 => Some(Rotation::Cw90),
            2 => Some(Rotation::UpsideDown),
            3 => Some(Rotation::Ccw90),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Rotation::Normal => 0,
            Rotation::Cw90 => 1,
            Rotation::UpsideDown => 2,
            Rotation::Ccw90 => 3,
        }
    }

    /// Steps needed to go from `from` to `self`.
    pub fn relative_to(self, from: Rotation) -> Rotation {
        let steps = (self.code() + 4 - from.code()) % 4;
        Rotation::from_code(steps).unwrap_or_default()
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Ccw90)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_rotation_wraps() {
        assert_eq!(Rotation::Normal.relative_to(Rotation::Cw90), Rotation::Ccw90);
        assert_eq!(Rotation::UpsideDown.relative_to(Rotation::Cw90), Rotation::Cw90);
        assert_eq!(Rotation::Ccw90.relative_to(Rotation::Ccw90), Rotation::Normal);
    }
}
