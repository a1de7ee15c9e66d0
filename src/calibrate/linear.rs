use std::path::PathBuf;

use crate::{
    chain::{
        options::{apply_options, parse_flag, parse_i32, parse_int, InvalidValue, OptionSpec},
        StageContext,
    },
    error::{ReadKind, Result},
    stage::{Downstream, ReadStatus, Stage},
    types::{Frame, Sample},
};

use super::{CalibrationFile, Rotation, IDENTITY_COEFFICIENTS};

const STAGE_NAME: &str = "linear";

#[derive(Clone, Debug)]
struct LinearParams {
    swap_xy: bool,
    pressure_offset: i32,
    pressure_mul: i32,
    pressure_div: i32,
    rotation: Option<Rotation>,
    calibration_file: Option<PathBuf>,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self {
            swap_xy: false,
            pressure_offset: 0,
            pressure_mul: 1,
            pressure_div: 1,
            rotation: None,
            calibration_file: None,
        }
    }
}

const LINEAR_OPTIONS: &[OptionSpec<LinearParams>] = &[
    OptionSpec::new("xyswap", |p, v| {
        p.swap_xy = parse_flag(v)?;
        Ok(())
    }),
    OptionSpec::new("pressure_offset", |p, v| {
        p.pressure_offset = parse_i32(v)?;
        Ok(())
    }),
    OptionSpec::new("pressure_mul", |p, v| {
        p.pressure_mul = parse_i32(v)?;
        Ok(())
    }),
    OptionSpec::new("pressure_div", |p, v| {
        match parse_i32(v)? {
            0 => return Err(InvalidValue),
            div => p.pressure_div = div,
        }
        Ok(())
    }),
    OptionSpec::new("rot", |p, v| {
        let code = u8::try_from(parse_int(v)?).map_err(|_| InvalidValue)?;
        p.rotation = Some(Rotation::from_code(code).ok_or(InvalidValue)?);
        Ok(())
    }),
    OptionSpec::new("calibfile", |p, v| {
        if v.is_empty() {
            return Err(InvalidValue);
        }
        p.calibration_file = Some(PathBuf::from(v));
        Ok(())
    }),
];

/// Maps raw panel coordinates to screen coordinates.
///
/// Affine map first, then the optional axis swap, then rotation relative to
/// the calibration-time resolution, then rescale to the live resolution.
/// Holds no state between calls.
#[derive(Clone, Debug)]
pub struct Linear {
    coefficients: [i64; 7],
    swap_xy: bool,
    rotation: Rotation,
    calibration_resolution: Option<(i64, i64)>,
    output_resolution: Option<(i64, i64)>,
    pressure_offset: i64,
    pressure_mul: i64,
    pressure_div: i64,
}

pub fn build(ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    Ok(Box::new(Linear::from_params(ctx, params)?))
}

impl Linear {
    pub fn from_params(ctx: &StageContext, params: &str) -> Result<Self> {
        let mut parsed = LinearParams::default();
        apply_options(STAGE_NAME, &mut parsed, LINEAR_OPTIONS, params)?;

        let calibration = match parsed
            .calibration_file
            .as_ref()
            .or(ctx.calibration_file.as_ref())
        {
            Some(path) => CalibrationFile::load_or_identity(path)?,
            None => {
                log::warn!("linear: no calibration file configured, using identity");
                CalibrationFile::default()
            }
        };

        let configured = parsed.rotation.unwrap_or(ctx.rotation);
        let mut linear = Self::new(calibration, configured, ctx.resolution);
        linear.swap_xy = parsed.swap_xy;
        linear.pressure_offset = i64::from(parsed.pressure_offset);
        linear.pressure_mul = i64::from(parsed.pressure_mul);
        linear.pressure_div = i64::from(parsed.pressure_div);
        Ok(linear)
    }

    pub fn new(
        calibration: CalibrationFile,
        configured: Rotation,
        output_resolution: Option<(u32, u32)>,
    ) -> Self {
        let mut rotation = configured.relative_to(calibration.rotation);
        if rotation != Rotation::Normal && calibration.resolution.is_none() {
            log::warn!("linear: rotation requested but calibration resolution unknown, ignoring");
            rotation = Rotation::Normal;
        }
        let mut coefficients = calibration.coefficients;
        if coefficients[6] == 0 {
            log::warn!("linear: zero scale divisor in calibration, using identity");
            coefficients = IDENTITY_COEFFICIENTS;
        }
        log::debug!("linear: coefficients {coefficients:?}, rotation {rotation:?}");
        Self {
            coefficients: coefficients.map(i64::from),
            swap_xy: false,
            rotation,
            calibration_resolution: calibration
                .resolution
                .map(|(w, h)| (i64::from(w), i64::from(h))),
            output_resolution: output_resolution.map(|(w, h)| (i64::from(w), i64::from(h))),
            pressure_offset: 0,
            pressure_mul: 1,
            pressure_div: 1,
        }
    }

    pub fn with_swap(mut self, swap_xy: bool) -> Self {
        self.swap_xy = swap_xy;
        self
    }

    pub fn with_pressure(mut self, offset: i32, mul: i32, div: i32) -> Self {
        self.pressure_offset = i64::from(offset);
        self.pressure_mul = i64::from(mul);
        self.pressure_div = if div == 0 { 1 } else { i64::from(div) };
        self
    }

    pub fn transform(&self, sample: &mut Sample) {
        let (x, y) = self.map_point(sample.x, sample.y);
        sample.x = x;
        sample.y = y;
        sample.pressure = self.map_pressure(sample.pressure);
    }

    pub fn map_point(&self, raw_x: i32, raw_y: i32) -> (i32, i32) {
        let a = &self.coefficients;
        let (rx, ry) = (i64::from(raw_x), i64::from(raw_y));
        let mut x = (a[2] + a[0] * rx + a[1] * ry) / a[6];
        let mut y = (a[5] + a[3] * rx + a[4] * ry) / a[6];

        if self.swap_xy {
            core::mem::swap(&mut x, &mut y);
        }

        let mut frame = self.calibration_resolution;
        if let Some((cal_w, cal_h)) = self.calibration_resolution {
            (x, y) = match self.rotation {
                Rotation::Normal => (x, y),
                Rotation::Cw90 => (y, cal_w - 1 - x),
                Rotation::UpsideDown => (cal_w - 1 - x, cal_h - 1 - y),
                Rotation::Ccw90 => (cal_h - 1 - y, x),
            };
            if self.rotation.swaps_axes() {
                frame = Some((cal_h, cal_w));
            }
        }

        if let (Some((from_w, from_h)), Some((to_w, to_h))) = (frame, self.output_resolution) {
            if (from_w, from_h) != (to_w, to_h) && from_w > 0 && from_h > 0 {
                x = x * to_w / from_w;
                y = y * to_h / from_h;
            }
        }

        (saturate_i32(x), saturate_i32(y))
    }

    pub fn map_pressure(&self, pressure: u32) -> u32 {
        let mapped =
            (i64::from(pressure) + self.pressure_offset) * self.pressure_mul / self.pressure_div;
        mapped.clamp(0, i64::from(u32::MAX)) as u32
    }
}

fn saturate_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

impl Stage for Linear {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn supports(&self, _op: ReadKind) -> bool {
        true
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        let status = down.read(out)?;
        for sample in &mut out[..status.count()] {
            self.transform(sample);
        }
        Ok(status)
    }

    fn read_mt(
        &mut self,
        down: &mut Downstream<'_>,
        frames: &mut [Frame],
        max_slots: usize,
    ) -> Result<ReadStatus> {
        let status = down.read_mt(frames, max_slots)?;
        for frame in &mut frames[..status.count()] {
            for slot in frame.slots.iter_mut().filter(|slot| slot.is_valid()) {
                let mut sample = slot.as_sample();
                self.transform(&mut sample);
                slot.apply_sample(&sample);
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        source::ReplaySource,
        types::{MtSample, ValidFlags},
    };

    fn identity_at(resolution: (u32, u32), rotation: Rotation) -> CalibrationFile {
        CalibrationFile {
            coefficients: IDENTITY_COEFFICIENTS,
            resolution: Some(resolution),
            rotation,
        }
    }

    #[test]
    fn affine_map_uses_scale_divisor() {
        let file = CalibrationFile {
            coefficients: [2, 0, 100, 0, 3, -30, 2],
            resolution: None,
            rotation: Rotation::Normal,
        };
        let linear = Linear::new(file, Rotation::Normal, None);
        assert_eq!(linear.map_point(10, 20), (60, 15));
    }

    #[test]
    fn rotation_is_relative_to_calibration_rotation() {
        let linear = Linear::new(identity_at((800, 480), Rotation::Cw90), Rotation::Cw90, None);
        assert_eq!(linear.map_point(10, 20), (10, 20));

        let linear = Linear::new(
            identity_at((800, 480), Rotation::Normal),
            Rotation::UpsideDown,
            None,
        );
        assert_eq!(linear.map_point(0, 0), (799, 479));
    }

    #[test]
    fn quarter_turn_then_rescale_uses_rotated_frame() {
        let linear = Linear::new(
            identity_at((800, 480), Rotation::Normal),
            Rotation::Cw90,
            Some((240, 400)),
        );
        // (10, 20) rotates to (20, 789) in a 480x800 frame, then halves.
        assert_eq!(linear.map_point(10, 20), (10, 394));
    }

    #[test]
    fn swap_and_pressure_remap() {
        let linear = Linear::new(CalibrationFile::default(), Rotation::Normal, None)
            .with_swap(true)
            .with_pressure(10, 3, 2);
        let mut sample = Sample::new(5, 7, 20, 0);
        linear.transform(&mut sample);
        assert_eq!((sample.x, sample.y, sample.pressure), (7, 5, 45));
    }

    #[test]
    fn options_load_calibration_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pointercal");
        CalibrationFile {
            coefficients: [65_536, 0, 65_536 * 5, 0, 65_536, 0, 65_536],
            resolution: None,
            rotation: Rotation::Normal,
        }
        .write(&path)
        .unwrap();

        let params = format!("calibfile={} pressure_div=2", path.display());
        let linear = Linear::from_params(&StageContext::default(), &params).unwrap();
        assert_eq!(linear.map_point(1, 1), (6, 1));
        assert_eq!(linear.map_pressure(9), 4);
    }

    #[test]
    fn zero_scale_divisor_falls_back_to_identity() {
        let file = CalibrationFile {
            coefficients: [1, 0, 0, 0, 1, 0, 0],
            ..CalibrationFile::default()
        };
        let linear = Linear::new(file, Rotation::Normal, None);
        assert_eq!(linear.map_point(12, 34), (12, 34));
    }

    #[test]
    fn zero_pressure_divisor_is_rejected() {
        assert!(Linear::from_params(&StageContext::default(), "pressure_div=0").is_err());
    }

    #[test]
    fn multitouch_maps_only_valid_slots() {
        let valid = MtSample {
            x: 3,
            y: 4,
            pressure: 9,
            tracking_id: 1,
            valid: ValidFlags::VALID,
            ..MtSample::default()
        };
        let stale = MtSample {
            x: 3,
            y: 4,
            slot: 1,
            ..MtSample::default()
        };
        let mut source = ReplaySource::from_frames([vec![valid, stale]]);
        let mut linear = Linear::new(CalibrationFile::default(), Rotation::Normal, None).with_swap(true);
        let mut stages: Vec<Box<dyn Stage>> = Vec::new();
        let mut down = Downstream::new(&mut stages, &mut source);
        let mut frames = [Frame::with_slots(2).unwrap()];
        let status = linear.read_mt(&mut down, &mut frames, 2).unwrap();
        assert_eq!(status, ReadStatus::Ready(1));
        assert_eq!((frames[0].slots[0].x, frames[0].slots[0].y), (4, 3));
        assert_eq!((frames[0].slots[1].x, frames[0].slots[1].y), (3, 4));
    }
}
