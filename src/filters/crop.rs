use std::path::PathBuf;

use crate::{
    calibrate::CalibrationFile,
    chain::{
        options::{apply_options, InvalidValue, OptionSpec},
        StageContext,
    },
    error::{ReadKind, Result, TsError},
    slots::SlotArena,
    stage::{Downstream, ReadStatus, Stage},
    types::{Frame, Sample},
};

use super::{read_filtered, read_valid_slots};

const STAGE_NAME: &str = "crop";

#[derive(Default)]
struct CropParams {
    calibration_file: Option<PathBuf>,
}

const CROP_OPTIONS: &[OptionSpec<CropParams>] = &[OptionSpec::new("calibfile", |p, v| {
    if v.is_empty() {
        return Err(InvalidValue);
    }
    p.calibration_file = Some(PathBuf::from(v));
    Ok(())
})];

#[derive(Clone, Copy, Debug, Default)]
pub struct CropSlot {
    last_pressure: u32,
}

impl CropSlot {
    fn admit(&mut self, width: i64, height: i64, sample: &Sample) -> bool {
        let (x, y) = (i64::from(sample.x), i64::from(sample.y));
        let inside = (0..width).contains(&x) && (0..height).contains(&y);
        // An outside release still closes a contact that was reported.
        if !inside && (!sample.is_release() || self.last_pressure == 0) {
            return false;
        }
        self.last_pressure = sample.pressure;
        true
    }
}

/// Drops samples that fall outside the calibrated screen area.
#[derive(Debug)]
pub struct Crop {
    width: i64,
    height: i64,
    single: CropSlot,
    slots: SlotArena<CropSlot>,
}

pub fn build(ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = CropParams::default();
    apply_options(STAGE_NAME, &mut parsed, CROP_OPTIONS, params)?;

    let from_file = match parsed
        .calibration_file
        .as_ref()
        .or(ctx.calibration_file.as_ref())
    {
        Some(path) => CalibrationFile::load_or_identity(path)?.resolution,
        None => None,
    };
    let Some((width, height)) = from_file.or(ctx.resolution) else {
        return Err(TsError::Config(
            "crop: no calibration resolution and no device resolution".into(),
        ));
    };
    log::debug!("crop: {width}x{height}");
    Ok(Box::new(Crop::new(width, height)))
}

impl Crop {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: i64::from(width),
            height: i64::from(height),
            single: CropSlot::default(),
            slots: SlotArena::new(),
        }
    }
}

impl Stage for Crop {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn supports(&self, _op: ReadKind) -> bool {
        true
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        let (width, height) = (self.width, self.height);
        let single = &mut self.single;
        read_filtered(down, out, |sample| single.admit(width, height, sample))
    }

    fn read_mt(
        &mut self,
        down: &mut Downstream<'_>,
        frames: &mut [Frame],
        max_slots: usize,
    ) -> Result<ReadStatus> {
        self.slots.ensure(max_slots)?;
        let (width, height) = (self.width, self.height);
        let slots = &mut self.slots;
        read_valid_slots(down, frames, max_slots, |idx, slot| {
            let Some(state) = slots.get_mut(idx) else {
                return;
            };
            if !state.admit(width, height, &slot.as_sample()) {
                slot.invalidate();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;
    use crate::filters::test_support::{pressed, released, run};

    #[test]
    fn outside_samples_are_dropped() {
        let mut crop = Crop::new(100, 50);
        let out = run(
            &mut crop,
            &[
                pressed(-1, 10, 5, 0),
                pressed(10, 10, 5, 1),
                pressed(100, 10, 5, 2),
                released(200, 10, 3),
                released(200, 10, 4),
            ],
            8,
        );
        assert_eq!(out, vec![pressed(10, 10, 5, 1), released(200, 10, 3)]);
    }

    #[test]
    fn resolution_comes_from_calibration_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1 0 0 0 1 0 1 320 240 0").unwrap();
        let ctx = StageContext {
            resolution: Some((800, 480)),
            ..StageContext::default()
        };
        let params = format!("calibfile={}", file.path().display());
        let mut stage = build(&ctx, &params).unwrap();
        let out = run(stage.as_mut(), &[pressed(400, 10, 5, 0), pressed(300, 10, 5, 1)], 4);
        assert_eq!(out, vec![pressed(300, 10, 5, 1)]);
    }

    #[test]
    fn missing_resolution_is_a_config_error() {
        assert!(matches!(
            build(&StageContext::default(), ""),
            Err(TsError::Config(_))
        ));
    }
}
