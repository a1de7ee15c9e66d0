use crate::{
    chain::{
        options::{apply_options, parse_i32, OptionSpec},
        StageContext,
    },
    error::{ReadKind, Result, TsError},
    stage::{Downstream, ReadStatus, Stage},
    types::{Frame, Sample},
};

use super::read_valid_slots;

const STAGE_NAME: &str = "invert";

#[derive(Default)]
struct InvertParams {
    x0: Option<i32>,
    y0: Option<i32>,
}

const INVERT_OPTIONS: &[OptionSpec<InvertParams>] = &[
    OptionSpec::new("x0", |p, v| {
        p.x0 = Some(parse_i32(v)?);
        Ok(())
    }),
    OptionSpec::new("y0", |p, v| {
        p.y0 = Some(parse_i32(v)?);
        Ok(())
    }),
];

/// Mirrors an axis: `x = x0 - x`, `y = y0 - y`.
#[derive(Clone, Copy, Debug)]
pub struct Invert {
    x0: Option<i32>,
    y0: Option<i32>,
}

pub fn build(_ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = InvertParams::default();
    apply_options(STAGE_NAME, &mut parsed, INVERT_OPTIONS, params)?;
    if parsed.x0.is_none() && parsed.y0.is_none() {
        return Err(TsError::Config("invert: set x0, y0 or both".into()));
    }
    Ok(Box::new(Invert::new(parsed.x0, parsed.y0)))
}

impl Invert {
    pub fn new(x0: Option<i32>, y0: Option<i32>) -> Self {
        Self { x0, y0 }
    }

    fn apply(&self, x: &mut i32, y: &mut i32) {
        if let Some(x0) = self.x0 {
            *x = x0.wrapping_sub(*x);
        }
        if let Some(y0) = self.y0 {
            *y = y0.wrapping_sub(*y);
        }
    }
}

impl Stage for Invert {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn supports(&self, _op: ReadKind) -> bool {
        true
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        let status = down.read(out)?;
        for sample in &mut out[..status.count()] {
            self.apply(&mut sample.x, &mut sample.y);
        }
        Ok(status)
    }

    fn read_mt(
        &mut self,
        down: &mut Downstream<'_>,
        frames: &mut [Frame],
        max_slots: usize,
    ) -> Result<ReadStatus> {
        let invert = *self;
        read_valid_slots(down, frames, max_slots, |_, slot| {
            invert.apply(&mut slot.x, &mut slot.y);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::{contact, pressed, run, run_mt};

    #[test]
    fn mirrors_only_configured_axes() {
        let mut stage = build(&StageContext::default(), "y0=479").unwrap();
        let out = run(stage.as_mut(), &[pressed(10, 0, 5, 0), pressed(10, 479, 5, 1)], 4);
        assert_eq!((out[0].x, out[0].y), (10, 479));
        assert_eq!((out[1].x, out[1].y), (10, 0));
    }

    #[test]
    fn needs_at_least_one_axis() {
        assert!(matches!(
            build(&StageContext::default(), ""),
            Err(TsError::Config(_))
        ));
    }

    #[test]
    fn multitouch_mirrors_valid_slots() {
        let mut invert = Invert::new(Some(100), None);
        let frames = run_mt(&mut invert, vec![vec![contact(1, 30, 7, 5, 0)]], 2);
        assert_eq!((frames[0].slots[1].x, frames[0].slots[1].y), (70, 7));
        assert_eq!(frames[0].slots[0].x, 0);
    }
}
