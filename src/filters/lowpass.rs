use fixed::types::I16F16;

use crate::{
    chain::{
        options::{apply_options, parse_i32, InvalidValue, OptionSpec},
        StageContext,
    },
    error::{ReadKind, Result},
    slots::SlotArena,
    stage::{Downstream, ReadStatus, Stage},
    types::{Frame, Sample},
};

use super::read_valid_slots;

const STAGE_NAME: &str = "lowpass";

pub type Fx = I16F16;

pub const LOWPASS_DEFAULT_FACTOR: Fx = Fx::from_bits(0x6666); // 0.4
pub const LOWPASS_DEFAULT_THRESHOLD: i32 = 2;

struct LowpassParams {
    factor: Fx,
    threshold: i32,
}

const LOWPASS_OPTIONS: &[OptionSpec<LowpassParams>] = &[
    OptionSpec::new("factor", |p, v| {
        let factor: Fx = v.trim().parse().map_err(|_| InvalidValue)?;
        if factor < Fx::ZERO || factor > Fx::ONE {
            return Err(InvalidValue);
        }
        p.factor = factor;
        Ok(())
    }),
    OptionSpec::new("threshold", |p, v| {
        p.threshold = parse_i32(v)?;
        Ok(())
    }),
];

#[derive(Clone, Copy, Debug)]
pub struct LowpassState {
    pen_up: bool,
    last: (i32, i32),
}

impl Default for LowpassState {
    fn default() -> Self {
        Self {
            pen_up: true,
            last: (0, 0),
        }
    }
}

impl LowpassState {
    fn filter(&mut self, factor: Fx, threshold: i32, sample: &mut Sample) {
        if sample.is_release() {
            self.pen_up = true;
            return;
        }
        if self.pen_up {
            self.pen_up = false;
            self.last = (sample.x, sample.y);
            return;
        }
        let x = follow(self.last.0, sample.x, factor, threshold);
        let y = follow(self.last.1, sample.y, factor, threshold);
        self.last = (x, y);
        sample.x = x;
        sample.y = y;
    }
}

/// `last + factor * delta`, truncated toward zero. Deltas within the
/// threshold count as zero.
fn follow(last: i32, current: i32, factor: Fx, threshold: i32) -> i32 {
    let delta = i64::from(current) - i64::from(last);
    if delta.abs() <= i64::from(threshold) {
        return last;
    }
    // Integer math on the raw bits: screen-scale deltas overflow I16F16.
    let scaled = delta * i64::from(factor.to_bits()) / (1 << Fx::FRAC_NBITS);
    (i64::from(last) + scaled).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Moves each output only part of the way towards the new sample.
#[derive(Debug)]
pub struct Lowpass {
    factor: Fx,
    threshold: i32,
    single: LowpassState,
    slots: SlotArena<LowpassState>,
}

pub fn build(_ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = LowpassParams {
        factor: LOWPASS_DEFAULT_FACTOR,
        threshold: LOWPASS_DEFAULT_THRESHOLD,
    };
    apply_options(STAGE_NAME, &mut parsed, LOWPASS_OPTIONS, params)?;
    log::debug!(
        "lowpass: factor {} threshold {}",
        parsed.factor,
        parsed.threshold
    );
    Ok(Box::new(Lowpass::new(parsed.factor, parsed.threshold)))
}

impl Lowpass {
    pub fn new(factor: Fx, threshold: i32) -> Self {
        Self {
            factor: factor.clamp(Fx::ZERO, Fx::ONE),
            threshold,
            single: LowpassState::default(),
            slots: SlotArena::new(),
        }
    }
}

impl Stage for Lowpass {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn supports(&self, _op: ReadKind) -> bool {
        true
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        let status = down.read(out)?;
        for sample in &mut out[..status.count()] {
            self.single.filter(self.factor, self.threshold, sample);
        }
        Ok(status)
    }

    fn read_mt(
        &mut self,
        down: &mut Downstream<'_>,
        frames: &mut [Frame],
        max_slots: usize,
    ) -> Result<ReadStatus> {
        self.slots.ensure(max_slots)?;
        let (factor, threshold) = (self.factor, self.threshold);
        let slots = &mut self.slots;
        read_valid_slots(down, frames, max_slots, |idx, slot| {
            let Some(state) = slots.get_mut(idx) else {
                return;
            };
            let mut sample = slot.as_sample();
            state.filter(factor, threshold, &mut sample);
            slot.apply_sample(&sample);
        })
    }
}
