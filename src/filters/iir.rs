use crate::{
    chain::{
        options::{apply_options, parse_u32, OptionSpec},
        StageContext,
    },
    error::{ReadKind, Result},
    slots::SlotArena,
    stage::{Downstream, ReadStatus, Stage},
    types::{Frame, Sample},
};

use super::read_valid_slots;

const STAGE_NAME: &str = "iir";

struct IirParams {
    numerator: u32,
    denominator: u32,
}

const IIR_OPTIONS: &[OptionSpec<IirParams>] = &[
    OptionSpec::new("N", |p, v| {
        p.numerator = parse_u32(v)?;
        Ok(())
    }),
    OptionSpec::new("D", |p, v| {
        p.denominator = parse_u32(v)?;
        Ok(())
    }),
];

/// Smoothed position of one contact.
#[derive(Clone, Copy, Debug, Default)]
pub struct IirState {
    active: bool,
    s: i64,
    t: i64,
}

impl IirState {
    fn filter(&mut self, numerator: i64, denominator: i64, sample: &mut Sample) {
        if sample.is_release() || !self.active {
            self.s = i64::from(sample.x);
            self.t = i64::from(sample.y);
            self.active = !sample.is_release();
            return;
        }
        let step = |save: i64, new: i32| {
            (numerator * save + (denominator - numerator) * i64::from(new) + denominator / 2)
                / denominator
        };
        self.s = step(self.s, sample.x);
        self.t = step(self.t, sample.y);
        sample.x = clamp_i32(self.s);
        sample.y = clamp_i32(self.t);
    }
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// First-order recursive smoothing: `s = (N*s + (D-N)*new + D/2) / D`.
#[derive(Debug)]
pub struct Iir {
    numerator: i64,
    denominator: i64,
    single: IirState,
    slots: SlotArena<IirState>,
}

pub fn build(_ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = IirParams {
        numerator: 0,
        denominator: 1,
    };
    apply_options(STAGE_NAME, &mut parsed, IIR_OPTIONS, params)?;
    if parsed.denominator == 0 {
        log::warn!("iir: D=0 would divide by zero, using D=1");
        parsed.denominator = 1;
    }
    log::debug!("iir: N {} D {}", parsed.numerator, parsed.denominator);
    Ok(Box::new(Iir::new(parsed.numerator, parsed.denominator)))
}

impl Iir {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator: i64::from(numerator),
            denominator: i64::from(denominator.max(1)),
            single: IirState::default(),
            slots: SlotArena::new(),
        }
    }
}

impl Stage for Iir {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn supports(&self, _op: ReadKind) -> bool {
        true
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        let status = down.read(out)?;
        for sample in &mut out[..status.count()] {
            self.single
                .filter(self.numerator, self.denominator, sample);
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
        let (numerator, denominator) = (self.numerator, self.denominator);
        let slots = &mut self.slots;
        read_valid_slots(down, frames, max_slots, |idx, slot| {
            let Some(state) = slots.get_mut(idx) else {
                return;
            };
            let mut sample = slot.as_sample();
            state.filter(numerator, denominator, &mut sample);
            slot.apply_sample(&sample);
        })
    }
}
