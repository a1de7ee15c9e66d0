use crate::{
    chain::{
        options::{apply_options, parse_u32, OptionSpec},
        StageContext,
    },
    error::{ReadKind, Result, TsError},
    slots::SlotArena,
    stage::{Downstream, ReadStatus, Stage},
    types::{Frame, Sample},
};

use super::{read_filtered, read_valid_slots};

const STAGE_NAME: &str = "pthres";

pub const PTHRES_DEFAULT_PMIN: u32 = 1;
pub const PTHRES_DEFAULT_PMAX: u32 = i32::MAX as u32;

struct PthresParams {
    pmin: u32,
    pmax: u32,
}

const PTHRES_OPTIONS: &[OptionSpec<PthresParams>] = &[
    OptionSpec::new("pmin", |p, v| {
        p.pmin = parse_u32(v)?;
        Ok(())
    }),
    OptionSpec::new("pmax", |p, v| {
        p.pmax = parse_u32(v)?;
        Ok(())
    }),
];

#[derive(Clone, Copy, Debug, Default)]
pub struct ThresholdSlot {
    pressed: bool,
    saved: (i32, i32),
}

impl ThresholdSlot {
    fn admit(&mut self, pmin: u32, pmax: u32, sample: &mut Sample) -> bool {
        if sample.is_release() || sample.pressure < pmin {
            if !self.pressed {
                return false;
            }
            self.pressed = false;
            sample.pressure = 0;
            (sample.x, sample.y) = self.saved;
            return true;
        }
        if sample.pressure > pmax {
            log::trace!("pthres: pressure {} above pmax", sample.pressure);
            return false;
        }
        self.pressed = true;
        self.saved = (sample.x, sample.y);
        true
    }
}

/// Turns weak presses into releases and drops implausibly strong ones.
#[derive(Debug)]
pub struct PressureThreshold {
    pmin: u32,
    pmax: u32,
    single: ThresholdSlot,
    slots: SlotArena<ThresholdSlot>,
}

pub fn build(_ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = PthresParams {
        pmin: PTHRES_DEFAULT_PMIN,
        pmax: PTHRES_DEFAULT_PMAX,
    };
    apply_options(STAGE_NAME, &mut parsed, PTHRES_OPTIONS, params)?;
    if parsed.pmin > parsed.pmax {
        return Err(TsError::Config(format!(
            "pthres: pmin {} exceeds pmax {}",
            parsed.pmin, parsed.pmax
        )));
    }
    log::debug!("pthres: pmin {} pmax {}", parsed.pmin, parsed.pmax);
    Ok(Box::new(PressureThreshold::new(parsed.pmin, parsed.pmax)))
}

impl PressureThreshold {
    pub fn new(pmin: u32, pmax: u32) -> Self {
        Self {
            pmin,
            pmax,
            single: ThresholdSlot::default(),
            slots: SlotArena::new(),
        }
    }
}

impl Stage for PressureThreshold {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn supports(&self, _op: ReadKind) -> bool {
        true
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        let (pmin, pmax) = (self.pmin, self.pmax);
        let single = &mut self.single;
        read_filtered(down, out, |sample| single.admit(pmin, pmax, sample))
    }

    fn read_mt(
        &mut self,
        down: &mut Downstream<'_>,
        frames: &mut [Frame],
        max_slots: usize,
    ) -> Result<ReadStatus> {
        self.slots.ensure(max_slots)?;
        let (pmin, pmax) = (self.pmin, self.pmax);
        let slots = &mut self.slots;
        read_valid_slots(down, frames, max_slots, |idx, slot| {
            let Some(state) = slots.get_mut(idx) else {
                return;
            };
            let mut sample = slot.as_sample();
            if state.admit(pmin, pmax, &mut sample) {
                slot.apply_sample(&sample);
            } else {
                slot.invalidate();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::{contact, pressed, released, run, run_mt};

    #[test]
    fn weak_press_becomes_release_at_last_position() {
        let mut pthres = PressureThreshold::new(50, 1000);
        let out = run(
            &mut pthres,
            &[
                pressed(1, 1, 10, 0),
                pressed(2, 2, 100, 1),
                pressed(3, 3, 20, 2),
                released(4, 4, 3),
            ],
            8,
        );
        assert_eq!(out, vec![pressed(2, 2, 100, 1), released(2, 2, 2)]);
    }

    #[test]
    fn strong_press_is_dropped() {
        let mut pthres = PressureThreshold::new(1, 200);
        let out = run(
            &mut pthres,
            &[pressed(1, 1, 100, 0), pressed(2, 2, 900, 1), released(3, 3, 2)],
            1,
        );
        assert_eq!(out, vec![pressed(1, 1, 100, 0), released(1, 1, 2)]);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let result = build(&StageContext::default(), "pmin=10 pmax=5");
        assert!(matches!(result, Err(TsError::Config(_))));
    }

    #[test]
    fn multitouch_tracks_press_per_slot() {
        let mut pthres = PressureThreshold::new(1, 1000);
        let frames = run_mt(
            &mut pthres,
            vec![
                vec![contact(0, 5, 5, 10, 0)],
                vec![contact(0, 6, 6, 0, 1), contact(1, 7, 7, 0, 1)],
            ],
            2,
        );
        assert_eq!((frames[1].slots[0].x, frames[1].slots[0].pressure), (5, 0));
        assert!(!frames[1].slots[1].is_valid());
    }
}
