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

use super::{read_filtered, read_valid_slots};

const STAGE_NAME: &str = "debounce";

struct DebounceParams {
    drop_threshold_ms: u32,
}

const DEBOUNCE_OPTIONS: &[OptionSpec<DebounceParams>] =
    &[OptionSpec::new("drop_threshold", |p, v| {
        p.drop_threshold_ms = parse_u32(v)?;
        Ok(())
    })];

#[derive(Clone, Copy, Debug, Default)]
pub struct DebounceSlot {
    last_release_us: Option<u64>,
}

impl DebounceSlot {
    /// Returns whether the sample survives.
    fn admit(&mut self, threshold_us: u64, sample: &Sample) -> bool {
        if sample.is_release() {
            self.last_release_us = Some(sample.timestamp_us);
            return true;
        }
        match self.last_release_us {
            Some(released) => match sample.timestamp_us.checked_sub(released) {
                Some(elapsed) => elapsed >= threshold_us,
                // Clock went backwards.
                None => true,
            },
            None => true,
        }
    }
}

/// Drops presses that follow a release by less than `drop_threshold` ms.
#[derive(Debug)]
pub struct Debounce {
    threshold_us: u64,
    single: DebounceSlot,
    slots: SlotArena<DebounceSlot>,
}

pub fn build(_ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = DebounceParams {
        drop_threshold_ms: 0,
    };
    apply_options(STAGE_NAME, &mut parsed, DEBOUNCE_OPTIONS, params)?;
    log::debug!("debounce: drop_threshold {} ms", parsed.drop_threshold_ms);
    Ok(Box::new(Debounce::new(parsed.drop_threshold_ms)))
}

impl Debounce {
    pub fn new(drop_threshold_ms: u32) -> Self {
        Self {
            threshold_us: u64::from(drop_threshold_ms) * 1_000,
            single: DebounceSlot::default(),
            slots: SlotArena::new(),
        }
    }
}

impl Stage for Debounce {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn supports(&self, _op: ReadKind) -> bool {
        true
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        let threshold_us = self.threshold_us;
        let single = &mut self.single;
        read_filtered(down, out, |sample| {
            let keep = single.admit(threshold_us, sample);
            if !keep {
                log::trace!("debounce: dropped press at {} us", sample.timestamp_us);
            }
            keep
        })
    }

    fn read_mt(
        &mut self,
        down: &mut Downstream<'_>,
        frames: &mut [Frame],
        max_slots: usize,
    ) -> Result<ReadStatus> {
        self.slots.ensure(max_slots)?;
        let threshold_us = self.threshold_us;
        let slots = &mut self.slots;
        read_valid_slots(down, frames, max_slots, |idx, slot| {
            let Some(state) = slots.get_mut(idx) else {
                return;
            };
            if !state.admit(threshold_us, &slot.as_sample()) {
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
    fn presses_inside_the_window_are_dropped() {
        let mut debounce = Debounce::new(20);
        let out = run(
            &mut debounce,
            &[
                pressed(1, 1, 5, 0),
                released(1, 1, 10),
                pressed(2, 2, 5, 15),
                pressed(3, 3, 5, 29),
                pressed(4, 4, 5, 30),
            ],
            8,
        );
        let times: Vec<u64> = out.iter().map(|s| s.timestamp_us / 1_000).collect();
        assert_eq!(times, vec![0, 10, 30]);
    }

    #[test]
    fn zero_threshold_passes_everything() {
        let mut debounce = Debounce::new(0);
        let input = [pressed(1, 1, 5, 0), released(1, 1, 0), pressed(1, 1, 5, 0)];
        assert_eq!(run(&mut debounce, &input, 1), input.to_vec());
    }

    #[test]
    fn slots_debounce_independently() {
        let mut debounce = Debounce::new(50);
        let frames = run_mt(
            &mut debounce,
            vec![
                vec![contact(0, 1, 1, 0, 0), contact(1, 9, 9, 5, 0)],
                vec![contact(0, 1, 1, 5, 10), contact(1, 9, 9, 5, 10)],
            ],
            2,
        );
        assert!(!frames[1].slots[0].is_valid());
        assert!(frames[1].slots[1].is_valid());
    }
}
