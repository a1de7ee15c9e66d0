use std::collections::VecDeque;

use heapless::Vec as HVec;

use crate::{
    chain::{
        options::{apply_options, parse_usize, InvalidValue, OptionSpec},
        StageContext,
    },
    error::{ReadKind, Result},
    slots::SlotArena,
    stage::{Downstream, ReadStatus, Stage},
    types::{Frame, Sample},
};

use super::read_valid_slots;

const STAGE_NAME: &str = "evthres";

pub const EVTHRES_DEFAULT_COUNT: usize = 5;
pub const EVTHRES_MAX_COUNT: usize = 63;

struct EvthresParams {
    count: usize,
}

const EVTHRES_OPTIONS: &[OptionSpec<EvthresParams>] = &[OptionSpec::new("N", |p, v| {
    match parse_usize(v)? {
        count @ 1..=EVTHRES_MAX_COUNT => p.count = count,
        _ => return Err(InvalidValue),
    }
    Ok(())
})];

#[derive(Clone, Copy, Debug, Default)]
pub struct EventCount {
    seen: usize,
}

/// Holds back each contact until it has produced `N` samples; shorter
/// contacts are discarded whole.
#[derive(Debug)]
pub struct EventThreshold {
    count: usize,
    passing: bool,
    held: HVec<Sample, EVTHRES_MAX_COUNT>,
    outgoing: VecDeque<Sample>,
    slots: SlotArena<EventCount>,
}

pub fn build(_ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = EvthresParams {
        count: EVTHRES_DEFAULT_COUNT,
    };
    apply_options(STAGE_NAME, &mut parsed, EVTHRES_OPTIONS, params)?;
    log::debug!("evthres: N {}", parsed.count);
    Ok(Box::new(EventThreshold::new(parsed.count)))
}

impl EventThreshold {
    pub fn new(count: usize) -> Self {
        Self {
            count: count.clamp(1, EVTHRES_MAX_COUNT),
            passing: false,
            held: HVec::new(),
            outgoing: VecDeque::new(),
            slots: SlotArena::new(),
        }
    }

    fn feed(&mut self, sample: Sample) -> Result<()> {
        if self.passing {
            self.outgoing.try_reserve(1)?;
            self.outgoing.push_back(sample);
            if sample.is_release() {
                self.passing = false;
            }
            return Ok(());
        }

        if sample.is_release() {
            if !self.held.is_empty() {
                log::trace!("evthres: dropped contact of {} samples", self.held.len());
            }
            self.held.clear();
            return Ok(());
        }

        if self.held.push(sample).is_err() {
            log::warn!("evthres: hold buffer overflow");
        }
        if self.held.len() >= self.count {
            self.outgoing.try_reserve(self.held.len())?;
            self.outgoing.extend(self.held.iter().copied());
            self.held.clear();
            self.passing = true;
        }
        Ok(())
    }
}

impl Stage for EventThreshold {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn supports(&self, _op: ReadKind) -> bool {
        true
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        if out.is_empty() {
            return Ok(ReadStatus::Ready(0));
        }
        loop {
            if !self.outgoing.is_empty() {
                let n = out.len().min(self.outgoing.len());
                for (slot, sample) in out.iter_mut().zip(self.outgoing.drain(..n)) {
                    *slot = sample;
                }
                return Ok(ReadStatus::Ready(n));
            }

            let status = down.read(out)?;
            let ReadStatus::Ready(count) = status else {
                return Ok(status);
            };
            if count == 0 {
                return Ok(status);
            }
            for sample in &out[..count] {
                self.feed(*sample)?;
            }
        }
    }

    fn read_mt(
        &mut self,
        down: &mut Downstream<'_>,
        frames: &mut [Frame],
        max_slots: usize,
    ) -> Result<ReadStatus> {
        self.slots.ensure(max_slots)?;
        let count = self.count;
        let slots = &mut self.slots;
        read_valid_slots(down, frames, max_slots, |idx, slot| {
            let Some(state) = slots.get_mut(idx) else {
                return;
            };
            if slot.pressure == 0 {
                let complete = state.seen >= count;
                state.seen = 0;
                if !complete {
                    slot.invalidate();
                }
                return;
            }
            state.seen = state.seen.saturating_add(1);
            if state.seen < count {
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
    fn short_contact_is_dropped() {
        let mut evthres = EventThreshold::new(3);
        let out = run(
            &mut evthres,
            &[pressed(1, 1, 5, 0), pressed(2, 2, 5, 1), released(2, 2, 2)],
            4,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn held_samples_are_replayed_in_order() {
        let mut evthres = EventThreshold::new(3);
        let input = [
            pressed(1, 1, 5, 0),
            pressed(2, 2, 5, 1),
            pressed(3, 3, 5, 2),
            pressed(4, 4, 5, 3),
            released(4, 4, 4),
        ];
        assert_eq!(run(&mut evthres, &input, 2), input.to_vec());
    }

    #[test]
    fn multitouch_withholds_until_count_reached() {
        let mut evthres = EventThreshold::new(2);
        let frames = run_mt(
            &mut evthres,
            vec![
                vec![contact(0, 1, 1, 5, 0), contact(1, 9, 9, 5, 0)],
                vec![contact(0, 1, 1, 5, 1), contact(1, 9, 9, 0, 1)],
                vec![contact(0, 1, 1, 0, 2)],
            ],
            2,
        );
        assert!(!frames[0].has_valid());
        assert!(frames[1].slots[0].is_valid());
        assert!(!frames[1].slots[1].is_valid());
        assert!(frames[2].slots[0].is_valid());
    }
}
