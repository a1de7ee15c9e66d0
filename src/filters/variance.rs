use heapless::{Deque, Vec as HVec};
use statig::{blocking::IntoStateMachineExt as _, prelude::*};

use crate::{
    chain::{
        options::{apply_options, parse_u32, OptionSpec},
        StageContext,
    },
    error::{ReadKind, Result},
    stage::{Downstream, ReadStatus, Stage},
    types::{squared_distance, squared_u64, Frame, Sample},
};

const STAGE_NAME: &str = "variance";

pub const VARIANCE_DEFAULT_DELTA: u32 = 30;

struct VarianceParams {
    delta: u32,
}

const VARIANCE_OPTIONS: &[OptionSpec<VarianceParams>] = &[OptionSpec::new("delta", |p, v| {
    p.delta = parse_u32(v)?;
    Ok(())
})];

#[derive(Clone, Copy, Debug)]
enum VarianceEvent {
    Sample(Sample),
}

/// Samples released by one dispatch, oldest first.
#[derive(Debug, Default)]
struct VarianceContext {
    emitted: HVec<Sample, 2>,
}

impl VarianceContext {
    fn emit(&mut self, sample: Sample) {
        if self.emitted.push(sample).is_err() {
            log::warn!("variance: dispatch produced more than two samples");
        }
    }
}

struct VarianceHsm {
    delta_sq: u64,
    accepted: Sample,
    withheld: Sample,
}

impl VarianceHsm {
    fn new(delta: u32) -> Self {
        Self {
            delta_sq: squared_u64(delta),
            accepted: Sample::default(),
            withheld: Sample::default(),
        }
    }

    fn is_excursion(&self, sample: &Sample) -> bool {
        squared_distance(sample, &self.accepted) > self.delta_sq
    }

    fn accept(&mut self, context: &mut VarianceContext, sample: Sample) {
        self.accepted = sample;
        context.emit(sample);
    }
}

#[state_machine(initial = "State::idle()")]
impl VarianceHsm {
    /// No contact, nothing accepted yet.
    #[state]
    fn idle(&mut self, context: &mut VarianceContext, event: &VarianceEvent) -> Outcome<State> {
        match event {
            VarianceEvent::Sample(sample) if sample.is_release() => {
                context.emit(*sample);
                Handled
            }
            VarianceEvent::Sample(sample) => {
                self.accept(context, *sample);
                Transition(State::tracking())
            }
        }
    }

    #[state]
    fn tracking(&mut self, context: &mut VarianceContext, event: &VarianceEvent) -> Outcome<State> {
        match event {
            VarianceEvent::Sample(sample) if sample.is_release() => {
                context.emit(*sample);
                Transition(State::idle())
            }
            VarianceEvent::Sample(sample) if self.is_excursion(sample) => {
                self.withheld = *sample;
                Transition(State::pending())
            }
            VarianceEvent::Sample(sample) => {
                self.accept(context, *sample);
                Handled
            }
        }
    }

    /// One excursion withheld; the next sample decides whether it was noise.
    #[state]
    fn pending(&mut self, context: &mut VarianceContext, event: &VarianceEvent) -> Outcome<State> {
        match event {
            VarianceEvent::Sample(sample) if sample.is_release() => {
                log::trace!("variance: pending excursion discarded on release");
                context.emit(*sample);
                Transition(State::idle())
            }
            VarianceEvent::Sample(sample) if self.is_excursion(sample) => {
                context.emit(self.withheld);
                self.accept(context, *sample);
                Transition(State::tracking())
            }
            VarianceEvent::Sample(sample) => {
                log::trace!(
                    "variance: dropped spike at ({}, {})",
                    self.withheld.x,
                    self.withheld.y
                );
                self.accept(context, *sample);
                Transition(State::tracking())
            }
        }
    }
}

/// Suppresses isolated spikes farther than `delta` from the last accepted
/// point, while letting real fast motion (two excursions in a row) through.
pub struct Variance {
    delta: u32,
    single: statig::blocking::StateMachine<VarianceHsm>,
    primary: statig::blocking::StateMachine<VarianceHsm>,
    scratch: Vec<Sample>,
    carry: Deque<Sample, 2>,
    scratch_frames: Vec<Frame>,
    carry_frames: Deque<Frame, 2>,
}

pub fn build(_ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = VarianceParams {
        delta: VARIANCE_DEFAULT_DELTA,
    };
    apply_options(STAGE_NAME, &mut parsed, VARIANCE_OPTIONS, params)?;
    log::debug!("variance: delta {}", parsed.delta);
    Ok(Box::new(Variance::new(parsed.delta)))
}

impl Variance {
    pub fn new(delta: u32) -> Self {
        Self {
            delta,
            single: VarianceHsm::new(delta).state_machine(),
            primary: VarianceHsm::new(delta).state_machine(),
            scratch: Vec::new(),
            carry: Deque::new(),
            scratch_frames: Vec::new(),
            carry_frames: Deque::new(),
        }
    }

    pub fn delta(&self) -> u32 {
        self.delta
    }
}

impl Default for Variance {
    fn default() -> Self {
        Self::new(VARIANCE_DEFAULT_DELTA)
    }
}

fn dispatch(
    machine: &mut statig::blocking::StateMachine<VarianceHsm>,
    sample: Sample,
) -> HVec<Sample, 2> {
    let mut context = VarianceContext::default();
    machine.handle_with_context(&VarianceEvent::Sample(sample), &mut context);
    context.emitted
}

impl Stage for Variance {
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

        let mut produced = 0;
        while produced < out.len() {
            let Some(sample) = self.carry.pop_front() else {
                break;
            };
            out[produced] = sample;
            produced += 1;
        }
        if produced > 0 {
            return Ok(ReadStatus::Ready(produced));
        }

        // Every input can release two samples.
        let budget = (out.len() / 2).max(1);
        if self.scratch.len() < budget {
            self.scratch.try_reserve(budget - self.scratch.len())?;
            self.scratch.resize(budget, Sample::default());
        }

        loop {
            let status = down.read(&mut self.scratch[..budget])?;
            let ReadStatus::Ready(count) = status else {
                return Ok(status);
            };
            if count == 0 {
                return Ok(status);
            }

            for sample in &self.scratch[..count] {
                for emitted in dispatch(&mut self.single, *sample) {
                    if produced < out.len() {
                        out[produced] = emitted;
                        produced += 1;
                    } else if self.carry.push_back(emitted).is_err() {
                        log::warn!("variance: carry full, sample lost");
                    }
                }
            }

            if produced > 0 {
                return Ok(ReadStatus::Ready(produced));
            }
        }
    }

    fn read_mt(
        &mut self,
        down: &mut Downstream<'_>,
        frames: &mut [Frame],
        max_slots: usize,
    ) -> Result<ReadStatus> {
        if frames.is_empty() {
            return Ok(ReadStatus::Ready(0));
        }

        let mut produced = 0;
        while produced < frames.len() {
            let Some(frame) = self.carry_frames.pop_front() else {
                break;
            };
            frames[produced] = frame;
            produced += 1;
        }
        if produced > 0 {
            return Ok(ReadStatus::Ready(produced));
        }

        let budget = (frames.len() / 2).max(1);
        if self.scratch_frames.len() < budget {
            self.scratch_frames
                .try_reserve(budget - self.scratch_frames.len())?;
            self.scratch_frames.resize_with(budget, Frame::default);
        }
        for frame in &mut self.scratch_frames[..budget] {
            frame.prepare(max_slots)?;
        }

        loop {
            let status = down.read_mt(&mut self.scratch_frames[..budget], max_slots)?;
            let ReadStatus::Ready(count) = status else {
                return Ok(status);
            };
            if count == 0 {
                return Ok(status);
            }

            for input in &self.scratch_frames[..count] {
                let Some(primary) = input.slots.first().filter(|slot| slot.is_valid()) else {
                    continue;
                };
                for emitted in dispatch(&mut self.primary, primary.as_sample()) {
                    let mut output = input.clone();
                    for slot in output.slots.iter_mut().skip(1) {
                        slot.invalidate();
                    }
                    output.slots[0].apply_sample(&emitted);

                    if produced < frames.len() {
                        frames[produced] = output;
                        produced += 1;
                    } else if self.carry_frames.push_back(output).is_err() {
                        log::warn!("variance: frame carry full, frame lost");
                    }
                }
            }

            if produced > 0 {
                return Ok(ReadStatus::Ready(produced));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::{contact, pressed, released, run, run_mt};

    fn positions(samples: &[Sample]) -> Vec<(i32, i32, u32)> {
        samples.iter().map(|s| (s.x, s.y, s.pressure)).collect()
    }

    #[test]
    fn isolated_spike_is_dropped() {
        let mut variance = Variance::new(30);
        let out = run(
            &mut variance,
            &[
                pressed(100, 100, 5, 0),
                pressed(105, 100, 5, 1),
                pressed(400, 100, 5, 2),
                pressed(108, 100, 5, 3),
            ],
            8,
        );
        assert_eq!(
            positions(&out),
            vec![(100, 100, 5), (105, 100, 5), (108, 100, 5)]
        );
    }

    #[test]
    fn two_consecutive_excursions_are_both_emitted() {
        let mut variance = Variance::new(30);
        let out = run(
            &mut variance,
            &[
                pressed(100, 100, 5, 0),
                pressed(200, 100, 5, 1),
                pressed(300, 100, 5, 2),
                pressed(310, 100, 5, 3),
            ],
            8,
        );
        assert_eq!(
            positions(&out),
            vec![(100, 100, 5), (200, 100, 5), (300, 100, 5), (310, 100, 5)]
        );
    }

    #[test]
    fn release_discards_pending_excursion() {
        let mut variance = Variance::new(30);
        let out = run(
            &mut variance,
            &[
                pressed(100, 100, 5, 0),
                pressed(500, 100, 5, 1),
                released(500, 100, 2),
                pressed(900, 900, 5, 3),
            ],
            8,
        );
        assert_eq!(
            positions(&out),
            vec![(100, 100, 5), (500, 100, 0), (900, 900, 5)]
        );
    }

    #[test]
    fn single_slot_buffer_carries_the_second_sample() {
        let mut variance = Variance::new(10);
        let out = run(
            &mut variance,
            &[
                pressed(0, 0, 5, 0),
                pressed(50, 0, 5, 1),
                pressed(100, 0, 5, 2),
            ],
            1,
        );
        assert_eq!(positions(&out), vec![(0, 0, 5), (50, 0, 5), (100, 0, 5)]);
    }

    #[test]
    fn multitouch_filters_slot_zero_only() {
        let mut variance = Variance::new(30);
        let frames = run_mt(
            &mut variance,
            vec![
                vec![contact(0, 10, 10, 5, 0), contact(1, 700, 700, 5, 0)],
                vec![contact(0, 300, 10, 5, 1), contact(1, 705, 700, 5, 1)],
                vec![contact(0, 12, 10, 5, 2), contact(1, 710, 700, 5, 2)],
            ],
            2,
        );
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].slots[0].x, 10);
        assert_eq!(frames[1].slots[0].x, 12);
        assert!(frames.iter().all(|frame| !frame.slots[1].is_valid()));
    }
}
