use std::collections::VecDeque;

use crate::{
    error::{ReadKind, Result, TsError},
    stage::{ReadStatus, SampleSource},
    types::{Frame, MtSample, Sample},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayStep {
    Sample(Sample),
    /// One multitouch frame; each entry lands in the slot its `slot` field names.
    Frame(Vec<MtSample>),
    NotReady,
    Fail(i32),
}

/// A scripted source, used for trace replay and tests.
#[derive(Clone, Debug, Default)]
pub struct ReplaySource {
    steps: VecDeque<ReplayStep>,
}

impl ReplaySource {
    pub fn new(steps: Vec<ReplayStep>) -> Self {
        Self {
            steps: steps.into(),
        }
    }

    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            steps: samples.into_iter().map(ReplayStep::Sample).collect(),
        }
    }

    pub fn from_frames(frames: impl IntoIterator<Item = Vec<MtSample>>) -> Self {
        Self {
            steps: frames.into_iter().map(ReplayStep::Frame).collect(),
        }
    }

    pub fn push(&mut self, step: ReplayStep) {
        self.steps.push_back(step);
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl SampleSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    /// A script of samples serves `read`, a script of frames serves `read_mt`.
    fn supports(&self, op: ReadKind) -> bool {
        self.steps.iter().all(|step| match step {
            ReplayStep::Sample(_) => op == ReadKind::Single,
            ReplayStep::Frame(_) => op == ReadKind::Multi,
            ReplayStep::NotReady | ReplayStep::Fail(_) => true,
        })
    }

    fn read(&mut self, out: &mut [Sample]) -> Result<ReadStatus> {
        let mut produced = 0;
        while produced < out.len() {
            match self.steps.front() {
                Some(ReplayStep::Sample(sample)) => {
                    out[produced] = *sample;
                    produced += 1;
                    self.steps.pop_front();
                }
                Some(ReplayStep::NotReady) if produced == 0 => {
                    self.steps.pop_front();
                    return Ok(ReadStatus::NotReady);
                }
                Some(ReplayStep::Fail(code)) if produced == 0 => {
                    let code = *code;
                    self.steps.pop_front();
                    return Err(TsError::Source(code));
                }
                Some(ReplayStep::Frame(_)) if produced == 0 => {
                    return Err(TsError::Unsupported {
                        stage: "replay",
                        op: ReadKind::Single,
                    });
                }
                _ => break,
            }
        }
        Ok(ReadStatus::Ready(produced))
    }

    fn read_mt(&mut self, frames: &mut [Frame], max_slots: usize) -> Result<ReadStatus> {
        let mut produced = 0;
        while produced < frames.len() {
            match self.steps.front() {
                Some(ReplayStep::Frame(slots)) => {
                    let frame = &mut frames[produced];
                    frame.prepare(max_slots)?;
                    for sample in slots {
                        let Ok(idx) = usize::try_from(sample.slot) else {
                            continue;
                        };
                        if let Some(target) = frame.slots.get_mut(idx) {
                            *target = *sample;
                        }
                    }
                    produced += 1;
                    self.steps.pop_front();
                }
                Some(ReplayStep::NotReady) if produced == 0 => {
                    self.steps.pop_front();
                    return Ok(ReadStatus::NotReady);
                }
                Some(ReplayStep::Fail(code)) if produced == 0 => {
                    let code = *code;
                    self.steps.pop_front();
                    return Err(TsError::Source(code));
                }
                Some(ReplayStep::Sample(_)) if produced == 0 => {
                    return Err(TsError::Unsupported {
                        stage: "replay",
                        op: ReadKind::Multi,
                    });
                }
                _ => break,
            }
        }
        Ok(ReadStatus::Ready(produced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_interrupts_only_an_empty_read() {
        let mut source = ReplaySource::new(vec![
            ReplayStep::Sample(Sample::new(1, 1, 5, 0)),
            ReplayStep::NotReady,
            ReplayStep::Sample(Sample::new(2, 2, 5, 10)),
        ]);
        let mut out = [Sample::default(); 4];
        assert_eq!(source.read(&mut out).unwrap(), ReadStatus::Ready(1));
        assert_eq!(source.read(&mut out).unwrap(), ReadStatus::NotReady);
        assert_eq!(source.read(&mut out).unwrap(), ReadStatus::Ready(1));
        assert_eq!(out[0].x, 2);
        assert_eq!(source.read(&mut out).unwrap(), ReadStatus::Ready(0));
    }

    #[test]
    fn failure_code_is_propagated_unchanged() {
        let mut source = ReplaySource::new(vec![ReplayStep::Fail(-5)]);
        let mut out = [Sample::default(); 1];
        assert!(matches!(source.read(&mut out), Err(TsError::Source(-5))));
    }
}
