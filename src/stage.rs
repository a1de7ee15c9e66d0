use crate::{
    error::{ReadKind, Result, TsError},
    types::{Frame, Sample},
};

/// Outcome of a successful pull.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` entries were produced. Zero means end of stream or a short read.
    Ready(usize),
    /// A non-blocking source had nothing to deliver yet.
    NotReady,
}

impl ReadStatus {
    pub fn count(self) -> usize {
        match self {
            ReadStatus::Ready(n) => n,
            ReadStatus::NotReady => 0,
        }
    }
}

/// The hardware-facing end of a chain.
pub trait SampleSource {
    fn name(&self) -> &'static str {
        "source"
    }

    /// Whether the given read can succeed. Sources that override `read_mt`
    /// must say so here.
    fn supports(&self, op: ReadKind) -> bool {
        op == ReadKind::Single
    }

    fn read(&mut self, out: &mut [Sample]) -> Result<ReadStatus>;

    fn read_mt(&mut self, frames: &mut [Frame], max_slots: usize) -> Result<ReadStatus> {
        let _ = (frames, max_slots);
        Err(TsError::Unsupported {
            stage: self.name(),
            op: ReadKind::Multi,
        })
    }

    fn finish(self: Box<Self>) {}
}

/// A stateful transform between the caller and the source.
///
/// A stage pulls from `down`, transforms what it got in place and returns it.
/// Stages implement one or both reads; the other defaults to
/// [`TsError::Unsupported`]. A stage overriding `read_mt` also overrides
/// [`Stage::supports`].
pub trait Stage {
    fn name(&self) -> &'static str;

    fn supports(&self, op: ReadKind) -> bool {
        op == ReadKind::Single
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        let _ = (down, out);
        Err(TsError::Unsupported {
            stage: self.name(),
            op: ReadKind::Single,
        })
    }

    fn read_mt(
        &mut self,
        down: &mut Downstream<'_>,
        frames: &mut [Frame],
        max_slots: usize,
    ) -> Result<ReadStatus> {
        let _ = (down, frames, max_slots);
        Err(TsError::Unsupported {
            stage: self.name(),
            op: ReadKind::Multi,
        })
    }

    /// Called exactly once when the owning chain is torn down.
    fn finish(self: Box<Self>) {
        log::debug!("stage '{}' finished", self.name());
    }
}

/// Everything below a stage: the remaining stages (hardware side first) and
/// the source.
pub struct Downstream<'a> {
    stages: &'a mut [Box<dyn Stage>],
    source: &'a mut dyn SampleSource,
}

impl<'a> Downstream<'a> {
    pub fn new(stages: &'a mut [Box<dyn Stage>], source: &'a mut dyn SampleSource) -> Self {
        Self { stages, source }
    }

    pub fn read(&mut self, out: &mut [Sample]) -> Result<ReadStatus> {
        match self.stages.split_last_mut() {
            Some((next, rest)) => {
                let mut below = Downstream {
                    stages: rest,
                    source: &mut *self.source,
                };
                next.read(&mut below, out)
            }
            None => self.source.read(out),
        }
    }

    pub fn read_mt(&mut self, frames: &mut [Frame], max_slots: usize) -> Result<ReadStatus> {
        match self.stages.split_last_mut() {
            Some((next, rest)) => {
                let mut below = Downstream {
                    stages: rest,
                    source: &mut *self.source,
                };
                next.read_mt(&mut below, frames, max_slots)
            }
            None => self.source.read_mt(frames, max_slots),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ReplaySource, ReplayStep};

    struct Offset(i32);

    impl Stage for Offset {
        fn name(&self) -> &'static str {
            "offset"
        }

        fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
            let status = down.read(out)?;
            for sample in &mut out[..status.count()] {
                sample.x += self.0;
            }
            Ok(status)
        }
    }

    #[test]
    fn downstream_applies_stages_from_hardware_side_up() {
        let mut source = ReplaySource::new(vec![ReplayStep::Sample(Sample::new(1, 0, 10, 0))]);
        let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(Offset(10)), Box::new(Offset(100))];
        let mut down = Downstream::new(&mut stages, &mut source);
        let mut out = [Sample::default(); 2];
        assert_eq!(down.read(&mut out).unwrap(), ReadStatus::Ready(1));
        assert_eq!(out[0].x, 111);
    }

    #[test]
    fn stage_without_multitouch_reports_unsupported() {
        let mut source = ReplaySource::new(Vec::new());
        let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(Offset(1))];
        let mut down = Downstream::new(&mut stages, &mut source);
        let mut frames = [Frame::default()];
        let err = down.read_mt(&mut frames, 2).unwrap_err();
        assert!(matches!(
            err,
            TsError::Unsupported {
                stage: "offset",
                op: ReadKind::Multi
            }
        ));
    }

    #[test]
    fn stages_report_single_touch_only_by_default() {
        let stage = Offset(0);
        assert!(stage.supports(ReadKind::Single));
        assert!(!stage.supports(ReadKind::Multi));
    }
}
