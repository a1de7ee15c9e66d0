//! Stateful sample filters.

pub mod crop;
pub mod debounce;
pub mod dejitter;
pub mod evthres;
pub mod iir;
pub mod invert;
pub mod lowpass;
pub mod median;
pub mod pthres;
pub mod skip;
pub mod variance;

pub use crop::Crop;
pub use debounce::Debounce;
pub use dejitter::Dejitter;
pub use evthres::EventThreshold;
pub use iir::Iir;
pub use invert::Invert;
pub use lowpass::Lowpass;
pub use median::Median;
pub use pthres::PressureThreshold;
pub use skip::Skip;
pub use variance::Variance;

use crate::{
    error::Result,
    stage::{Downstream, ReadStatus},
    types::{Frame, MtSample, Sample},
};

/// Pulls from `down` and compacts `out` to the samples `keep` accepts.
///
/// If every sample of a batch is dropped the downstream is read again, so
/// `Ready(0)` still means the stream ended.
pub(crate) fn read_filtered(
    down: &mut Downstream<'_>,
    out: &mut [Sample],
    mut keep: impl FnMut(&mut Sample) -> bool,
) -> Result<ReadStatus> {
    loop {
        let status = down.read(out)?;
        let ReadStatus::Ready(count) = status else {
            return Ok(status);
        };
        if count == 0 {
            return Ok(status);
        }
        let mut kept = 0;
        for idx in 0..count {
            let mut sample = out[idx];
            if keep(&mut sample) {
                out[kept] = sample;
                kept += 1;
            }
        }
        if kept > 0 {
            return Ok(ReadStatus::Ready(kept));
        }
    }
}

/// Pulls frames and hands every valid slot to `visit` with its index.
pub(crate) fn read_valid_slots(
    down: &mut Downstream<'_>,
    frames: &mut [Frame],
    max_slots: usize,
    mut visit: impl FnMut(usize, &mut MtSample),
) -> Result<ReadStatus> {
    let status = down.read_mt(frames, max_slots)?;
    for frame in &mut frames[..status.count()] {
        for (idx, slot) in frame.slots.iter_mut().enumerate().take(max_slots) {
            if slot.is_valid() {
                visit(idx, slot);
            }
        }
    }
    Ok(status)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{
        source::ReplaySource,
        stage::{Downstream, ReadStatus, Stage},
        types::{Frame, MtSample, Sample, ValidFlags},
    };

    pub(crate) fn pressed(x: i32, y: i32, pressure: u32, t_ms: u64) -> Sample {
        Sample::new(x, y, pressure, t_ms * 1_000)
    }

    pub(crate) fn released(x: i32, y: i32, t_ms: u64) -> Sample {
        Sample::new(x, y, 0, t_ms * 1_000)
    }

    /// Drains `stage` over `input`, reading `batch` samples at a time.
    pub(crate) fn run(stage: &mut dyn Stage, input: &[Sample], batch: usize) -> Vec<Sample> {
        let mut source = ReplaySource::from_samples(input.iter().copied());
        let mut below: Vec<Box<dyn Stage>> = Vec::new();
        let mut out = vec![Sample::default(); batch];
        let mut collected = Vec::new();
        loop {
            let mut down = Downstream::new(&mut below, &mut source);
            match stage.read(&mut down, &mut out) {
                Ok(ReadStatus::Ready(0)) => break,
                Ok(ReadStatus::Ready(n)) => collected.extend_from_slice(&out[..n]),
                Ok(ReadStatus::NotReady) => continue,
                Err(err) => panic!("stage failed: {err}"),
            }
        }
        collected
    }

    pub(crate) fn contact(slot: i32, x: i32, y: i32, pressure: u32, t_ms: u64) -> MtSample {
        MtSample {
            x,
            y,
            pressure,
            timestamp_us: t_ms * 1_000,
            slot,
            tracking_id: if pressure > 0 { slot } else { -1 },
            valid: ValidFlags::VALID,
            ..MtSample::default()
        }
    }

    /// Drains `stage` over multitouch `input`, one frame per read.
    pub(crate) fn run_mt(
        stage: &mut dyn Stage,
        input: Vec<Vec<MtSample>>,
        max_slots: usize,
    ) -> Vec<Frame> {
        let mut source = ReplaySource::from_frames(input);
        let mut below: Vec<Box<dyn Stage>> = Vec::new();
        let mut collected = Vec::new();
        loop {
            let mut frames = [Frame::with_slots(max_slots).unwrap()];
            let mut down = Downstream::new(&mut below, &mut source);
            match stage.read_mt(&mut down, &mut frames, max_slots) {
                Ok(ReadStatus::Ready(0)) => break,
                Ok(ReadStatus::Ready(_)) => {
                    let [frame] = frames;
                    collected.push(frame);
                }
                Ok(ReadStatus::NotReady) => continue,
                Err(err) => panic!("stage failed: {err}"),
            }
        }
        collected
    }
}
