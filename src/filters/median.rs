use heapless::{Deque, Vec as HVec};

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

const STAGE_NAME: &str = "median";

pub const MEDIAN_DEFAULT_DEPTH: usize = 3;
pub const MEDIAN_MAX_DEPTH: usize = 127;

struct MedianParams {
    depth: usize,
}

const MEDIAN_OPTIONS: &[OptionSpec<MedianParams>] = &[OptionSpec::new("depth", |p, v| {
    match parse_usize(v)? {
        depth @ 1..=MEDIAN_MAX_DEPTH => p.depth = depth,
        _ => return Err(InvalidValue),
    }
    Ok(())
})];

/// Rolling windows of one contact.
#[derive(Clone, Debug, Default)]
pub struct MedianWindow {
    x: Deque<i32, MEDIAN_MAX_DEPTH>,
    y: Deque<i32, MEDIAN_MAX_DEPTH>,
    pressure: Deque<u32, MEDIAN_MAX_DEPTH>,
    last_output: Option<(i32, i32)>,
}

impl MedianWindow {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.pressure.clear();
    }

    /// Feeds one sample and rewrites it with the window medians.
    pub fn filter(&mut self, depth: usize, sample: &mut Sample) {
        if sample.is_release() {
            self.clear();
            if let Some((x, y)) = self.last_output.take() {
                sample.x = x;
                sample.y = y;
            }
            return;
        }

        push_bounded(&mut self.x, depth, sample.x);
        push_bounded(&mut self.y, depth, sample.y);
        push_bounded(&mut self.pressure, depth, sample.pressure);

        sample.x = median_of(&self.x);
        sample.y = median_of(&self.y);
        sample.pressure = median_of(&self.pressure);
        self.last_output = Some((sample.x, sample.y));
    }
}

fn push_bounded<T: Copy, const N: usize>(window: &mut Deque<T, N>, depth: usize, value: T) {
    while window.len() >= depth.min(N) {
        window.pop_front();
    }
    // Room was made above.
    let _ = window.push_back(value);
}

fn median_of<T: Copy + Ord + Default, const N: usize>(window: &Deque<T, N>) -> T {
    let mut sorted: HVec<T, N> = HVec::new();
    for value in window.iter() {
        if sorted.push(*value).is_err() {
            break;
        }
    }
    sorted.sort_unstable();
    sorted.get(sorted.len() / 2).copied().unwrap_or_default()
}

/// Per-axis median over the last `depth` samples of a contact.
#[derive(Debug)]
pub struct Median {
    depth: usize,
    single: MedianWindow,
    slots: SlotArena<MedianWindow>,
}

pub fn build(_ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = MedianParams {
        depth: MEDIAN_DEFAULT_DEPTH,
    };
    apply_options(STAGE_NAME, &mut parsed, MEDIAN_OPTIONS, params)?;
    log::debug!("median: depth {}", parsed.depth);
    Ok(Box::new(Median::new(parsed.depth)))
}

impl Median {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.clamp(1, MEDIAN_MAX_DEPTH),
            single: MedianWindow::default(),
            slots: SlotArena::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Default for Median {
    fn default() -> Self {
        Self::new(MEDIAN_DEFAULT_DEPTH)
    }
}

impl Stage for Median {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn supports(&self, _op: ReadKind) -> bool {
        true
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        let status = down.read(out)?;
        for sample in &mut out[..status.count()] {
            self.single.filter(self.depth, sample);
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
        let depth = self.depth;
        let slots = &mut self.slots;
        read_valid_slots(down, frames, max_slots, |idx, slot| {
            let Some(window) = slots.get_mut(idx) else {
                return;
            };
            let mut sample = slot.as_sample();
            window.filter(depth, &mut sample);
            slot.apply_sample(&sample);
        })
    }
}
