use crate::{
    chain::{
        options::{apply_options, parse_u32, OptionSpec},
        StageContext,
    },
    error::Result,
    stage::{Downstream, ReadStatus, Stage},
    types::{squared_distance, squared_u64, Sample},
};

const STAGE_NAME: &str = "dejitter";

pub const DEJITTER_DEFAULT_DELTA: u32 = 100;

const HISTORY_LEN: usize = 4;

/// Newest-first weights for 2, 3 and 4 samples of history; the last entry is
/// the right shift that divides by their sum.
const WEIGHTS: [[i64; HISTORY_LEN + 1]; HISTORY_LEN - 1] = [
    [5, 3, 0, 0, 3],
    [8, 5, 3, 0, 4],
    [6, 4, 3, 3, 4],
];

struct DejitterParams {
    delta: u32,
}

const DEJITTER_OPTIONS: &[OptionSpec<DejitterParams>] = &[OptionSpec::new("delta", |p, v| {
    p.delta = parse_u32(v)?;
    Ok(())
})];

/// Weighted moving average over the last few samples of a slow-moving pen.
/// Fast moves reset the history so the cursor does not lag behind.
#[derive(Debug)]
pub struct Dejitter {
    delta_sq: u64,
    history: [Sample; HISTORY_LEN],
    len: usize,
    head: usize,
}

pub fn build(_ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = DejitterParams {
        delta: DEJITTER_DEFAULT_DELTA,
    };
    apply_options(STAGE_NAME, &mut parsed, DEJITTER_OPTIONS, params)?;
    log::debug!("dejitter: delta {}", parsed.delta);
    Ok(Box::new(Dejitter::new(parsed.delta)))
}

impl Dejitter {
    pub fn new(delta: u32) -> Self {
        Self {
            delta_sq: squared_u64(delta),
            history: [Sample::default(); HISTORY_LEN],
            len: 0,
            head: 0,
        }
    }

    fn filter(&mut self, sample: &mut Sample) {
        if sample.is_release() {
            self.len = 0;
            return;
        }

        if self.len > 0 {
            let prev = &self.history[(self.head + HISTORY_LEN - 1) % HISTORY_LEN];
            if squared_distance(sample, prev) > self.delta_sq {
                log::trace!("dejitter: movement above threshold, history reset");
                self.len = 0;
            }
        }

        self.history[self.head] = *sample;
        self.len = (self.len + 1).min(HISTORY_LEN);
        if self.len > 1 {
            self.average(sample);
        }
        self.head = (self.head + 1) % HISTORY_LEN;
    }

    fn average(&self, sample: &mut Sample) {
        let weights = &WEIGHTS[self.len - 2];
        let (mut x, mut y, mut p) = (0i64, 0i64, 0i64);
        let mut idx = self.head;
        for weight in &weights[..self.len] {
            let entry = &self.history[idx];
            x += i64::from(entry.x) * weight;
            y += i64::from(entry.y) * weight;
            p += i64::from(entry.pressure) * weight;
            idx = (idx + HISTORY_LEN - 1) % HISTORY_LEN;
        }
        let shift = weights[HISTORY_LEN];
        sample.x = (x >> shift) as i32;
        sample.y = (y >> shift) as i32;
        sample.pressure = (p >> shift) as u32;
    }
}

impl Stage for Dejitter {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        let status = down.read(out)?;
        for sample in &mut out[..status.count()] {
            self.filter(sample);
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::{pressed, released, run};

    #[test]
    fn averages_recent_history() {
        let mut dejitter = Dejitter::new(100);
        let out = run(
            &mut dejitter,
            &[pressed(0, 0, 8, 0), pressed(8, 8, 8, 1), pressed(16, 0, 8, 2)],
            8,
        );
        assert_eq!(out[0], pressed(0, 0, 8, 0));
        // (8*5 + 0*3) >> 3
        assert_eq!((out[1].x, out[1].y, out[1].pressure), (5, 5, 8));
        // (16*8 + 8*5 + 0*3) >> 4
        assert_eq!((out[2].x, out[2].y), (10, 2));
        assert_eq!(out[2].timestamp_us, 2_000);
    }

    #[test]
    fn fast_move_resets_history() {
        let mut dejitter = Dejitter::new(10);
        let out = run(
            &mut dejitter,
            &[pressed(0, 0, 8, 0), pressed(2, 2, 8, 1), pressed(300, 300, 8, 2)],
            8,
        );
        assert_eq!((out[2].x, out[2].y), (300, 300));
    }

    #[test]
    fn release_passes_and_forgets() {
        let mut dejitter = Dejitter::new(100);
        let out = run(
            &mut dejitter,
            &[pressed(0, 0, 8, 0), released(4, 4, 1), pressed(10, 10, 8, 2)],
            8,
        );
        assert_eq!(out[1], released(4, 4, 1));
        assert_eq!(out[2], pressed(10, 10, 8, 2));
    }
}
