use crate::{
    chain::{
        options::{apply_options, parse_usize, OptionSpec},
        StageContext,
    },
    error::Result,
    stage::{Downstream, ReadStatus, Stage},
    types::Sample,
};

use super::read_filtered;

const STAGE_NAME: &str = "skip";

struct SkipParams {
    nhead: usize,
    ntail: usize,
}

const SKIP_OPTIONS: &[OptionSpec<SkipParams>] = &[
    OptionSpec::new("nhead", |p, v| {
        p.nhead = parse_usize(v)?;
        Ok(())
    }),
    OptionSpec::new("ntail", |p, v| {
        p.ntail = parse_usize(v)?;
        Ok(())
    }),
];

/// Drops the first `nhead` and the last `ntail` samples of every contact.
///
/// The tail is dropped by delaying output through a ring of `ntail` samples;
/// on release the oldest queued position is reported as the release point.
/// Contacts too short to emit anything are swallowed, release included.
#[derive(Debug)]
pub struct Skip {
    nhead: usize,
    ntail: usize,
    head_seen: usize,
    ring: Vec<Sample>,
    cursor: usize,
    sent: bool,
}

pub fn build(_ctx: &StageContext, params: &str) -> Result<Box<dyn Stage>> {
    let mut parsed = SkipParams { nhead: 1, ntail: 1 };
    apply_options(STAGE_NAME, &mut parsed, SKIP_OPTIONS, params)?;
    log::debug!("skip: nhead {} ntail {}", parsed.nhead, parsed.ntail);
    Ok(Box::new(Skip::new(parsed.nhead, parsed.ntail)?))
}

impl Skip {
    pub fn new(nhead: usize, ntail: usize) -> Result<Self> {
        let mut ring = Vec::new();
        ring.try_reserve_exact(ntail)?;
        ring.resize(ntail, Sample::default());
        Ok(Self {
            nhead,
            ntail,
            head_seen: 0,
            ring,
            cursor: 0,
            sent: false,
        })
    }

    fn reset(&mut self) {
        self.head_seen = 0;
        self.cursor = 0;
        self.sent = false;
    }

    /// Feeds one sample; returns the sample to emit in its place, if any.
    fn feed(&mut self, current: Sample) -> Option<Sample> {
        if self.head_seen < self.nhead {
            self.head_seen += 1;
            if current.is_release() {
                self.reset();
            }
            return None;
        }

        if current.is_release() && !self.sent {
            self.reset();
            return None;
        }

        if self.ntail == 0 {
            self.sent = true;
            if current.is_release() {
                self.reset();
            }
            return Some(current);
        }

        if !self.sent && self.cursor < self.ntail {
            self.ring[self.cursor] = current;
            self.cursor += 1;
            return None;
        }

        if self.cursor >= self.ntail {
            self.cursor = 0;
        }
        let mut emitted = self.ring[self.cursor];
        if current.is_release() {
            emitted.pressure = 0;
            self.reset();
        } else {
            self.ring[self.cursor] = current;
            self.cursor += 1;
            self.sent = true;
        }
        Some(emitted)
    }
}

impl Stage for Skip {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn read(&mut self, down: &mut Downstream<'_>, out: &mut [Sample]) -> Result<ReadStatus> {
        read_filtered(down, out, |sample| match self.feed(*sample) {
            Some(emitted) => {
                *sample = emitted;
                true
            }
            None => false,
        })
    }
}
