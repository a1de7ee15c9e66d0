use crate::error::Result;

/// One single-touch sample. `pressure == 0` marks a release.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    pub x: i32,
    pub y: i32,
    pub pressure: u32,
    pub timestamp_us: u64,
}

impl Sample {
    pub fn new(x: i32, y: i32, pressure: u32, timestamp_us: u64) -> Self {
        Self {
            x,
            y,
            pressure,
            timestamp_us,
        }
    }

    pub fn is_release(&self) -> bool {
        self.pressure == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PenState {
    #[default]
    Unknown,
    Up,
    Down,
}

/// Per-slot validity bits of a multitouch sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidFlags(u8);

impl ValidFlags {
    pub const VALID: Self = Self(0x1);
    pub const TOOL: Self = Self(0x2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MtSample {
    pub x: i32,
    pub y: i32,
    pub pressure: u32,
    pub timestamp_us: u64,
    pub slot: i32,
    pub tracking_id: i32,
    pub valid: ValidFlags,
    pub pen_down: PenState,
    pub touch_major: i32,
    pub touch_minor: i32,
    pub width_major: i32,
    pub width_minor: i32,
    pub orientation: i32,
    pub distance: i32,
    pub blob_id: i32,
    pub tool_x: i32,
    pub tool_y: i32,
    pub tool_type: i32,
}

impl Default for MtSample {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            pressure: 0,
            timestamp_us: 0,
            slot: 0,
            tracking_id: -1,
            valid: ValidFlags::empty(),
            pen_down: PenState::Unknown,
            touch_major: 0,
            touch_minor: 0,
            width_major: 0,
            width_minor: 0,
            orientation: 0,
            distance: 0,
            blob_id: 0,
            tool_x: 0,
            tool_y: 0,
            tool_type: 0,
        }
    }
}

impl MtSample {
    pub fn is_valid(&self) -> bool {
        self.valid.contains(ValidFlags::VALID)
    }

    pub fn is_active(&self) -> bool {
        self.tracking_id != -1
    }

    pub fn invalidate(&mut self) {
        self.valid.remove(ValidFlags::VALID);
    }

    pub fn as_sample(&self) -> Sample {
        Sample::new(self.x, self.y, self.pressure, self.timestamp_us)
    }

    /// Copies the positional part of a filtered sample back into this slot.
    pub fn apply_sample(&mut self, sample: &Sample) {
        self.x = sample.x;
        self.y = sample.y;
        self.pressure = sample.pressure;
        self.timestamp_us = sample.timestamp_us;
    }
}

/// One multitouch frame: `max_slots` slot samples.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub slots: Vec<MtSample>,
    /// Set when the source reported malformed slot data that had to be clamped.
    pub degraded: bool,
}

impl Frame {
    pub fn with_slots(max_slots: usize) -> Result<Self> {
        let mut frame = Frame::default();
        frame.prepare(max_slots)?;
        Ok(frame)
    }

    /// Sizes the frame to `max_slots` and clears every validity bit.
    pub fn prepare(&mut self, max_slots: usize) -> Result<()> {
        if self.slots.len() < max_slots {
            self.slots.try_reserve(max_slots - self.slots.len())?;
        }
        self.slots.resize_with(max_slots, MtSample::default);
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            slot.slot = idx as i32;
            slot.valid = ValidFlags::empty();
        }
        self.degraded = false;
        Ok(())
    }

    pub fn valid_slots(&self) -> impl Iterator<Item = &MtSample> {
        self.slots.iter().filter(|slot| slot.is_valid())
    }

    pub fn has_valid(&self) -> bool {
        self.slots.iter().any(MtSample::is_valid)
    }
}

pub(crate) fn squared_distance(a: &Sample, b: &Sample) -> u64 {
    let dx = i64::from(a.x) - i64::from(b.x);
    let dy = i64::from(a.y) - i64::from(b.y);
    (dx * dx + dy * dy) as u64
}

pub(crate) fn squared_u64(value: u32) -> u64 {
    u64::from(value) * u64::from(value)
}
