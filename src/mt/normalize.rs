use crate::{
    error::{ReadKind, Result, TsError},
    slots::SlotArena,
    stage::{ReadStatus, SampleSource},
    types::{Frame, MtSample, PenState, Sample, ValidFlags},
};

use super::event::{
    AbsAxis, DeviceCaps, EventKind, EventSource, InputEvent, KeyCode, Poll, Protocol, Quirk,
    SyncKind,
};

/// Pressure reported for a touching contact on devices without a pressure axis.
const FAKE_CONTACT_PRESSURE: u32 = 255;

#[derive(Clone, Copy, Debug, Default)]
struct SlotMarks {
    /// Touched by a multitouch event this frame.
    mt: bool,
    /// Touched by a single-touch axis fallback this frame.
    single: bool,
    tool: bool,
    /// Closed by `Sync(MtReport)` this frame (anonymous devices).
    reported: bool,
}

impl SlotMarks {
    fn touched(&self) -> bool {
        self.mt || self.single
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct SingleTouch {
    x: i32,
    y: i32,
    pressure: u32,
    touching: bool,
    /// Anonymous devices: the primary contact showed up in this frame.
    primary_seen: bool,
}

/// Turns a stream of wire events into single-touch samples or per-slot
/// multitouch frames.
///
/// Explicit-slot devices are tracked by slot number. Anonymous devices are
/// mapped by report order: the n-th contact of a frame lands in slot n, a
/// slot that stops being reported gets a synthesized release, and a slot that
/// becomes active gets a fresh tracking id. Two different fingers that swap
/// report order therefore swap slots; nothing better can be inferred from
/// position-less ordering alone.
pub struct Normalizer<E> {
    events: E,
    caps: DeviceCaps,
    single: SingleTouch,
    retained: SlotArena<MtSample>,
    marks: SlotArena<SlotMarks>,
    current_slot: usize,
    raw_slot: i32,
    cursor: usize,
    contact_open: bool,
    next_tracking_id: i32,
    degraded: bool,
    frame_timestamp_us: u64,
}

impl<E: EventSource> Normalizer<E> {
    pub fn new(events: E) -> Self {
        let caps = events.caps();
        Self::with_caps(events, caps)
    }

    pub fn with_caps(events: E, caps: DeviceCaps) -> Self {
        log::debug!("normalizer: {caps:?}");
        Self {
            events,
            caps,
            single: SingleTouch::default(),
            retained: SlotArena::new(),
            marks: SlotArena::new(),
            current_slot: 0,
            raw_slot: 0,
            cursor: 0,
            contact_open: false,
            next_tracking_id: 0,
            degraded: false,
            frame_timestamp_us: 0,
        }
    }

    pub fn caps(&self) -> DeviceCaps {
        self.caps
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    pub fn into_inner(self) -> E {
        self.events
    }

    fn reports_real_pressure(&self) -> bool {
        self.caps.has_pressure && self.caps.quirk == Quirk::None
    }

    fn allocate_tracking_id(&mut self) -> i32 {
        let id = self.next_tracking_id;
        self.next_tracking_id = if id == i32::MAX { 0 } else { id + 1 };
        id
    }

    // Single touch.

    fn read_legacy(&mut self, out: &mut [Sample]) -> Result<ReadStatus> {
        let mut produced = 0;
        while produced < out.len() {
            let event = match self.events.next_event()? {
                Poll::Event(event) => event,
                Poll::NotReady if produced == 0 => return Ok(ReadStatus::NotReady),
                Poll::NotReady | Poll::End => break,
            };
            let emit = match event.kind {
                EventKind::Abs(AbsAxis::X, value) => {
                    self.single.x = value;
                    true
                }
                EventKind::Abs(AbsAxis::Y, value) => {
                    self.single.y = value;
                    true
                }
                EventKind::Abs(AbsAxis::Pressure, value) => {
                    self.single.pressure = value.max(0) as u32;
                    self.single.touching = value > 0;
                    true
                }
                EventKind::Key(KeyCode::Touch | KeyCode::Left, value) => {
                    self.single.touching = value != 0;
                    if value == 0 {
                        self.single.pressure = 0;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            };
            if !emit {
                continue;
            }
            let sample = self.single_sample(event.timestamp_us);
            if !sample.is_release() && (sample.x == 0 || sample.y == 0) {
                log::warn!(
                    "normalizer: dropping partial sample ({}, {})",
                    sample.x,
                    sample.y
                );
                continue;
            }
            out[produced] = sample;
            produced += 1;
        }
        Ok(ReadStatus::Ready(produced))
    }

    fn single_tracks_primary(&self) -> bool {
        match self.caps.protocol {
            Protocol::SingleTouch => true,
            Protocol::ExplicitSlots => self.raw_slot == 0,
            Protocol::Anonymous => self.cursor == 0,
        }
    }

    fn apply_single(&mut self, event: InputEvent) -> Option<Sample> {
        match event.kind {
            EventKind::Abs(axis, value) => {
                let primary = self.single_tracks_primary();
                match axis {
                    AbsAxis::X => self.single.x = value,
                    AbsAxis::Y => self.single.y = value,
                    AbsAxis::Pressure => self.single.pressure = value.max(0) as u32,
                    AbsAxis::MtSlot => self.raw_slot = value,
                    AbsAxis::MtPositionX if primary => self.single.x = value,
                    AbsAxis::MtPositionY if primary => self.single.y = value,
                    AbsAxis::MtPressure if primary => self.single.pressure = value.max(0) as u32,
                    AbsAxis::MtTrackingId if primary => {
                        self.single.touching = value != -1;
                        if value == -1 {
                            self.single.pressure = 0;
                        }
                    }
                    AbsAxis::MtDistance if primary && self.caps.quirk == Quirk::EgalaxV210 => {
                        self.single.touching = value <= 0;
                    }
                    _ => {}
                }
                if primary
                    && matches!(
                        axis,
                        AbsAxis::X | AbsAxis::Y | AbsAxis::MtPositionX | AbsAxis::MtPositionY
                    )
                {
                    self.single.primary_seen = true;
                    if !self.caps.has_pressure && self.caps.quirk == Quirk::None {
                        self.single.touching = true;
                    }
                }
                None
            }
            EventKind::Key(KeyCode::Touch | KeyCode::Left, value) => {
                self.single.touching = value != 0;
                if value == 0 {
                    self.single.pressure = 0;
                }
                None
            }
            EventKind::Key(KeyCode::Other(_), _) => None,
            EventKind::Sync(SyncKind::MtReport) => {
                if self.caps.protocol == Protocol::Anonymous {
                    self.cursor += 1;
                }
                None
            }
            EventKind::Sync(SyncKind::Dropped) => {
                log::warn!("normalizer: events dropped by the device");
                None
            }
            EventKind::Sync(SyncKind::Report) => {
                if self.caps.protocol == Protocol::Anonymous {
                    if !self.single.primary_seen {
                        self.single.touching = false;
                        self.single.pressure = 0;
                    }
                    self.cursor = 0;
                }
                self.single.primary_seen = false;
                Some(self.single_sample(event.timestamp_us))
            }
        }
    }

    fn single_sample(&self, timestamp_us: u64) -> Sample {
        let pressure = if self.reports_real_pressure() {
            self.single.pressure
        } else if self.single.touching {
            FAKE_CONTACT_PRESSURE
        } else {
            0
        };
        Sample::new(self.single.x, self.single.y, pressure, timestamp_us)
    }

    // Multitouch.

    fn clamp_slot(&mut self, value: i32, max_slots: usize) -> usize {
        let last = max_slots.saturating_sub(1);
        match usize::try_from(value) {
            Ok(slot) if slot <= last => slot,
            _ => {
                log::warn!("normalizer: slot {value} outside 0..{max_slots}, clamping");
                self.degraded = true;
                if value < 0 {
                    0
                } else {
                    last
                }
            }
        }
    }

    fn target_slot(&mut self, max_slots: usize) -> usize {
        match self.caps.protocol {
            Protocol::SingleTouch => 0,
            Protocol::ExplicitSlots => self.current_slot.min(max_slots.saturating_sub(1)),
            Protocol::Anonymous => {
                self.contact_open = true;
                let last = max_slots.saturating_sub(1);
                if self.cursor > last {
                    if !self.degraded {
                        log::warn!(
                            "normalizer: contact {} exceeds {max_slots} slots, clamping",
                            self.cursor
                        );
                    }
                    self.degraded = true;
                    last
                } else {
                    self.cursor
                }
            }
        }
    }

    /// Applies one event; returns true when it closed a frame.
    fn apply_mt(&mut self, event: InputEvent, max_slots: usize) -> bool {
        match event.kind {
            EventKind::Sync(SyncKind::Report) => return true,
            EventKind::Sync(SyncKind::MtReport) => {
                if self.caps.protocol == Protocol::Anonymous {
                    self.close_contact(max_slots);
                }
            }
            EventKind::Sync(SyncKind::Dropped) => {
                log::warn!("normalizer: events dropped by the device, discarding partial frame");
                for marks in self.marks.iter_mut() {
                    *marks = SlotMarks::default();
                }
                self.cursor = 0;
                self.contact_open = false;
            }
            EventKind::Key(KeyCode::Touch | KeyCode::Left, value) => {
                let slot = match self.caps.protocol {
                    Protocol::ExplicitSlots => self.current_slot.min(max_slots.saturating_sub(1)),
                    _ => 0,
                };
                let fake_pressure = !self.reports_real_pressure();
                let single_touch = self.caps.protocol == Protocol::SingleTouch;
                if let (Some(sample), Some(marks)) =
                    (self.retained.get_mut(slot), self.marks.get_mut(slot))
                {
                    sample.pen_down = if value != 0 {
                        PenState::Down
                    } else {
                        PenState::Up
                    };
                    if single_touch {
                        if value == 0 {
                            sample.pressure = 0;
                        } else if fake_pressure {
                            sample.pressure = FAKE_CONTACT_PRESSURE;
                        }
                        marks.single = true;
                    }
                }
            }
            EventKind::Key(KeyCode::Other(_), _) => {}
            EventKind::Abs(AbsAxis::MtSlot, value) => {
                if self.caps.protocol == Protocol::ExplicitSlots {
                    self.current_slot = self.clamp_slot(value, max_slots);
                }
            }
            EventKind::Abs(axis @ (AbsAxis::X | AbsAxis::Y | AbsAxis::Pressure), value) => {
                let slot = match self.caps.protocol {
                    Protocol::SingleTouch => 0,
                    _ => self.current_slot.min(max_slots.saturating_sub(1)),
                };
                let fake_pressure = !self.reports_real_pressure();
                let (Some(sample), Some(marks)) =
                    (self.retained.get_mut(slot), self.marks.get_mut(slot))
                else {
                    return false;
                };
                if marks.mt {
                    return false;
                }
                match axis {
                    AbsAxis::X => sample.x = value,
                    AbsAxis::Y => sample.y = value,
                    _ => sample.pressure = value.max(0) as u32,
                }
                if fake_pressure && axis != AbsAxis::Pressure && sample.pen_down != PenState::Up {
                    sample.pressure = FAKE_CONTACT_PRESSURE;
                }
                marks.single = true;
            }
            EventKind::Abs(axis, value) => {
                let slot = self.target_slot(max_slots);
                let has_pressure = self.caps.has_pressure;
                let quirk = self.caps.quirk;
                let (Some(sample), Some(marks)) =
                    (self.retained.get_mut(slot), self.marks.get_mut(slot))
                else {
                    return false;
                };
                match axis {
                    AbsAxis::MtPositionX => sample.x = value,
                    AbsAxis::MtPositionY => sample.y = value,
                    AbsAxis::MtPressure => sample.pressure = value.max(0) as u32,
                    AbsAxis::MtTouchMajor => {
                        sample.touch_major = value;
                        if value == 0 {
                            sample.pressure = 0;
                        }
                    }
                    AbsAxis::MtTouchMinor => sample.touch_minor = value,
                    AbsAxis::MtWidthMajor => sample.width_major = value,
                    AbsAxis::MtWidthMinor => sample.width_minor = value,
                    AbsAxis::MtOrientation => sample.orientation = value,
                    AbsAxis::MtBlobId => sample.blob_id = value,
                    AbsAxis::MtToolType => sample.tool_type = value,
                    AbsAxis::MtToolX => {
                        sample.tool_x = value;
                        marks.tool = true;
                    }
                    AbsAxis::MtToolY => {
                        sample.tool_y = value;
                        marks.tool = true;
                    }
                    AbsAxis::MtDistance => {
                        sample.distance = value;
                        if quirk == Quirk::EgalaxV210 {
                            sample.pressure = if value > 0 { 0 } else { FAKE_CONTACT_PRESSURE };
                        }
                    }
                    AbsAxis::MtTrackingId => {
                        sample.tracking_id = value;
                        if value == -1 {
                            sample.pressure = 0;
                        } else if !has_pressure && quirk == Quirk::None {
                            sample.pressure = FAKE_CONTACT_PRESSURE;
                        }
                    }
                    AbsAxis::X | AbsAxis::Y | AbsAxis::Pressure | AbsAxis::MtSlot => {}
                }
                marks.mt = true;
            }
        }
        false
    }

    /// Anonymous devices: closes the contact under the cursor.
    fn close_contact(&mut self, max_slots: usize) {
        if !self.contact_open {
            // An empty report carries no contact.
            return;
        }
        let slot = self.cursor.min(max_slots.saturating_sub(1));
        let fake_pressure = !self.caps.has_pressure && self.caps.quirk == Quirk::None;
        let mut needs_id = false;
        if let (Some(sample), Some(marks)) =
            (self.retained.get_mut(slot), self.marks.get_mut(slot))
        {
            if fake_pressure {
                sample.pressure = FAKE_CONTACT_PRESSURE;
            }
            if sample.pressure > 0 {
                needs_id = sample.tracking_id == -1;
            } else {
                sample.tracking_id = -1;
            }
            marks.mt = true;
            marks.reported = true;
        }
        if needs_id {
            let id = self.allocate_tracking_id();
            if let Some(sample) = self.retained.get_mut(slot) {
                sample.tracking_id = id;
            }
        }
        self.cursor += 1;
        self.contact_open = false;
    }

    fn close_frame(&mut self, frame: &mut Frame, max_slots: usize) -> Result<()> {
        match self.caps.protocol {
            Protocol::Anonymous => {
                if self.contact_open {
                    self.close_contact(max_slots);
                }
                for (sample, marks) in self.retained.iter_mut().zip(self.marks.iter_mut()) {
                    if sample.is_active() && !marks.reported {
                        sample.pressure = 0;
                        sample.tracking_id = -1;
                        sample.pen_down = PenState::Up;
                        marks.mt = true;
                    }
                }
                self.cursor = 0;
            }
            Protocol::SingleTouch => {
                let touched = self.marks.get(0).is_some_and(SlotMarks::touched);
                let pressure = self.retained.get(0).map(|sample| sample.pressure);
                let active = self.retained.get(0).is_some_and(MtSample::is_active);
                match pressure {
                    Some(0) if touched => {
                        if let Some(sample) = self.retained.get_mut(0) {
                            sample.tracking_id = -1;
                        }
                    }
                    Some(_) if touched && !active => {
                        let id = self.allocate_tracking_id();
                        if let Some(sample) = self.retained.get_mut(0) {
                            sample.tracking_id = id;
                        }
                    }
                    _ => {}
                }
            }
            Protocol::ExplicitSlots => {}
        }

        frame.prepare(max_slots)?;
        let timestamp_us = self.frame_timestamp_us;
        for (idx, (out, (sample, marks))) in frame
            .slots
            .iter_mut()
            .zip(self.retained.iter_mut().zip(self.marks.iter()))
            .enumerate()
        {
            if marks.touched() {
                sample.timestamp_us = timestamp_us;
            }
            *out = *sample;
            out.slot = idx as i32;
            out.valid = ValidFlags::empty();
            if marks.touched() {
                out.valid.insert(ValidFlags::VALID);
            }
            if marks.tool {
                out.valid.insert(ValidFlags::TOOL);
            }
        }
        for (sample, marks) in self.retained.iter_mut().zip(self.marks.iter_mut()) {
            sample.pen_down = PenState::Unknown;
            *marks = SlotMarks::default();
        }
        frame.degraded = self.degraded;
        self.degraded = false;
        Ok(())
    }
}

impl<E: EventSource> SampleSource for Normalizer<E> {
    fn name(&self) -> &'static str {
        "normalizer"
    }

    fn supports(&self, op: ReadKind) -> bool {
        op == ReadKind::Single || self.caps.has_sync
    }

    fn read(&mut self, out: &mut [Sample]) -> Result<ReadStatus> {
        if !self.caps.has_sync {
            return self.read_legacy(out);
        }
        let mut produced = 0;
        while produced < out.len() {
            match self.events.next_event()? {
                Poll::Event(event) => {
                    if let Some(sample) = self.apply_single(event) {
                        log::trace!("normalizer: {sample:?}");
                        out[produced] = sample;
                        produced += 1;
                    }
                }
                Poll::NotReady if produced == 0 => return Ok(ReadStatus::NotReady),
                Poll::NotReady | Poll::End => break,
            }
        }
        Ok(ReadStatus::Ready(produced))
    }

    fn read_mt(&mut self, frames: &mut [Frame], max_slots: usize) -> Result<ReadStatus> {
        if !self.caps.has_sync {
            return Err(TsError::Unsupported {
                stage: "normalizer",
                op: ReadKind::Multi,
            });
        }
        if max_slots == 0 {
            return Ok(ReadStatus::Ready(0));
        }
        self.retained.ensure(max_slots)?;
        self.marks.ensure(max_slots)?;

        let mut produced = 0;
        while produced < frames.len() {
            match self.events.next_event()? {
                Poll::Event(event) => {
                    self.frame_timestamp_us = event.timestamp_us;
                    if self.apply_mt(event, max_slots) {
                        self.close_frame(&mut frames[produced], max_slots)?;
                        produced += 1;
                    }
                }
                // The partial frame stays in `retained`/`marks` for the next call.
                Poll::NotReady if produced == 0 => return Ok(ReadStatus::NotReady),
                Poll::NotReady | Poll::End => break,
            }
        }
        Ok(ReadStatus::Ready(produced))
    }
}
