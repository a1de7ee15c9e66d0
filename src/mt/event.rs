use std::collections::VecDeque;

use crate::error::{Result, TsError};

const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const EV_ABS: u16 = 0x03;

const SYN_REPORT: u16 = 0;
const SYN_MT_REPORT: u16 = 2;
const SYN_DROPPED: u16 = 3;

const BTN_LEFT: u16 = 0x110;
const BTN_TOUCH: u16 = 0x14a;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyCode {
    Touch,
    Left,
    Other(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbsAxis {
    X,
    Y,
    Pressure,
    MtSlot,
    MtTouchMajor,
    MtTouchMinor,
    MtWidthMajor,
    MtWidthMinor,
    MtOrientation,
    MtPositionX,
    MtPositionY,
    MtToolType,
    MtBlobId,
    MtTrackingId,
    MtPressure,
    MtDistance,
    MtToolX,
    MtToolY,
}

impl AbsAxis {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x00 => AbsAxis::X,
            0x01 => AbsAxis::Y,
            0x18 => AbsAxis::Pressure,
            0x2f => AbsAxis::MtSlot,
            0x30 => AbsAxis::MtTouchMajor,
            0x31 => AbsAxis::MtTouchMinor,
            0x32 => AbsAxis::MtWidthMajor,
            0x33 => AbsAxis::MtWidthMinor,
            0x34 => AbsAxis::MtOrientation,
            0x35 => AbsAxis::MtPositionX,
            0x36 => AbsAxis::MtPositionY,
            0x37 => AbsAxis::MtToolType,
            0x38 => AbsAxis::MtBlobId,
            0x39 => AbsAxis::MtTrackingId,
            0x3a => AbsAxis::MtPressure,
            0x3b => AbsAxis::MtDistance,
            0x3c => AbsAxis::MtToolX,
            0x3d => AbsAxis::MtToolY,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncKind {
    /// Closes a frame.
    Report,
    /// Closes one contact of an anonymous-sequential device.
    MtReport,
    /// The kernel dropped events; the frame in progress is unreliable.
    Dropped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Key(KeyCode, i32),
    Abs(AbsAxis, i32),
    Sync(SyncKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputEvent {
    pub timestamp_us: u64,
    pub kind: EventKind,
}

impl InputEvent {
    pub fn new(timestamp_us: u64, kind: EventKind) -> Self {
        Self { timestamp_us, kind }
    }

    pub fn abs(timestamp_us: u64, axis: AbsAxis, value: i32) -> Self {
        Self::new(timestamp_us, EventKind::Abs(axis, value))
    }

    pub fn key(timestamp_us: u64, code: KeyCode, value: i32) -> Self {
        Self::new(timestamp_us, EventKind::Key(code, value))
    }

    pub fn sync(timestamp_us: u64, kind: SyncKind) -> Self {
        Self::new(timestamp_us, EventKind::Sync(kind))
    }

    /// Maps a numeric evdev triple. Event types and codes the pipeline has no
    /// use for map to `None`.
    pub fn from_raw(timestamp_us: u64, ev_type: u16, code: u16, value: i32) -> Option<Self> {
        let kind = match ev_type {
            EV_SYN => EventKind::Sync(match code {
                SYN_REPORT => SyncKind::Report,
                SYN_MT_REPORT => SyncKind::MtReport,
                SYN_DROPPED => SyncKind::Dropped,
                _ => return None,
            }),
            EV_KEY => EventKind::Key(
                match code {
                    BTN_TOUCH => KeyCode::Touch,
                    BTN_LEFT => KeyCode::Left,
                    other => KeyCode::Other(other),
                },
                value,
            ),
            EV_ABS => EventKind::Abs(AbsAxis::from_code(code)?, value),
            _ => return None,
        };
        Some(Self::new(timestamp_us, kind))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Protocol {
    /// Single-touch only.
    #[default]
    SingleTouch,
    /// Contacts carry explicit `MtSlot` and `MtTrackingId`.
    ExplicitSlots,
    /// Contacts arrive in order, each closed by `Sync(MtReport)`.
    Anonymous,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Quirk {
    #[default]
    None,
    /// Reports hover through `MtDistance` and has no pressure axis.
    EgalaxV210,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCaps {
    pub protocol: Protocol,
    pub has_pressure: bool,
    pub has_sync: bool,
    pub quirk: Quirk,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            protocol: Protocol::SingleTouch,
            has_pressure: true,
            has_sync: true,
            quirk: Quirk::None,
        }
    }
}

impl DeviceCaps {
    pub fn explicit_slots() -> Self {
        Self {
            protocol: Protocol::ExplicitSlots,
            ..Self::default()
        }
    }

    pub fn anonymous() -> Self {
        Self {
            protocol: Protocol::Anonymous,
            ..Self::default()
        }
    }

    pub fn is_multitouch(&self) -> bool {
        self.protocol != Protocol::SingleTouch
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Poll {
    Event(InputEvent),
    NotReady,
    End,
}

/// The wire side of the normalizer: a device node or a recorded trace.
pub trait EventSource {
    fn caps(&self) -> DeviceCaps;

    fn next_event(&mut self) -> Result<Poll>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    Event(InputEvent),
    NotReady,
    Fail(i32),
}

/// Replays a fixed list of events.
#[derive(Clone, Debug, Default)]
pub struct ScriptedEvents {
    caps: DeviceCaps,
    steps: VecDeque<ScriptStep>,
}

impl ScriptedEvents {
    pub fn new(caps: DeviceCaps) -> Self {
        Self {
            caps,
            steps: VecDeque::new(),
        }
    }

    pub fn push(&mut self, event: InputEvent) -> &mut Self {
        self.steps.push_back(ScriptStep::Event(event));
        self
    }

    pub fn push_step(&mut self, step: ScriptStep) -> &mut Self {
        self.steps.push_back(step);
        self
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = InputEvent>) -> &mut Self {
        self.steps
            .extend(events.into_iter().map(ScriptStep::Event));
        self
    }
}

impl EventSource for ScriptedEvents {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn next_event(&mut self) -> Result<Poll> {
        match self.steps.pop_front() {
            Some(ScriptStep::Event(event)) => Ok(Poll::Event(event)),
            Some(ScriptStep::NotReady) => Ok(Poll::NotReady),
            Some(ScriptStep::Fail(code)) => Err(TsError::Source(code)),
            None => Ok(Poll::End),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_triples_map_to_typed_events() {
        assert_eq!(
            InputEvent::from_raw(5, 3, 0x39, -1),
            Some(InputEvent::abs(5, AbsAxis::MtTrackingId, -1))
        );
        assert_eq!(
            InputEvent::from_raw(5, 1, 0x14a, 1),
            Some(InputEvent::key(5, KeyCode::Touch, 1))
        );
        assert_eq!(
            InputEvent::from_raw(5, 0, 2, 0),
            Some(InputEvent::sync(5, SyncKind::MtReport))
        );
        assert_eq!(InputEvent::from_raw(5, 3, 0x28, 9), None);
        assert_eq!(InputEvent::from_raw(5, 4, 4, 9), None);
    }
}
