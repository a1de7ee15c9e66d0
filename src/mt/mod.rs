//! Wire events and their normalization into per-slot frames.

pub mod event;
pub mod normalize;

pub use event::{
    AbsAxis, DeviceCaps, EventKind, EventSource, InputEvent, KeyCode, Poll, Protocol, Quirk,
    ScriptStep, ScriptedEvents, SyncKind,
};
pub use normalize::Normalizer;
