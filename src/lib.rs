//! Touchscreen sample pipeline.
//!
//! Raw input events are normalized into single-touch samples or multitouch
//! frames by [`Normalizer`], then pulled through a [`Chain`] of filter and
//! calibration stages.

pub mod calibrate;
pub mod chain;
pub mod error;
pub mod filters;
pub mod mt;
pub mod slots;
pub mod source;
pub mod stage;
pub mod types;

pub use calibrate::{CalibrationFile, Linear, Rotation};
pub use chain::{Chain, ChainConfig, StageContext};
pub use error::{ReadKind, Result, TsError};
pub use mt::{DeviceCaps, EventSource, InputEvent, Normalizer, Protocol, ScriptedEvents};
pub use source::{ReplaySource, ReplayStep};
pub use stage::{Downstream, ReadStatus, SampleSource, Stage};
pub use types::{Frame, MtSample, PenState, Sample, ValidFlags};
