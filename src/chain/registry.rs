use crate::{
    calibrate::linear,
    error::Result,
    filters::{
        crop, debounce, dejitter, evthres, iir, invert, lowpass, median, pthres, skip, variance,
    },
    stage::Stage,
};

use super::StageContext;

pub type StageConstructor = fn(&StageContext, &str) -> Result<Box<dyn Stage>>;

/// Every stage a chain can be assembled from, by name.
pub const STAGES: &[(&str, StageConstructor)] = &[
    ("crop", crop::build),
    ("debounce", debounce::build),
    ("dejitter", dejitter::build),
    ("evthres", evthres::build),
    ("iir", iir::build),
    ("invert", invert::build),
    ("linear", linear::build),
    ("lowpass", lowpass::build),
    ("median", median::build),
    ("pthres", pthres::build),
    ("skip", skip::build),
    ("variance", variance::build),
];

pub fn lookup(name: &str) -> Option<StageConstructor> {
    STAGES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, ctor)| *ctor)
}

pub fn stage_names() -> impl Iterator<Item = &'static str> {
    STAGES.iter().map(|(name, _)| *name)
}
