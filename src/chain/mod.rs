//! Chain assembly: a source plus an ordered stack of stages built by name.

pub mod config;
pub mod options;
pub mod registry;

use std::path::PathBuf;

use crate::{
    calibrate::Rotation,
    error::{ReadKind, Result, TsError},
    stage::{Downstream, ReadStatus, SampleSource, Stage},
    types::{Frame, Sample},
};

pub use config::{parse_chain_file, parse_chain_str, validate_chain_config, ChainConfig};

/// Device facts a stage constructor may need.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageContext {
    /// Live output resolution, if known.
    pub resolution: Option<(u32, u32)>,
    pub rotation: Rotation,
    pub calibration_file: Option<PathBuf>,
}

pub struct Chain {
    source: Option<Box<dyn SampleSource>>,
    /// Hardware side first; the last stage is the one the caller reads from.
    stages: Vec<Box<dyn Stage>>,
    context: StageContext,
}

impl Chain {
    pub fn new(source: Box<dyn SampleSource>) -> Self {
        Self::with_context(source, StageContext::default())
    }

    pub fn with_context(source: Box<dyn SampleSource>, context: StageContext) -> Self {
        Self {
            source: Some(source),
            stages: Vec::new(),
            context,
        }
    }

    /// Builds a chain from a parsed config. On failure every stage already
    /// built, and the source, are finished before the error is returned.
    pub fn from_config(source: Box<dyn SampleSource>, config: &ChainConfig) -> Result<Self> {
        let mut chain = Self::with_context(source, config.context());
        validate_chain_config(config)?;
        for stage in &config.stages {
            chain.load_stage(&stage.name, &stage.params)?;
        }
        Ok(chain)
    }

    pub fn context(&self) -> &StageContext {
        &self.context
    }

    /// Stacks a stage on top of the current chain.
    pub fn push(&mut self, stage: Box<dyn Stage>) {
        log::debug!("chain: push stage '{}'", stage.name());
        self.stages.push(stage);
    }

    pub fn load_stage(&mut self, name: &str, params: &str) -> Result<()> {
        let ctor =
            registry::lookup(name).ok_or_else(|| TsError::UnknownStage(name.to_string()))?;
        let stage = ctor(&self.context, params)?;
        self.push(stage);
        Ok(())
    }

    /// Whether every stage and the source can serve `op`. Check this once
    /// after assembly rather than discovering a gap on the first read.
    pub fn supports(&self, op: ReadKind) -> bool {
        self.source
            .as_deref()
            .is_some_and(|source| source.supports(op))
            && self.stages.iter().all(|stage| stage.supports(op))
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|stage| stage.name())
    }

    pub fn read(&mut self, out: &mut [Sample]) -> Result<ReadStatus> {
        let Some(source) = self.source.as_deref_mut() else {
            return Ok(ReadStatus::Ready(0));
        };
        Downstream::new(&mut self.stages, source).read(out)
    }

    /// Reads up to `frames.len()` frames of `max_slots` slots each.
    pub fn read_mt(&mut self, max_slots: usize, frames: &mut [Frame]) -> Result<ReadStatus> {
        for frame in frames.iter_mut() {
            frame.prepare(max_slots)?;
        }
        let Some(source) = self.source.as_deref_mut() else {
            return Ok(ReadStatus::Ready(0));
        };
        Downstream::new(&mut self.stages, source).read_mt(frames, max_slots)
    }

    pub fn close(self) {}
}

impl Drop for Chain {
    fn drop(&mut self) {
        for stage in self.stages.drain(..).rev() {
            stage.finish();
        }
        if let Some(source) = self.source.take() {
            source.finish();
        }
    }
}
