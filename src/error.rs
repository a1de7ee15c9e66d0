use std::{collections::TryReserveError, path::PathBuf};

/// Which read entry point a stage was asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadKind {
    Single,
    Multi,
}

impl core::fmt::Display for ReadKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ReadKind::Single => f.write_str("read"),
            ReadKind::Multi => f.write_str("read_mt"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TsError {
    #[error("stage '{stage}' does not support {op}")]
    Unsupported { stage: &'static str, op: ReadKind },

    #[error("out of memory while growing per-slot state")]
    OutOfMemory,

    #[error("sample source failed with code {0}")]
    Source(i32),

    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("stage '{stage}': unknown option '{option}'")]
    UnknownOption { stage: &'static str, option: String },

    #[error("stage '{stage}': invalid value '{value}' for option '{option}'")]
    InvalidOption {
        stage: &'static str,
        option: String,
        value: String,
    },

    #[error("calibration error: {0}")]
    Calibration(String),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("chain config error: {0}")]
    Config(String),
}

impl From<TryReserveError> for TsError {
    fn from(_: TryReserveError) -> Self {
        TsError::OutOfMemory
    }
}

pub type Result<T, E = TsError> = core::result::Result<T, E>;
