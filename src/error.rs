use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtcError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("failed to load sample {}: {message}", path.display())]
    SampleLoad { path: PathBuf, message: String },
    #[error("symbol {symbol:?} is not part of the alphabet")]
    UnknownSymbol { symbol: char },
    #[error("cannot collate an empty list of samples")]
    EmptyBatch,
    #[error("batch length invariant violated: {message}")]
    LengthMismatch { message: String },
}

impl CtcError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn sample_load(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::SampleLoad {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub(crate) fn length_mismatch(message: impl Into<String>) -> Self {
        Self::LengthMismatch {
            message: message.into(),
        }
    }

    /// Per-sample failures the caller may choose to skip.
    pub fn is_sample_error(&self) -> bool {
        matches!(self, Self::SampleLoad { .. })
    }
}
