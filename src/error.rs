//! Error taxonomy shared by every pipeline stage

use thiserror::Error;

/// Terminal failure of a pipeline instance.
///
/// Any stage returning one of these aborts the whole chain. `Cancelled` is the
/// only variant that is not a failure: it ends the stream silently.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("cancelled")]
    Cancelled,
    #[error("parse error at byte {offset}: {reason}")]
    Parse { offset: u64, reason: String },
    #[error("block references undeclared track {0}")]
    UnknownTrack(u64),
    #[error("codec changed mid-stream from {from} to {to}")]
    CodecChanged { from: String, to: String },
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("stage task failed: {0}")]
    TaskFailed(String),
}

impl PipelineError {
    pub fn parse(offset: u64, reason: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            reason: reason.into(),
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode(reason.into())
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    /// Cancellation ends the stream but is never reported as an error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(error: std::io::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
