//! Worker control messages and events
//!
//! Commands arrive as small JSON objects, one concern per object:
//!
//! ```text
//! {"uri": "...", "closed": false, "fade": {...}}   start (or restart)
//! {"play": true}
//! {"pause": true}
//! {"close": true}
//! {"disableFadeOut": true}
//! ```
//!
//! Flags that are present but false are ignored.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::decoder::DecodedFrame;
use crate::error::PipelineError;
use crate::pipeline::Timestamp;
use crate::pipeline::player::FadeOptions;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Start {
        uri: String,
        closed: bool,
        fade: FadeOptions,
    },
    Play,
    Pause,
    Close,
    DisableFadeOut(bool),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMessage {
    Start {
        uri: String,
        #[serde(default)]
        closed: bool,
        #[serde(default)]
        fade: Option<FadeOptions>,
    },
    Play {
        play: bool,
    },
    Pause {
        pause: bool,
    },
    Close {
        close: bool,
    },
    DisableFadeOut {
        #[serde(rename = "disableFadeOut")]
        disable_fade_out: bool,
    },
}

impl ControlMessage {
    pub fn start(uri: impl Into<String>, closed: bool, fade: FadeOptions) -> Self {
        Self::Start {
            uri: uri.into(),
            closed,
            fade,
        }
    }

    /// Parse one command line. `Ok(None)` for a well-formed no-op.
    pub fn from_json(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let raw: RawMessage = serde_json::from_str(line)?;
        Ok(match raw {
            RawMessage::Start { uri, closed, fade } => Some(Self::Start {
                uri,
                closed,
                fade: fade.unwrap_or_default(),
            }),
            RawMessage::Play { play } => play.then_some(Self::Play),
            RawMessage::Pause { pause } => pause.then_some(Self::Pause),
            RawMessage::Close { close } => close.then_some(Self::Close),
            RawMessage::DisableFadeOut { disable_fade_out } => {
                Some(Self::DisableFadeOut(disable_fade_out))
            }
        })
    }
}

/// What a worker reports to its consumer.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Ownership of a frame passes to the consumer, who must release it.
    Frame(DecodedFrame),
    /// Declared stream duration, sent once before the first frame.
    Duration(Timestamp),
    /// The stream ended or was closed.
    Done,
    /// The stream failed. Terminal, like `Done`.
    Error(PipelineError),
}

impl WorkerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerEvent::Done | WorkerEvent::Error(_))
    }

    /// Wire form; frames are described, not serialized.
    pub fn to_json(&self) -> Value {
        match self {
            WorkerEvent::Frame(frame) => json!({
                "frame": {
                    "timestamp": frame.timestamp().micros,
                    "duration": frame.duration().as_micros() as u64,
                    "displayWidth": frame.display_width(),
                    "displayHeight": frame.display_height(),
                }
            }),
            WorkerEvent::Duration(duration) => json!({ "duration": duration.micros }),
            WorkerEvent::Done => json!({ "done": true }),
            WorkerEvent::Error(e) => json!({ "err": e.to_string() }),
        }
    }
}

impl From<Result<(), PipelineError>> for WorkerEvent {
    /// Terminal event for a finished instance.
    fn from(outcome: Result<(), PipelineError>) -> Self {
        match outcome {
            Ok(()) | Err(PipelineError::Cancelled) => WorkerEvent::Done,
            Err(e) => WorkerEvent::Error(e),
        }
    }
}
