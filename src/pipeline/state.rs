//! Pipeline state management

use std::time::Instant;

/// Pipeline state machine
///
/// `Closing` is entered on cancellation, end of stream or error; by the time
/// the state reaches `Closed` every stage has unwound and every frame has been
/// handed out or released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No stream has been started yet
    Idle,

    /// A pipeline instance is producing frames
    Running {
        /// When the current instance started
        started_at: Instant,
    },

    /// Tearing down the current instance
    Closing,

    /// Terminal; the worker accepts no further commands
    Closed,
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (Idle, Running { .. }) => true,
            // close from Idle goes straight through teardown
            (Idle, Closing) => true,

            (Running { .. }, Closing) => true,
            // restart replaces the running instance
            (Running { .. }, Running { .. }) => true,

            (Closing, Closed) => true,

            (Closed, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Running { .. } => "Running",
            PipelineState::Closing => "Closing",
            PipelineState::Closed => "Closed",
        }
    }

    /// Check if the pipeline is running
    pub fn is_running(&self) -> bool {
        matches!(self, PipelineState::Running { .. })
    }

    /// Check if the pipeline is closed or closing
    pub fn is_closed(&self) -> bool {
        matches!(self, PipelineState::Closed | PipelineState::Closing)
    }

    /// Get the duration since the pipeline started (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let PipelineState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
