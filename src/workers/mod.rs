//! Background worker tasks
//!
//! This module contains the long-running actor that owns a player pipeline,
//! the messages it speaks, and the playlist-facing handle built on top.

pub mod messages;
pub mod player;
pub mod video_source;

pub use messages::{ControlMessage, WorkerEvent};
pub use player::{PlayerWorker, WorkerHandle};
pub use video_source::{VideoSource, VideoSourceOptions};

/// Trait for workers that need graceful shutdown.
pub trait WorkerClose {
    /// Close and clean up worker resources.
    fn close(&mut self);
}
