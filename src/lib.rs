//! Streaming WebM decode pipeline for LED video-wall players.
//!
//! A `PlayerWorker` owns one pipeline at a time and is driven by small
//! control messages; `VideoSource` wraps a worker as a playlist item.

pub mod assets;
pub mod config;
pub mod decoder;
pub mod demux;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod utils;
pub mod workers;

#[cfg(test)]
mod test_support;

pub use error::{PipelineError, PipelineResult};
