//! Pipeline abstraction layer
//!
//! This module provides the architecture the player is built on, separating
//! concerns between:
//! - Control/Coordination: state machine and lifecycle management
//! - Data Transport: bounded channels and backpressure
//! - Media Processing: fetch, demux, assemble, decode, fade and gate stages
//!
//! # Architecture
//!
//! - Each stage runs in its own async task
//! - Stages implement the `PipelineStage` trait, or the per-item `Stage`
//!   trait driven by a `StageRunner`
//! - A coordinator chains stages together and owns their tasks
//! - One cancellation token per pipeline instance unwinds every stage
//! - Health counters track throughput, drops and stalls

pub mod health;
pub mod player;
pub mod stage;
pub mod state;
pub mod types;

pub use health::{HealthSummary, PipelineHealth};
pub use stage::{PipelineStage, Stage, StageRunner, send_or_cancel};
pub use state::PipelineState;
pub use types::{DecoderConfig, EncodedChunk, Timestamp, codec_name};
