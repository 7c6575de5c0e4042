//! Video decoding module
//!
//! Defines the seam to the underlying decode engine and the frame types that
//! flow out of the pipeline. The FFmpeg-backed engine is built with the
//! `ffmpeg` feature.

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod frame;

use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineResult;
use crate::pipeline::{DecoderConfig, EncodedChunk, Timestamp};

pub use frame::{DecodedFrame, FrameBuffer, FrameLedger, PixelFormat};

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegEngine;

/// Raw output of a decode engine, before it becomes an owned pipeline frame.
#[derive(Debug)]
pub struct DecodedImage {
    pub buffer: FrameBuffer,
    pub timestamp: Timestamp,
    pub duration: Duration,
}

/// A video decoder the decode stage can drive.
///
/// Chunks arrive in decode order; images may come back in any order and with
/// any delay. Every error is fatal to the stream.
pub trait DecodeEngine: Send {
    /// Prepare for the given stream. Called once, before the first chunk.
    fn configure(&mut self, config: &DecoderConfig) -> PipelineResult<()>;

    /// Submit one chunk, returning whatever images became ready.
    fn decode(&mut self, chunk: &EncodedChunk) -> PipelineResult<Vec<DecodedImage>>;

    /// Drain images still held inside the engine at end of stream.
    fn flush(&mut self) -> PipelineResult<Vec<DecodedImage>>;
}

/// Builds a fresh engine for every pipeline instance.
pub type EngineFactory = Arc<dyn Fn() -> PipelineResult<Box<dyn DecodeEngine>> + Send + Sync>;

/// The engine compiled into this build, if any.
pub fn default_engine_factory() -> Option<EngineFactory> {
    #[cfg(feature = "ffmpeg")]
    {
        Some(Arc::new(|| Ok(Box::new(FfmpegEngine::new()) as Box<dyn DecodeEngine>)))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        None
    }
}
