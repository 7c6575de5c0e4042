//! Health counters for one pipeline instance

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Health metrics for a pipeline
///
/// Every stage records into the same instance. All fields use atomic
/// operations so stages in different tasks can update them without locking.
pub struct PipelineHealth {
    /// Bytes delivered by the range source
    pub bytes_fetched: AtomicU64,

    /// Encoded chunks handed to the decoder
    pub chunks_assembled: AtomicU64,

    /// Keyframe chunks among them
    pub keyframes_assembled: AtomicU64,

    /// Frames produced by the decode engine
    pub frames_decoded: AtomicU64,

    /// Frames that reached the consumer
    pub frames_delivered: AtomicU64,

    /// Frames superseded while the gate was closed
    pub frame_drops: AtomicU64,

    /// Frames that came out of the decoder behind an already emitted one
    pub late_frames: AtomicU64,

    /// Unix microseconds of the last frame leaving the decoder
    pub last_frame_time: AtomicU64,
}

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

impl PipelineHealth {
    /// Create a new health metrics instance
    pub fn new() -> Self {
        Self {
            bytes_fetched: AtomicU64::new(0),
            chunks_assembled: AtomicU64::new(0),
            keyframes_assembled: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frame_drops: AtomicU64::new(0),
            late_frames: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(now_micros()),
        }
    }

    pub fn record_bytes(&self, size: usize) {
        self.bytes_fetched.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_chunk(&self, is_keyframe: bool) {
        self.chunks_assembled.fetch_add(1, Ordering::Relaxed);
        if is_keyframe {
            self.keyframes_assembled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_decoded(&self) {
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dropped frame
    pub fn record_frame_drop(&self) {
        self.frame_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_frame(&self) {
        self.late_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched.load(Ordering::Relaxed)
    }

    pub fn chunks_assembled(&self) -> u64 {
        self.chunks_assembled.load(Ordering::Relaxed)
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    /// Get the number of frame drops
    pub fn frame_drops(&self) -> u64 {
        self.frame_drops.load(Ordering::Relaxed)
    }

    pub fn late_frames(&self) -> u64 {
        self.late_frames.load(Ordering::Relaxed)
    }

    /// Check if the pipeline has stalled (no decoded frame for given duration)
    ///
    /// The core has no fetch timeout; callers use this to decide when to close.
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last_frame = self.last_frame_time.load(Ordering::Relaxed);
        let elapsed_micros = now_micros().saturating_sub(last_frame);
        elapsed_micros > threshold.as_micros() as u64
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            bytes_fetched: self.bytes_fetched(),
            chunks_assembled: self.chunks_assembled(),
            keyframes_assembled: self.keyframes_assembled.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded(),
            frames_delivered: self.frames_delivered(),
            frame_drops: self.frame_drops(),
            late_frames: self.late_frames(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub bytes_fetched: u64,
    pub chunks_assembled: u64,
    pub keyframes_assembled: u64,
    pub frames_decoded: u64,
    pub frames_delivered: u64,
    pub frame_drops: u64,
    pub late_frames: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} bytes, {} chunks ({} keyframes), {} decoded, {} delivered, {} dropped, {} late",
            self.bytes_fetched,
            self.chunks_assembled,
            self.keyframes_assembled,
            self.frames_decoded,
            self.frames_delivered,
            self.frame_drops,
            self.late_frames
        )
    }
}
