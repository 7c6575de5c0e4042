//! Core types for the pipeline system

use bytes::Bytes;
use std::time::Duration;

/// Timestamp representation for media frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    /// Microseconds since the start of the stream
    pub micros: i64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { micros: 0 };

    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Convert a container timecode to microseconds.
    ///
    /// `timecode_scale` is the number of nanoseconds per tick.
    pub fn from_ticks(ticks: i64, timecode_scale: u64) -> Self {
        let nanos = ticks as i128 * timecode_scale as i128;
        Self {
            micros: (nanos / 1000) as i64,
        }
    }

    /// Convert to duration, clamping negative timestamps to zero
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.micros.max(0) as u64)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// One encoded, decoder-ready unit of video.
///
/// Produced by the assemble stage, consumed read-only by the decode stage.
#[derive(Clone)]
pub struct EncodedChunk {
    pub timestamp: Timestamp,
    pub duration: Duration,
    pub is_keyframe: bool,
    pub payload: Bytes,
}

impl EncodedChunk {
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl std::fmt::Debug for EncodedChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedChunk")
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("is_keyframe", &self.is_keyframe)
            .field("size", &self.size())
            .finish()
    }
}

/// Decoder setup derived once from the container's video track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Short codec name understood by the decode engine ("vp8", "vp9", "h264", "av1")
    pub codec: String,
    /// Codec identifier exactly as declared by the container
    pub codec_id: String,
    /// Codec-private initialization data, if the track carries any
    pub description: Option<Bytes>,
    pub coded_width: u32,
    pub coded_height: u32,
    pub display_width: u32,
    pub display_height: u32,
}

impl DecoderConfig {
    /// Two configs describe the same stream setup if codec and private data match.
    pub fn is_compatible_with(&self, other: &DecoderConfig) -> bool {
        self.codec_id == other.codec_id && self.description == other.description
    }
}

/// Map a Matroska codec identifier to the engine's codec name.
pub fn codec_name(codec_id: &str) -> Option<&'static str> {
    match codec_id {
        "V_VP8" => Some("vp8"),
        "V_VP9" => Some("vp9"),
        "V_AV1" => Some("av1"),
        "V_MPEG4/ISO/AVC" => Some("h264"),
        "V_MPEGH/ISO/HEVC" => Some("hevc"),
        _ => None,
    }
}
