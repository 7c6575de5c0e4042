//! Incremental WebM/Matroska demuxing
//!
//! The demuxer consumes arbitrary byte chunks and emits the container elements
//! the rest of the pipeline needs, in stream order. Payloads are sliced out of
//! the input without copying.

mod block;
mod demuxer;
pub mod ebml;
pub mod elements;

use bytes::Bytes;

pub use block::RawBlock;
pub use demuxer::EbmlDemuxer;

/// A track declaration from the Tracks element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackEntry {
    pub number: u64,
    pub track_type: u64,
    pub codec_id: String,
    pub codec_private: Option<Bytes>,
    /// Nanoseconds per frame
    pub default_duration: Option<u64>,
    pub timecode_scale: Option<f64>,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
}

impl TrackEntry {
    pub fn is_video(&self) -> bool {
        self.track_type == elements::TRACK_TYPE_VIDEO
    }
}

/// Container structure, in the order it appears in the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Header { doc_type: String },
    Info {
        /// Nanoseconds per tick
        timecode_scale: u64,
        /// Segment duration in ticks
        duration: Option<f64>,
    },
    Track(TrackEntry),
    /// A new cluster begins; its timecode follows
    ClusterStart,
    ClusterTimecode(u64),
    Block(RawBlock),
}
