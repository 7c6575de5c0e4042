//! Matroska/WebM element IDs the demuxer acts on. Anything else is skipped.

// EBML header
pub const EBML_HEADER: u32 = 0x1A45DFA3;
pub const DOC_TYPE: u32 = 0x4282;

// top level
pub const SEGMENT: u32 = 0x18538067;
pub const CLUSTER: u32 = 0x1F43B675;

// segment info
pub const INFO: u32 = 0x1549A966;
/// Nanoseconds per timecode tick, default 1_000_000
pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
/// Segment duration in ticks (float)
pub const DURATION: u32 = 0x4489;

// tracks
pub const TRACKS: u32 = 0x1654AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
/// 1 = video, 2 = audio, 17 = subtitle
pub const TRACK_TYPE: u32 = 0x83;
pub const CODEC_ID: u32 = 0x86;
pub const CODEC_PRIVATE: u32 = 0x63A2;
/// Nanoseconds per frame
pub const DEFAULT_DURATION: u32 = 0x23E383;
/// Per-track multiplier on the segment timecode scale (float)
pub const TRACK_TIMECODE_SCALE: u32 = 0x23314F;
pub const VIDEO: u32 = 0xE0;
pub const PIXEL_WIDTH: u32 = 0xB0;
pub const PIXEL_HEIGHT: u32 = 0xBA;
pub const DISPLAY_WIDTH: u32 = 0x54B0;
pub const DISPLAY_HEIGHT: u32 = 0x54BA;

// cluster
pub const TIMECODE: u32 = 0xE7;
pub const SIMPLE_BLOCK: u32 = 0xA3;
pub const BLOCK_GROUP: u32 = 0xA0;
pub const BLOCK: u32 = 0xA1;
pub const BLOCK_DURATION: u32 = 0x9B;
pub const REFERENCE_BLOCK: u32 = 0xFB;

pub const TRACK_TYPE_VIDEO: u64 = 1;

/// Human-readable name for log and error messages.
pub fn element_name(id: u32) -> &'static str {
    match id {
        EBML_HEADER => "EBML header",
        SEGMENT => "Segment",
        CLUSTER => "Cluster",
        INFO => "Info",
        TRACKS => "Tracks",
        TRACK_ENTRY => "TrackEntry",
        TIMECODE => "Timecode",
        SIMPLE_BLOCK => "SimpleBlock",
        BLOCK_GROUP => "BlockGroup",
        BLOCK => "Block",
        _ => "element",
    }
}
