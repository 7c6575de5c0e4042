//! SimpleBlock and Block bodies
//!
//! ```text
//! [track: vint] [timecode: i16, relative to cluster] [flags: u8] [frame data...]
//! ```
//!
//! Flags: 0x80 keyframe (SimpleBlock only), 0x08 invisible, 0x06 lacing.
//! Video is never laced in practice, so laced blocks are rejected rather than
//! split.

use bytes::Bytes;

use super::ebml;
use super::elements::{BLOCK, BLOCK_DURATION, REFERENCE_BLOCK};

/// One coded frame as stored in a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    /// Stream offset of the enclosing element, filled in by the demuxer
    pub offset: u64,
    pub track: u64,
    /// Ticks relative to the enclosing cluster's timecode
    pub relative_timecode: i16,
    pub keyframe: bool,
    pub invisible: bool,
    /// Explicit duration in ticks, from a BlockGroup's BlockDuration
    pub duration: Option<u64>,
    pub payload: Bytes,
}

/// Split a block body into its header fields and frame data.
fn parse_body(data: &Bytes) -> Result<(u64, i16, u8, Bytes), String> {
    let first = *data.first().ok_or("empty block")?;
    let width = first.leading_zeros() as usize + 1;
    if first == 0 || width > 8 {
        return Err(format!("invalid track number lead byte 0x{:02X}", first));
    }
    if data.len() < width + 3 {
        return Err("block header truncated".into());
    }
    let mask = 0xFFu8.checked_shr(width as u32).unwrap_or(0);
    let track = data[1..width]
        .iter()
        .fold((first & mask) as u64, |acc, &b| (acc << 8) | b as u64);

    let timecode = i16::from_be_bytes([data[width], data[width + 1]]);
    let flags = data[width + 2];
    if (flags >> 1) & 0x03 != 0 {
        return Err(format!("laced block on track {} is not supported", track));
    }

    Ok((track, timecode, flags, data.slice(width + 3..)))
}

pub fn parse_simple_block(data: &Bytes) -> Result<RawBlock, String> {
    let (track, relative_timecode, flags, payload) = parse_body(data)?;
    Ok(RawBlock {
        offset: 0,
        track,
        relative_timecode,
        keyframe: flags & 0x80 != 0,
        invisible: flags & 0x08 != 0,
        duration: None,
        payload,
    })
}

/// Parse a BlockGroup. The block is a keyframe unless it references another.
pub fn parse_block_group(data: &Bytes) -> Result<RawBlock, String> {
    let mut block = None;
    let mut duration = None;
    let mut has_reference = false;

    let mut pos = 0;
    while pos < data.len() {
        let header = ebml::read_header(&data[pos..])?.ok_or("BlockGroup child truncated")?;
        let start = pos + header.header_len;
        let end = start
            .checked_add(header.size as usize)
            .filter(|&end| !header.is_unknown_size() && end <= data.len())
            .ok_or("BlockGroup child overruns its parent")?;
        let body = data.slice(start..end);

        match header.id {
            BLOCK => block = Some(parse_body(&body)?),
            BLOCK_DURATION => duration = Some(ebml::read_uint(&body)?),
            REFERENCE_BLOCK => has_reference = true,
            _ => {}
        }
        pos = end;
    }

    let (track, relative_timecode, flags, payload) = block.ok_or("BlockGroup without Block")?;
    Ok(RawBlock {
        offset: 0,
        track,
        relative_timecode,
        keyframe: !has_reference,
        invisible: flags & 0x08 != 0,
        duration,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_block() {
        let data = Bytes::from_static(&[0x81, 0x00, 0x28, 0x80, 0xDE, 0xAD]);
        let block = parse_simple_block(&data).unwrap();
        assert_eq!(block.track, 1);
        assert_eq!(block.relative_timecode, 40);
        assert!(block.keyframe);
        assert_eq!(&block.payload[..], &[0xDE, 0xAD]);
    }

    #[test]
    fn test_negative_relative_timecode() {
        let data = Bytes::from_static(&[0x82, 0xFF, 0xF6, 0x00, 0x01]);
        let block = parse_simple_block(&data).unwrap();
        assert_eq!(block.track, 2);
        assert_eq!(block.relative_timecode, -10);
        assert!(!block.keyframe);
    }

    #[test]
    fn test_laced_block_rejected() {
        let data = Bytes::from_static(&[0x81, 0x00, 0x00, 0x86, 0x01, 0x02]);
        assert!(parse_simple_block(&data).is_err());
    }

    #[test]
    fn test_block_group_with_reference_and_duration() {
        let data = Bytes::from_static(&[
            0xA1, 0x85, 0x81, 0x00, 0x10, 0x00, 0xAA, // Block
            0x9B, 0x81, 0x21, // BlockDuration = 33
            0xFB, 0x81, 0xF0, // ReferenceBlock
        ]);
        let block = parse_block_group(&data).unwrap();
        assert_eq!(block.relative_timecode, 16);
        assert_eq!(block.duration, Some(33));
        assert!(!block.keyframe);
        assert_eq!(&block.payload[..], &[0xAA]);
    }

    #[test]
    fn test_block_group_without_block() {
        let data = Bytes::from_static(&[0x9B, 0x81, 0x21]);
        assert!(parse_block_group(&data).is_err());
    }
}
