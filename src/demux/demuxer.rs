use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace};

use super::block::{RawBlock, parse_block_group, parse_simple_block};
use super::ebml::{self, ElementHeader};
use super::elements::*;
use super::{Element, TrackEntry};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Stage;

const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Streaming EBML parser.
///
/// Segment and Cluster are entered without buffering their bodies, so both
/// may have unknown size. Info, Tracks, Timecode and blocks are buffered whole
/// (bounded by `max_element_size`) and parsed in one go. Everything else is
/// skipped as it streams past.
pub struct EbmlDemuxer {
    buf: BytesMut,
    /// Stream offset of `buf[0]`
    offset: u64,
    /// Bytes of a skipped element still to discard
    skip: u64,
    header_seen: bool,
    max_element_size: u64,
}

impl EbmlDemuxer {
    pub fn new(max_element_size: u64) -> Self {
        Self {
            buf: BytesMut::new(),
            offset: 0,
            skip: 0,
            header_seen: false,
            max_element_size,
        }
    }

    fn advance(&mut self, n: usize) {
        self.buf.advance(n);
        self.offset += n as u64;
    }

    fn take(&mut self, n: usize) -> Bytes {
        self.offset += n as u64;
        self.buf.split_to(n).freeze()
    }

    /// Parse as many complete elements as the buffer holds.
    fn drain(&mut self, out: &mut Vec<Element>) -> PipelineResult<()> {
        loop {
            if self.skip > 0 {
                let n = self.skip.min(self.buf.len() as u64) as usize;
                self.advance(n);
                self.skip -= n as u64;
                if self.skip > 0 {
                    return Ok(());
                }
            }

            let start = self.offset;
            let header = ebml::read_header(&self.buf).map_err(|e| PipelineError::parse(start, e))?;
            let Some(header) = header else {
                return Ok(());
            };

            if !self.header_seen && header.id != EBML_HEADER {
                return Err(PipelineError::parse(start, "stream does not start with an EBML header"));
            }

            match header.id {
                SEGMENT => {
                    self.advance(header.header_len);
                    debug!("EbmlDemuxer: segment at {}", start);
                }
                CLUSTER => {
                    self.advance(header.header_len);
                    trace!("EbmlDemuxer: cluster at {}", start);
                    out.push(Element::ClusterStart);
                }
                EBML_HEADER | INFO | TRACKS | TIMECODE | SIMPLE_BLOCK | BLOCK_GROUP => {
                    if !self.whole_element_ready(&header, start)? {
                        return Ok(());
                    }
                    self.advance(header.header_len);
                    let body = self.take(header.size as usize);
                    self.parse_element(header.id, start, body, out)
                        .map_err(|e| PipelineError::parse(start, e))?;
                }
                _ => {
                    if header.is_unknown_size() {
                        return Err(PipelineError::parse(
                            start,
                            format!("cannot skip unknown-size element 0x{:X}", header.id),
                        ));
                    }
                    trace!("EbmlDemuxer: skipping 0x{:X} ({} bytes)", header.id, header.size);
                    self.advance(header.header_len);
                    self.skip = header.size;
                }
            }
        }
    }

    /// Whether a buffered-whole element is fully available, rejecting ones
    /// that could never be.
    fn whole_element_ready(&self, header: &ElementHeader, start: u64) -> PipelineResult<bool> {
        let name = element_name(header.id);
        if header.is_unknown_size() {
            return Err(PipelineError::parse(start, format!("{} with unknown size", name)));
        }
        if header.size > self.max_element_size {
            return Err(PipelineError::parse(
                start,
                format!("{} of {} bytes exceeds limit", name, header.size),
            ));
        }
        Ok(self.buf.len() as u64 >= header.header_len as u64 + header.size)
    }

    fn parse_element(
        &mut self,
        id: u32,
        offset: u64,
        body: Bytes,
        out: &mut Vec<Element>,
    ) -> Result<(), String> {
        match id {
            EBML_HEADER => {
                let doc_type = children(&body)?
                    .into_iter()
                    .find(|(id, _)| *id == DOC_TYPE)
                    .map(|(_, data)| ebml::read_string(&data))
                    .unwrap_or_else(|| "matroska".to_string());
                if doc_type != "webm" && doc_type != "matroska" {
                    return Err(format!("unsupported doc type {:?}", doc_type));
                }
                self.header_seen = true;
                out.push(Element::Header { doc_type });
            }
            INFO => out.push(parse_info(&body)?),
            TRACKS => {
                for (id, entry) in children(&body)? {
                    if id == TRACK_ENTRY {
                        out.push(Element::Track(parse_track_entry(&entry)?));
                    }
                }
            }
            TIMECODE => out.push(Element::ClusterTimecode(ebml::read_uint(&body)?)),
            SIMPLE_BLOCK => out.push(Element::Block(RawBlock {
                offset,
                ..parse_simple_block(&body)?
            })),
            BLOCK_GROUP => out.push(Element::Block(RawBlock {
                offset,
                ..parse_block_group(&body)?
            })),
            _ => {}
        }
        Ok(())
    }
}

/// Direct children of a fully buffered master element.
fn children(data: &Bytes) -> Result<Vec<(u32, Bytes)>, String> {
    let mut items = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let header = ebml::read_header(&data[pos..])?.ok_or("child element truncated")?;
        let start = pos + header.header_len;
        let end = start
            .checked_add(header.size as usize)
            .filter(|&end| !header.is_unknown_size() && end <= data.len())
            .ok_or_else(|| format!("{} overruns its parent", element_name(header.id)))?;
        items.push((header.id, data.slice(start..end)));
        pos = end;
    }
    Ok(items)
}

fn parse_info(body: &Bytes) -> Result<Element, String> {
    let mut timecode_scale = DEFAULT_TIMECODE_SCALE;
    let mut duration = None;
    for (id, data) in children(body)? {
        match id {
            TIMECODE_SCALE => timecode_scale = ebml::read_uint(&data)?,
            DURATION => duration = Some(ebml::read_float(&data)?),
            _ => {}
        }
    }
    if timecode_scale == 0 {
        return Err("timecode scale of zero".into());
    }
    Ok(Element::Info {
        timecode_scale,
        duration,
    })
}

fn parse_track_entry(body: &Bytes) -> Result<TrackEntry, String> {
    let mut track = TrackEntry::default();
    for (id, data) in children(body)? {
        match id {
            TRACK_NUMBER => track.number = ebml::read_uint(&data)?,
            TRACK_TYPE => track.track_type = ebml::read_uint(&data)?,
            CODEC_ID => track.codec_id = ebml::read_string(&data),
            CODEC_PRIVATE => track.codec_private = Some(data),
            DEFAULT_DURATION => track.default_duration = Some(ebml::read_uint(&data)?),
            TRACK_TIMECODE_SCALE => track.timecode_scale = Some(ebml::read_float(&data)?),
            VIDEO => {
                for (id, data) in children(&data)? {
                    let value = ebml::read_uint(&data)? as u32;
                    match id {
                        PIXEL_WIDTH => track.pixel_width = value,
                        PIXEL_HEIGHT => track.pixel_height = value,
                        DISPLAY_WIDTH => track.display_width = Some(value),
                        DISPLAY_HEIGHT => track.display_height = Some(value),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    if track.number == 0 {
        return Err("track entry without a track number".into());
    }
    Ok(track)
}

impl Stage for EbmlDemuxer {
    type In = Bytes;
    type Out = Element;

    fn name(&self) -> &'static str {
        "EbmlDemuxer"
    }

    fn push(&mut self, input: Bytes, out: &mut Vec<Element>) -> PipelineResult<()> {
        self.buf.extend_from_slice(&input);
        self.drain(out)
    }

    fn flush(&mut self, _out: &mut Vec<Element>) -> PipelineResult<()> {
        if !self.header_seen {
            return Err(PipelineError::parse(self.offset, "no EBML header"));
        }
        if self.skip > 0 || !self.buf.is_empty() {
            return Err(PipelineError::parse(self.offset, "stream ends inside an element"));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.buf = BytesMut::new();
    }
}
