//! Fixtures shared by the unit tests: a WebM byte builder, a scripted decode
//! engine and range source, and helpers for collecting pipeline output.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::decoder::{
    DecodeEngine, DecodedFrame, DecodedImage, EngineFactory, FrameBuffer, FrameLedger,
    PixelFormat,
};
use crate::demux::elements::*;
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::{MemoryRangeSource, RangeChunk, RangeSource, SourceFactory};
use crate::pipeline::player::PlayerInstance;
use crate::pipeline::{DecoderConfig, EncodedChunk, Timestamp};
use crate::workers::WorkerEvent;

// ── WebM builder ────────────────────────────────────────────────────────────

const VOID: u32 = 0xEC;

fn encode_id(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

fn encode_size(size: u64) -> Vec<u8> {
    let width = (1..=8usize)
        .find(|&w| size < (1u64 << (7 * w)) - 1)
        .unwrap_or(8);
    let marked = size | (1u64 << (7 * width));
    marked.to_be_bytes()[8 - width..].to_vec()
}

fn element(id: u32, body: &[u8]) -> Vec<u8> {
    let mut out = encode_id(id);
    out.extend(encode_size(body.len() as u64));
    out.extend_from_slice(body);
    out
}

fn unknown_size_header(id: u32) -> Vec<u8> {
    let mut out = encode_id(id);
    out.push(0xFF);
    out
}

fn uint(id: u32, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    element(id, &bytes[skip..])
}

pub struct ClusterBuilder {
    body: Vec<u8>,
}

impl ClusterBuilder {
    fn new(timecode: u64) -> Self {
        Self {
            body: uint(TIMECODE, timecode),
        }
    }

    pub fn simple_block(mut self, track: u64, relative: i16, keyframe: bool, payload: &[u8]) -> Self {
        let mut body = vec![0x80 | track as u8];
        body.extend(relative.to_be_bytes());
        body.push(if keyframe { 0x80 } else { 0x00 });
        body.extend_from_slice(payload);
        self.body.extend(element(SIMPLE_BLOCK, &body));
        self
    }

    pub fn block_group(
        mut self,
        track: u64,
        relative: i16,
        duration: Option<u64>,
        reference: bool,
        payload: &[u8],
    ) -> Self {
        let mut block = vec![0x80 | track as u8];
        block.extend(relative.to_be_bytes());
        block.push(0x00);
        block.extend_from_slice(payload);

        let mut group = element(BLOCK, &block);
        if let Some(ticks) = duration {
            group.extend(uint(BLOCK_DURATION, ticks));
        }
        if reference {
            group.extend(element(REFERENCE_BLOCK, &[0xD8]));
        }
        self.body.extend(element(BLOCK_GROUP, &group));
        self
    }
}

pub struct WebmBuilder {
    timecode_scale: u64,
    duration: Option<f64>,
    prefix: Vec<u8>,
    tracks: Vec<u8>,
    clusters: Vec<Vec<u8>>,
    unknown_sizes: bool,
}

impl WebmBuilder {
    pub fn new() -> Self {
        Self {
            timecode_scale: 1_000_000,
            duration: None,
            prefix: Vec::new(),
            tracks: Vec::new(),
            clusters: Vec::new(),
            unknown_sizes: false,
        }
    }

    pub fn duration_ms(mut self, ticks: f64) -> Self {
        self.duration = Some(ticks);
        self
    }

    pub fn timecode_scale(mut self, nanos: u64) -> Self {
        self.timecode_scale = nanos;
        self
    }

    /// Segment and clusters written with unknown size, as live muxers do.
    pub fn unknown_sizes(mut self) -> Self {
        self.unknown_sizes = true;
        self
    }

    pub fn void(mut self, len: usize) -> Self {
        self.prefix.extend(element(VOID, &vec![0; len]));
        self
    }

    pub fn video_track(mut self, number: u64, codec_id: &str, width: u32, height: u32) -> Self {
        let mut video = uint(PIXEL_WIDTH, width as u64);
        video.extend(uint(PIXEL_HEIGHT, height as u64));

        let mut entry = uint(TRACK_NUMBER, number);
        entry.extend(uint(TRACK_TYPE, TRACK_TYPE_VIDEO));
        entry.extend(element(CODEC_ID, codec_id.as_bytes()));
        entry.extend(uint(DEFAULT_DURATION, 40_000_000));
        entry.extend(element(VIDEO, &video));
        self.tracks.extend(element(TRACK_ENTRY, &entry));
        self
    }

    pub fn audio_track(mut self, number: u64) -> Self {
        let mut entry = uint(TRACK_NUMBER, number);
        entry.extend(uint(TRACK_TYPE, 2));
        entry.extend(element(CODEC_ID, b"A_OPUS"));
        self.tracks.extend(element(TRACK_ENTRY, &entry));
        self
    }

    pub fn cluster(mut self, timecode: u64, fill: impl FnOnce(ClusterBuilder) -> ClusterBuilder) -> Self {
        let body = fill(ClusterBuilder::new(timecode)).body;
        let cluster = if self.unknown_sizes {
            let mut out = unknown_size_header(CLUSTER);
            out.extend(body);
            out
        } else {
            element(CLUSTER, &body)
        };
        self.clusters.push(cluster);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut info = uint(TIMECODE_SCALE, self.timecode_scale);
        if let Some(duration) = self.duration {
            info.extend(element(DURATION, &duration.to_be_bytes()));
        }

        let mut segment = self.prefix;
        segment.extend(element(INFO, &info));
        segment.extend(element(TRACKS, &self.tracks));
        for cluster in self.clusters {
            segment.extend(cluster);
        }

        let mut out = element(EBML_HEADER, &element(DOC_TYPE, b"webm"));
        if self.unknown_sizes {
            out.extend(unknown_size_header(SEGMENT));
            out.extend(segment);
        } else {
            out.extend(element(SEGMENT, &segment));
        }
        out
    }
}

// ── Scripted engine ─────────────────────────────────────────────────────────

/// Decode engine that turns each chunk into a 2x2 RGBA image with the
/// chunk's timestamp.
pub struct ScriptedEngine {
    delay: usize,
    fail_at: Option<u64>,
    held: VecDeque<DecodedImage>,
    decoded: u64,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            delay: 0,
            fail_at: None,
            held: VecDeque::new(),
            decoded: 0,
        }
    }

    /// Hold this many images back, like a decoder with internal latency.
    pub fn delay(mut self, images: usize) -> Self {
        self.delay = images;
        self
    }

    /// Fail on the chunk with this zero-based index.
    pub fn fail_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl DecodeEngine for ScriptedEngine {
    fn configure(&mut self, _config: &DecoderConfig) -> PipelineResult<()> {
        Ok(())
    }

    fn decode(&mut self, chunk: &EncodedChunk) -> PipelineResult<Vec<DecodedImage>> {
        if self.fail_at == Some(self.decoded) {
            return Err(PipelineError::decode(format!(
                "scripted failure at chunk {}",
                self.decoded
            )));
        }
        self.decoded += 1;
        self.held.push_back(DecodedImage {
            buffer: FrameBuffer::new(vec![200; 16], PixelFormat::Rgba, 2, 2),
            timestamp: chunk.timestamp,
            duration: chunk.duration,
        });

        let ready = self.held.len().saturating_sub(self.delay);
        Ok(self.held.drain(..ready).collect())
    }

    fn flush(&mut self) -> PipelineResult<Vec<DecodedImage>> {
        Ok(self.held.drain(..).collect())
    }
}

pub fn scripted_engines() -> EngineFactory {
    Arc::new(|| Ok(Box::new(ScriptedEngine::new()) as Box<dyn DecodeEngine>))
}

// ── Scripted source ─────────────────────────────────────────────────────────

/// In-memory source that can fail or hang at a given offset and records
/// every request it sees.
pub struct ScriptedSource {
    data: Bytes,
    fail_at: Option<u64>,
    stall_at: Option<u64>,
    requests: Mutex<Vec<u64>>,
}

impl ScriptedSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            fail_at: None,
            stall_at: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests starting at or past `offset` fail.
    pub fn fail_at(mut self, offset: u64) -> Self {
        self.fail_at = Some(offset);
        self
    }

    /// Requests starting at or past `offset` never complete.
    pub fn stall_at(mut self, offset: u64) -> Self {
        self.stall_at = Some(offset);
        self
    }

    pub fn requests(&self) -> Vec<u64> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RangeSource for ScriptedSource {
    async fn fetch_range(&self, start: u64, len: u64) -> PipelineResult<RangeChunk> {
        self.requests.lock().unwrap().push(start);
        if self.stall_at.is_some_and(|at| start >= at) {
            std::future::pending::<()>().await;
        }
        if self.fail_at.is_some_and(|at| start >= at) {
            return Err(PipelineError::transport(format!("scripted failure at {}", start)));
        }
        let total = self.data.len() as u64;
        let begin = start.min(total) as usize;
        let end = (start + len).min(total) as usize;
        Ok(RangeChunk {
            data: self.data.slice(begin..end),
            total_len: Some(total),
        })
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

/// Resolves every URI to the same source.
pub fn fixed_source(source: ScriptedSource) -> SourceFactory {
    let source: Arc<dyn RangeSource> = Arc::new(source);
    Arc::new(move |_uri| Ok(source.clone()))
}

/// Resolves URIs from a fixed table; anything else is a transport error.
pub fn routed_sources(routes: Vec<(&str, Arc<dyn RangeSource>)>) -> SourceFactory {
    let table: HashMap<String, Arc<dyn RangeSource>> = routes
        .into_iter()
        .map(|(uri, source)| (uri.to_string(), source))
        .collect();
    Arc::new(move |uri| {
        table
            .get(uri)
            .cloned()
            .ok_or_else(|| PipelineError::transport(format!("no such resource: {}", uri)))
    })
}

pub fn memory_sources(files: Vec<(&str, Vec<u8>)>) -> SourceFactory {
    routed_sources(
        files
            .into_iter()
            .map(|(uri, data)| {
                let source: Arc<dyn RangeSource> = Arc::new(MemoryRangeSource::new(uri, data));
                (uri, source)
            })
            .collect(),
    )
}

// ── Frames and chunks ───────────────────────────────────────────────────────

pub fn frame(ledger: &FrameLedger, micros: i64) -> DecodedFrame {
    let buffer = FrameBuffer::new(vec![0; 4], PixelFormat::Rgba, 1, 1);
    DecodedFrame::new(
        buffer,
        Timestamp::from_micros(micros),
        Duration::from_millis(40),
        1,
        1,
        ledger,
    )
}

pub fn chunk(micros: i64, keyframe: bool) -> EncodedChunk {
    EncodedChunk {
        timestamp: Timestamp::from_micros(micros),
        duration: Duration::from_millis(40),
        is_keyframe: keyframe,
        payload: Bytes::from_static(&[0]),
    }
}

pub fn vp9_config() -> DecoderConfig {
    DecoderConfig {
        codec: "vp9".into(),
        codec_id: "V_VP9".into(),
        description: None,
        coded_width: 2,
        coded_height: 2,
        display_width: 2,
        display_height: 2,
    }
}

/// Timestamps of every frame an instance delivers until it ends or the
/// timeout passes. Frames are released as they are counted.
pub async fn collect_frames(instance: &mut PlayerInstance, timeout: Duration) -> Vec<i64> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, instance.next_frame()).await {
        seen.push(frame.timestamp().micros);
        frame.release();
    }
    seen
}

// ── Worker events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Frame(i64),
    Duration(i64),
    Done,
    Error(PipelineError),
}

/// Consumer side of a worker, recording events and releasing frames.
pub struct EventLog {
    rx: mpsc::Receiver<WorkerEvent>,
    pub events: Vec<Recorded>,
}

impl EventLog {
    pub fn new(rx: mpsc::Receiver<WorkerEvent>) -> Self {
        Self {
            rx,
            events: Vec::new(),
        }
    }

    fn record(&mut self, event: WorkerEvent) -> bool {
        let terminal = event.is_terminal();
        let recorded = match event {
            WorkerEvent::Frame(frame) => {
                let ts = frame.timestamp().micros;
                frame.release();
                Recorded::Frame(ts)
            }
            WorkerEvent::Duration(duration) => Recorded::Duration(duration.micros),
            WorkerEvent::Done => Recorded::Done,
            WorkerEvent::Error(e) => Recorded::Error(e),
        };
        self.events.push(recorded);
        terminal
    }

    /// Record until a terminal event; panics if none arrives in time.
    pub async fn until_terminal(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(event)) => {
                    if self.record(event) {
                        return;
                    }
                }
                Ok(None) => panic!("worker ended without a terminal event: {:?}", self.events),
                Err(_) => panic!("timed out waiting for a terminal event: {:?}", self.events),
            }
        }
    }

    /// Record until `count` frames have been seen; panics on timeout.
    pub async fn until_frames(&mut self, count: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.frames().len() < count {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(event)) => {
                    self.record(event);
                }
                Ok(None) => panic!("worker ended before {} frames: {:?}", count, self.events),
                Err(_) => panic!("timed out waiting for {} frames: {:?}", count, self.events),
            }
        }
    }

    /// Record whatever arrives during `period`.
    pub async fn collect_for(&mut self, period: Duration) {
        let deadline = Instant::now() + period;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
            self.record(event);
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn frames(&self) -> Vec<i64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Recorded::Frame(ts) => Some(*ts),
                _ => None,
            })
            .collect()
    }

    pub fn duration(&self) -> Option<i64> {
        self.events.iter().find_map(|e| match e {
            Recorded::Duration(d) => Some(*d),
            _ => None,
        })
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|e| {
                match e {
                    Recorded::Frame(_) => "frame",
                    Recorded::Duration(_) => "duration",
                    Recorded::Done => "done",
                    Recorded::Error(_) => "err",
                }
                .to_string()
            })
            .collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Recorded::Done | Recorded::Error(_)))
            .count()
    }

    pub fn ended_done(&self) -> bool {
        matches!(self.events.last(), Some(Recorded::Done))
    }

    pub fn error(&self) -> Option<PipelineError> {
        self.events.iter().rev().find_map(|e| match e {
            Recorded::Error(e) => Some(e.clone()),
            _ => None,
        })
    }
}

#[test]
fn test_size_encoding_round_trips_through_reader() {
    use crate::demux::ebml::read_size;
    for size in [0u64, 1, 126, 127, 128, 16_382, 16_383, 1 << 20] {
        let encoded = encode_size(size);
        assert_eq!(read_size(&encoded).unwrap(), Some((size, encoded.len())));
    }
}
