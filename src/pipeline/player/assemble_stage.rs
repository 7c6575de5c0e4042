//! Assemble stage
//!
//! Turns container elements into what the decoder consumes: one
//! `DecoderConfig` for the first video track, then an `EncodedChunk` per video
//! block with its absolute timestamp. Blocks of other declared tracks (audio,
//! subtitles) are dropped here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::demux::{Element, RawBlock, TrackEntry};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{
    DecoderConfig, EncodedChunk, PipelineHealth, Stage, Timestamp, codec_name,
};

/// Output of the assemble stage.
#[derive(Debug, Clone)]
pub enum Assembled {
    Config(DecoderConfig),
    Chunk(EncodedChunk),
}

pub struct ChunkAssembler {
    /// Nanoseconds per tick
    timecode_scale: u64,
    cluster_timecode: Option<u64>,
    tracks: HashMap<u64, TrackEntry>,
    video_track: Option<u64>,
    config: Option<DecoderConfig>,
    /// Segment duration in ticks, converted once the scale is final
    raw_duration: Option<f64>,
    duration_tx: watch::Sender<Option<Timestamp>>,
    health: Arc<PipelineHealth>,
}

impl ChunkAssembler {
    pub fn new(duration_tx: watch::Sender<Option<Timestamp>>, health: Arc<PipelineHealth>) -> Self {
        Self {
            timecode_scale: 1_000_000,
            cluster_timecode: None,
            tracks: HashMap::new(),
            video_track: None,
            config: None,
            raw_duration: None,
            duration_tx,
            health,
        }
    }

    fn on_track(&mut self, track: TrackEntry, out: &mut Vec<Assembled>) -> PipelineResult<()> {
        let number = track.number;
        let is_candidate = track.is_video() && self.video_track.is_none_or(|v| v == number);
        if !is_candidate {
            if track.is_video() {
                info!("ChunkAssembler: ignoring extra video track {}", number);
            }
            self.tracks.insert(number, track);
            return Ok(());
        }

        let codec = codec_name(&track.codec_id)
            .ok_or_else(|| PipelineError::UnsupportedCodec(track.codec_id.clone()))?;
        let config = DecoderConfig {
            codec: codec.to_string(),
            codec_id: track.codec_id.clone(),
            description: track.codec_private.clone(),
            coded_width: track.pixel_width,
            coded_height: track.pixel_height,
            display_width: track.display_width.unwrap_or(track.pixel_width),
            display_height: track.display_height.unwrap_or(track.pixel_height),
        };

        match &self.config {
            Some(current) if !current.is_compatible_with(&config) => {
                return Err(PipelineError::CodecChanged {
                    from: current.codec_id.clone(),
                    to: config.codec_id,
                });
            }
            // repeated Tracks element describing the same stream
            Some(_) => {}
            None => {
                info!(
                    "ChunkAssembler: video track {} {} {}x{}",
                    number, config.codec_id, config.coded_width, config.coded_height
                );
                self.config = Some(config.clone());
                self.video_track = Some(number);
                out.push(Assembled::Config(config));
            }
        }
        self.tracks.insert(number, track);
        Ok(())
    }

    fn on_block(&mut self, block: RawBlock, out: &mut Vec<Assembled>) -> PipelineResult<()> {
        let Some(track) = self.tracks.get(&block.track) else {
            return Err(PipelineError::UnknownTrack(block.track));
        };
        if self.video_track != Some(block.track) {
            return Ok(());
        }
        let cluster_timecode = self
            .cluster_timecode
            .ok_or_else(|| PipelineError::parse(block.offset, "block before cluster timecode"))?;

        // TrackTimecodeScale multiplies the segment scale
        let scale = match track.timecode_scale {
            Some(factor) if factor > 0.0 => (self.timecode_scale as f64 * factor) as u64,
            _ => self.timecode_scale,
        };
        let ticks = cluster_timecode as i64 + block.relative_timecode as i64;
        let timestamp = Timestamp::from_ticks(ticks, scale);

        let duration = match (block.duration, track.default_duration) {
            (Some(ticks), _) => Duration::from_nanos(ticks.saturating_mul(scale)),
            (None, Some(nanos)) => Duration::from_nanos(nanos),
            (None, None) => Duration::ZERO,
        };

        self.health.record_chunk(block.keyframe);
        out.push(Assembled::Chunk(EncodedChunk {
            timestamp,
            duration,
            is_keyframe: block.keyframe,
            payload: block.payload,
        }));
        Ok(())
    }

    fn publish_duration(&self) {
        if let Some(ticks) = self.raw_duration {
            let micros = ticks * self.timecode_scale as f64 / 1000.0;
            let duration = Timestamp::from_micros(micros.round() as i64);
            debug!("ChunkAssembler: duration {}", duration);
            self.duration_tx.send_replace(Some(duration));
        }
    }
}

impl Stage for ChunkAssembler {
    type In = Element;
    type Out = Assembled;

    fn name(&self) -> &'static str {
        "ChunkAssembler"
    }

    fn push(&mut self, input: Element, out: &mut Vec<Assembled>) -> PipelineResult<()> {
        match input {
            Element::Header { doc_type } => debug!("ChunkAssembler: doc type {}", doc_type),
            Element::Info {
                timecode_scale,
                duration,
            } => {
                self.timecode_scale = timecode_scale;
                self.raw_duration = duration;
                self.publish_duration();
            }
            Element::Track(track) => self.on_track(track, out)?,
            Element::ClusterStart => self.cluster_timecode = None,
            Element::ClusterTimecode(timecode) => self.cluster_timecode = Some(timecode),
            Element::Block(block) => self.on_block(block, out)?,
        }
        Ok(())
    }

    fn flush(&mut self, _out: &mut Vec<Assembled>) -> PipelineResult<()> {
        if self.config.is_none() {
            warn!("ChunkAssembler: stream ended without a video track");
        }
        Ok(())
    }
}
