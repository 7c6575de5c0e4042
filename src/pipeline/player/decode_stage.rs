//! Decode stage
//!
//! Feeds encoded chunks to the decode engine and restores presentation order.
//! Engines may return frames out of order; up to `lookahead` frames are held
//! in a timestamp-ordered queue and the earliest is released whenever the
//! queue overflows. The queue never grows past `lookahead`: once it is full,
//! each release waits on the downstream channel before the next chunk is
//! pulled.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{info, warn};

use super::assemble_stage::Assembled;
use crate::decoder::{DecodeEngine, DecodedFrame, DecodedImage, FrameLedger};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{DecoderConfig, PipelineHealth, Stage, Timestamp};

/// Presentation-order buffer for decoded frames
pub struct ReorderQueue {
    /// Ascending by timestamp; equal timestamps keep arrival order
    frames: VecDeque<DecodedFrame>,
    capacity: usize,
    /// Frames that arrived ahead of an earlier-timestamped one
    reordered: u64,
}

impl ReorderQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity + 1),
            capacity,
            reordered: 0,
        }
    }

    pub fn insert(&mut self, frame: DecodedFrame) {
        let ts = frame.timestamp();
        let pos = self.frames.iter().position(|f| f.timestamp() > ts);
        match pos {
            Some(i) => {
                self.frames.insert(i, frame);
                self.reordered += 1;
            }
            None => self.frames.push_back(frame),
        }
    }

    /// Earliest frame, if the queue holds more than its capacity.
    pub fn pop_overflow(&mut self) -> Option<DecodedFrame> {
        if self.frames.len() > self.capacity {
            self.frames.pop_front()
        } else {
            None
        }
    }

    /// Everything still held, in presentation order.
    pub fn drain_all(&mut self) -> impl Iterator<Item = DecodedFrame> + '_ {
        self.frames.drain(..)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn reordered(&self) -> u64 {
        self.reordered
    }
}

pub struct FrameDecoder {
    engine: Box<dyn DecodeEngine>,
    config: Option<DecoderConfig>,
    queue: ReorderQueue,
    last_emitted: Option<Timestamp>,
    ledger: FrameLedger,
    health: Arc<PipelineHealth>,
}

impl FrameDecoder {
    pub fn new(
        engine: Box<dyn DecodeEngine>,
        lookahead: usize,
        ledger: FrameLedger,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            engine,
            config: None,
            queue: ReorderQueue::new(lookahead),
            last_emitted: None,
            ledger,
            health,
        }
    }

    fn configure(&mut self, config: DecoderConfig) -> PipelineResult<()> {
        if let Some(current) = &self.config {
            if !current.is_compatible_with(&config) {
                return Err(PipelineError::CodecChanged {
                    from: current.codec_id.clone(),
                    to: config.codec_id,
                });
            }
            return Ok(());
        }
        self.engine.configure(&config)?;
        self.config = Some(config);
        Ok(())
    }

    fn enqueue(&mut self, images: Vec<DecodedImage>) -> PipelineResult<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| PipelineError::decode("decoder produced a frame before configuration"))?;
        for image in images {
            self.health.record_decoded();
            let frame = DecodedFrame::new(
                image.buffer,
                image.timestamp,
                image.duration,
                config.display_width,
                config.display_height,
                &self.ledger,
            );
            self.queue.insert(frame);
        }
        Ok(())
    }

    /// Emit in non-decreasing order; a frame older than one already emitted
    /// is dropped.
    fn emit(&mut self, frame: DecodedFrame, out: &mut Vec<DecodedFrame>) {
        let ts = frame.timestamp();
        if let Some(last) = self.last_emitted
            && ts < last
        {
            warn!("FrameDecoder: dropping late frame {} (already at {})", ts, last);
            self.health.record_late_frame();
            frame.release();
            return;
        }
        self.last_emitted = Some(ts);
        out.push(frame);
    }
}

impl Stage for FrameDecoder {
    type In = Assembled;
    type Out = DecodedFrame;

    fn name(&self) -> &'static str {
        "FrameDecoder"
    }

    fn push(&mut self, input: Assembled, out: &mut Vec<DecodedFrame>) -> PipelineResult<()> {
        match input {
            Assembled::Config(config) => self.configure(config),
            Assembled::Chunk(chunk) => {
                if self.config.is_none() {
                    return Err(PipelineError::decode("chunk arrived before decoder configuration"));
                }
                let images = self.engine.decode(&chunk)?;
                self.enqueue(images)?;
                while let Some(frame) = self.queue.pop_overflow() {
                    self.emit(frame, out);
                }
                Ok(())
            }
        }
    }

    fn flush(&mut self, out: &mut Vec<DecodedFrame>) -> PipelineResult<()> {
        if self.config.is_some() {
            let images = self.engine.flush()?;
            self.enqueue(images)?;
        }
        let held: Vec<_> = self.queue.drain_all().collect();
        for frame in held {
            self.emit(frame, out);
        }
        Ok(())
    }

    fn close(&mut self) {
        let dropped = self.queue.len();
        // releases every frame still queued
        self.queue.drain_all().for_each(drop);
        info!(
            "FrameDecoder: closed ({} reordered, {} released unseen)",
            self.queue.reordered(),
            dropped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{FrameBuffer, PixelFormat};
    use crate::pipeline::EncodedChunk;
    use crate::test_support::{ScriptedEngine, chunk, vp9_config};
    use std::time::Duration;

    fn decoder(engine: ScriptedEngine, lookahead: usize) -> (FrameDecoder, FrameLedger) {
        let ledger = FrameLedger::new();
        let stage = FrameDecoder::new(
            Box::new(engine),
            lookahead,
            ledger.clone(),
            Arc::new(PipelineHealth::new()),
        );
        (stage, ledger)
    }

    fn run(stage: &mut FrameDecoder, chunks: Vec<EncodedChunk>) -> PipelineResult<Vec<i64>> {
        let mut out = Vec::new();
        stage.push(Assembled::Config(vp9_config()), &mut out)?;
        for c in chunks {
            stage.push(Assembled::Chunk(c), &mut out)?;
        }
        stage.flush(&mut out)?;
        Ok(out.iter().map(|f| f.timestamp().micros).collect())
    }

    #[test]
    fn test_reorders_within_lookahead() {
        // B-frame style: the engine hands back 0, 80, 40, 120
        let (mut stage, ledger) = decoder(ScriptedEngine::new(), 20);
        let chunks = [0, 80, 40, 120].map(|ts| chunk(ts, ts == 0)).to_vec();

        assert_eq!(run(&mut stage, chunks).unwrap(), vec![0, 40, 80, 120]);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_queue_never_exceeds_lookahead() {
        let (mut stage, _ledger) = decoder(ScriptedEngine::new(), 3);
        let mut out = Vec::new();
        stage.push(Assembled::Config(vp9_config()), &mut out).unwrap();
        for ts in 0..10 {
            stage.push(Assembled::Chunk(chunk(ts * 40, ts == 0)), &mut out).unwrap();
            assert!(stage.queue.len() <= 3);
        }
        assert_eq!(out.len(), 7);
    }

    #[test]
    fn test_short_stream_drains_on_flush() {
        let (mut stage, _ledger) = decoder(ScriptedEngine::new(), 20);
        let chunks = vec![chunk(0, true), chunk(40, false)];
        assert_eq!(run(&mut stage, chunks).unwrap(), vec![0, 40]);
    }

    #[test]
    fn test_engine_latency_drained_on_flush() {
        let (mut stage, ledger) = decoder(ScriptedEngine::new().delay(3), 2);
        let chunks = (0..6).map(|i| chunk(i * 40, i == 0)).collect();
        assert_eq!(
            run(&mut stage, chunks).unwrap(),
            vec![0, 40, 80, 120, 160, 200]
        );
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_late_frame_dropped() {
        // lookahead 1 cannot absorb a frame arriving two positions late
        let (mut stage, ledger) = decoder(ScriptedEngine::new(), 1);
        let chunks = [40, 80, 0].map(|ts| chunk(ts, false)).to_vec();

        assert_eq!(run(&mut stage, chunks).unwrap(), vec![40, 80]);
        assert_eq!(stage.health.late_frames(), 1);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_engine_error_is_terminal() {
        let engine = ScriptedEngine::new().fail_at(2);
        let (mut stage, _ledger) = decoder(engine, 20);
        let chunks = (0..5).map(|i| chunk(i * 40, i == 0)).collect();
        assert!(matches!(run(&mut stage, chunks), Err(PipelineError::Decode(_))));
    }

    #[test]
    fn test_second_incompatible_config() {
        let (mut stage, _ledger) = decoder(ScriptedEngine::new(), 20);
        let mut out = Vec::new();
        stage.push(Assembled::Config(vp9_config()), &mut out).unwrap();

        let mut other = vp9_config();
        other.codec_id = "V_VP8".into();
        let err = stage.push(Assembled::Config(other), &mut out).unwrap_err();
        assert!(matches!(err, PipelineError::CodecChanged { .. }));
    }

    #[test]
    fn test_close_releases_queued_frames() {
        let (mut stage, ledger) = decoder(ScriptedEngine::new(), 20);
        let mut out = Vec::new();
        stage.push(Assembled::Config(vp9_config()), &mut out).unwrap();
        for ts in 0..5 {
            stage.push(Assembled::Chunk(chunk(ts * 40, ts == 0)), &mut out).unwrap();
        }
        assert_eq!(ledger.outstanding(), 5);

        stage.close();
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let ledger = FrameLedger::new();
        let mut queue = ReorderQueue::new(4);
        for width in [1, 2, 3] {
            let buffer = FrameBuffer::new(vec![0; 4], PixelFormat::Rgba, width, 1);
            queue.insert(DecodedFrame::new(
                buffer,
                Timestamp::from_micros(0),
                Duration::ZERO,
                width,
                1,
                &ledger,
            ));
        }
        let widths: Vec<u32> = queue.drain_all().map(|f| f.buffer().width).collect();
        assert_eq!(widths, vec![1, 2, 3]);
    }
}
