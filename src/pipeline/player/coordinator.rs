//! Player pipeline coordinator
//!
//! Chains fetch → demux → assemble → decode → fade → gate for one source and
//! owns the resulting tasks until they have all unwound.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures_util::future::join_all;
use log::{error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::assemble_stage::ChunkAssembler;
use super::decode_stage::FrameDecoder;
use super::fade_stage::{FadeControl, FadeOptions, FadeTransform};
use super::valve_stage::{FlowGate, GateHandle, GateState};
use crate::config::PipelineConfig;
use crate::decoder::{DecodeEngine, DecodedFrame, FrameLedger};
use crate::demux::EbmlDemuxer;
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::{RangeFetcher, RangeSource};
use crate::pipeline::{PipelineHealth, PipelineStage, StageRunner, Timestamp};

/// What to play and how to start it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRequest {
    pub uri: String,
    /// Start with the gate closed (loaded but paused)
    pub closed: bool,
    pub fade: FadeOptions,
}

impl SourceRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            closed: false,
            fade: FadeOptions::default(),
        }
    }
}

/// Launches pipeline instances with a shared configuration.
pub struct PlayerCoordinator {
    config: PipelineConfig,
    launched: u64,
}

impl PlayerCoordinator {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            launched: 0,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Wire and spawn every stage for `request`.
    pub fn launch(
        &mut self,
        request: &SourceRequest,
        source: Arc<dyn RangeSource>,
        engine: Box<dyn DecodeEngine>,
    ) -> PlayerInstance {
        self.launched += 1;
        let id = self.launched;
        let capacity = self.config.channel_capacity;

        let cancel = CancellationToken::new();
        let health = Arc::new(PipelineHealth::new());
        let ledger = FrameLedger::new();
        let failure = Arc::new(OnceLock::new());

        let (duration_tx, duration_rx) = watch::channel::<Option<Timestamp>>(None);
        let initial = if request.closed {
            GateState::Closed
        } else {
            GateState::Open
        };
        let (gate, gate_rx) = GateHandle::new(initial);
        let fade = FadeControl::new(request.fade.disable_out);

        // fetch → demux → assemble → decode → fade → gate
        let mut fetcher = RangeFetcher::new(
            source,
            self.config.chunk_size,
            cancel.clone(),
            health.clone(),
        );
        let mut demuxer = StageRunner::new(
            EbmlDemuxer::new(self.config.max_element_size),
            cancel.clone(),
        );
        let mut assembler = StageRunner::new(
            ChunkAssembler::new(duration_tx, health.clone()),
            cancel.clone(),
        );
        let mut decoder = StageRunner::new(
            FrameDecoder::new(engine, self.config.lookahead, ledger.clone(), health.clone()),
            cancel.clone(),
        );
        let mut fader = StageRunner::new(
            FadeTransform::new(request.fade, fade.clone(), duration_rx.clone()),
            cancel.clone(),
        );
        let mut flow_gate = FlowGate::new(gate_rx, cancel.clone(), health.clone());

        demuxer.set_input(fetcher.take_output());
        assembler.set_input(demuxer.take_output(capacity));
        decoder.set_input(assembler.take_output(capacity));
        fader.set_input(decoder.take_output(1));
        flow_gate.set_input(fader.take_output(1));
        let output_rx = flow_gate.take_output(1);

        let tasks = vec![
            spawn_stage(fetcher, cancel.clone(), failure.clone()),
            spawn_stage(demuxer, cancel.clone(), failure.clone()),
            spawn_stage(assembler, cancel.clone(), failure.clone()),
            spawn_stage(decoder, cancel.clone(), failure.clone()),
            spawn_stage(fader, cancel.clone(), failure.clone()),
            spawn_stage(flow_gate, cancel.clone(), failure.clone()),
        ];

        info!(
            "PlayerCoordinator: instance {} started for {} ({})",
            id,
            request.uri,
            if request.closed { "closed" } else { "open" }
        );

        PlayerInstance {
            id,
            cancel,
            gate,
            fade,
            duration_rx,
            output_rx,
            tasks,
            failure,
            health,
            ledger,
            started_at: Instant::now(),
        }
    }
}

/// Run a stage to completion; the first real failure cancels the rest.
fn spawn_stage<S>(
    mut stage: S,
    cancel: CancellationToken,
    failure: Arc<OnceLock<PipelineError>>,
) -> JoinHandle<()>
where
    S: PipelineStage + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = stage.run().await
            && !e.is_cancellation()
        {
            if failure.set(e).is_err() {
                warn!("{}: failed after another stage already had", stage.name());
            }
            cancel.cancel();
        }
    })
}

/// One running pipeline.
pub struct PlayerInstance {
    id: u64,
    cancel: CancellationToken,
    gate: GateHandle,
    fade: FadeControl,
    duration_rx: watch::Receiver<Option<Timestamp>>,
    output_rx: mpsc::Receiver<DecodedFrame>,
    tasks: Vec<JoinHandle<()>>,
    failure: Arc<OnceLock<PipelineError>>,
    health: Arc<PipelineHealth>,
    ledger: FrameLedger,
    started_at: Instant,
}

impl PlayerInstance {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn play(&self) {
        self.gate.open();
    }

    pub fn pause(&self) {
        self.gate.close();
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn set_fade_out_disabled(&self, disabled: bool) {
        self.fade.set_fade_out_disabled(disabled);
    }

    /// Stream duration, once the container has declared it.
    pub fn duration(&self) -> Option<Timestamp> {
        *self.duration_rx.borrow()
    }

    /// Next frame through the gate; `None` once the pipeline has ended.
    pub async fn next_frame(&mut self) -> Option<DecodedFrame> {
        self.output_rx.recv().await
    }

    /// A stage has failed and the pipeline is unwinding.
    pub fn is_failed(&self) -> bool {
        self.failure.get().is_some()
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    pub fn ledger(&self) -> &FrameLedger {
        &self.ledger
    }

    /// Cancel every stage and wait for them to stop.
    pub async fn close(self) -> PipelineResult<()> {
        info!("PlayerInstance {}: closing", self.id);
        self.cancel.cancel();
        self.finish().await
    }

    /// Wait for all stages and report how the stream ended.
    ///
    /// `Ok` means end of stream or cancellation; otherwise the first failure.
    pub async fn finish(mut self) -> PipelineResult<()> {
        // frames still in the last channel are released unseen
        self.output_rx.close();
        while let Ok(frame) = self.output_rx.try_recv() {
            frame.release();
        }

        for joined in join_all(self.tasks.drain(..)).await {
            if let Err(e) = joined {
                error!("PlayerInstance {}: stage task died: {}", self.id, e);
                let _ = self.failure.set(PipelineError::TaskFailed(e.to_string()));
            }
        }
        drop(self.output_rx);

        let outstanding = self.ledger.outstanding();
        if outstanding > 0 {
            warn!(
                "PlayerInstance {}: {} frames still held after teardown",
                self.id, outstanding
            );
        }
        info!(
            "PlayerInstance {}: ended after {:.1?}. {}",
            self.id,
            self.started_at.elapsed(),
            self.health.summary()
        );

        match self.failure.get() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
