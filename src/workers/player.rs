//! Player worker
//!
//! An actor owning at most one pipeline instance. It takes `ControlMessage`s
//! from any number of handles and reports `WorkerEvent`s to a single consumer.
//! Every started instance ends with exactly one terminal event (`Done` or
//! `Error`), including instances replaced by a restart.

use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::messages::{ControlMessage, WorkerEvent};
use crate::assets::{COMMAND_CHANNEL_CAPACITY, EVENT_CHANNEL_CAPACITY};
use crate::config::PipelineConfig;
use crate::decoder::{DecodedFrame, EngineFactory};
use crate::error::PipelineResult;
use crate::fetch::SourceFactory;
use crate::pipeline::PipelineState;
use crate::pipeline::player::{
    FadeOptions, GateState, PlayerCoordinator, PlayerInstance, SourceRequest,
};
use crate::utils::helpers::{SendResult, try_send_log};

/// Sending side of a worker's command channel.
///
/// `close` does not go through the channel: it trips a token the worker
/// watches, so it is never lost to a full queue.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<ControlMessage>,
    closing: CancellationToken,
}

impl WorkerHandle {
    pub fn send(&self, message: ControlMessage) -> SendResult {
        if message == ControlMessage::Close {
            return self.close();
        }
        try_send_log(&self.tx, message, "WorkerHandle")
    }

    pub fn start(&self, uri: impl Into<String>, closed: bool, fade: FadeOptions) -> SendResult {
        self.send(ControlMessage::start(uri, closed, fade))
    }

    pub fn play(&self) -> SendResult {
        self.send(ControlMessage::Play)
    }

    pub fn pause(&self) -> SendResult {
        self.send(ControlMessage::Pause)
    }

    pub fn close(&self) -> SendResult {
        self.closing.cancel();
        if self.tx.is_closed() {
            SendResult::Closed
        } else {
            SendResult::Sent
        }
    }

    pub fn disable_fade_out(&self, disabled: bool) -> SendResult {
        self.send(ControlMessage::DisableFadeOut(disabled))
    }

    /// The worker has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

enum Pulled {
    Frame(OwnedPermit<WorkerEvent>, DecodedFrame),
    Ended(OwnedPermit<WorkerEvent>),
    ConsumerGone,
}

/// Wait for room in the event channel, then for the next frame.
///
/// A parked frame goes out only while the gate is open. Once the pipeline
/// has run dry a parked frame still waits for `play`, like the gate's own.
async fn pull(
    instance: &mut PlayerInstance,
    pending: &mut Option<DecodedFrame>,
    exhausted: &mut bool,
    events: mpsc::Sender<WorkerEvent>,
) -> Pulled {
    let Ok(permit) = events.reserve_owned().await else {
        return Pulled::ConsumerGone;
    };
    loop {
        if instance.gate_state() == GateState::Open
            && let Some(frame) = pending.take()
        {
            return Pulled::Frame(permit, frame);
        }
        if *exhausted {
            if pending.is_none() {
                return Pulled::Ended(permit);
            }
            // resumed by a command
            return std::future::pending().await;
        }
        match instance.next_frame().await {
            Some(frame) => return Pulled::Frame(permit, frame),
            None => *exhausted = true,
        }
    }
}

pub struct PlayerWorker {
    coordinator: PlayerCoordinator,
    sources: SourceFactory,
    engines: EngineFactory,
    state: PipelineState,
    instance: Option<PlayerInstance>,
    /// Frame held back: pulled while the duration event took the permit,
    /// or parked because the gate was closed
    pending: Option<DecodedFrame>,
    /// The instance has no more frames beyond `pending`
    exhausted: bool,
    duration_sent: bool,
    closing: CancellationToken,
    commands: mpsc::Receiver<ControlMessage>,
    events: mpsc::Sender<WorkerEvent>,
}

impl PlayerWorker {
    pub fn new(
        config: PipelineConfig,
        sources: SourceFactory,
        engines: EngineFactory,
    ) -> (Self, WorkerHandle, mpsc::Receiver<WorkerEvent>) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let closing = CancellationToken::new();
        let handle = WorkerHandle {
            tx: command_tx,
            closing: closing.clone(),
        };
        let worker = Self {
            coordinator: PlayerCoordinator::new(config),
            sources,
            engines,
            state: PipelineState::Idle,
            instance: None,
            pending: None,
            exhausted: false,
            duration_sent: false,
            closing,
            commands,
            events,
        };
        (worker, handle, event_rx)
    }

    /// Start a worker on the current runtime.
    pub fn spawn(
        config: PipelineConfig,
        sources: SourceFactory,
        engines: EngineFactory,
    ) -> (WorkerHandle, mpsc::Receiver<WorkerEvent>, JoinHandle<()>) {
        let (worker, handle, events) = Self::new(config, sources, engines);
        let task = tokio::spawn(worker.run());
        (handle, events, task)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub async fn run(mut self) {
        info!("PlayerWorker: started");
        while !matches!(self.state, PipelineState::Closed) {
            let Some(instance) = self.instance.as_mut() else {
                tokio::select! {
                    biased;
                    _ = self.closing.cancelled() => self.close(true).await,
                    command = self.commands.recv() => match command {
                        Some(command) => self.handle(command).await,
                        None => self.close(true).await,
                    },
                }
                continue;
            };

            let events = self.events.clone();
            tokio::select! {
                biased;
                _ = self.closing.cancelled() => self.close(true).await,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => self.close(true).await,
                },
                pulled = pull(instance, &mut self.pending, &mut self.exhausted, events) => {
                    self.on_pulled(pulled).await
                }
            }
        }
        info!("PlayerWorker: finished");
    }

    fn set_state(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(&next) {
            warn!("PlayerWorker: unexpected transition {} -> {}", self.state, next);
        }
        debug!("PlayerWorker: {} -> {}", self.state, next);
        self.state = next;
    }

    async fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).await.is_err() {
            debug!("PlayerWorker: consumer gone, event dropped");
        }
    }

    async fn handle(&mut self, command: ControlMessage) {
        debug!("PlayerWorker: {:?} in {}", command, self.state);
        match command {
            ControlMessage::Start { uri, closed, fade } => {
                self.start(SourceRequest { uri, closed, fade }).await
            }
            ControlMessage::Close => self.close(true).await,
            ControlMessage::Play => match &self.instance {
                Some(instance) => instance.play(),
                None => debug!("PlayerWorker: play ignored in {}", self.state),
            },
            ControlMessage::Pause => match &self.instance {
                Some(instance) => instance.pause(),
                None => debug!("PlayerWorker: pause ignored in {}", self.state),
            },
            ControlMessage::DisableFadeOut(disabled) => match &self.instance {
                Some(instance) => instance.set_fade_out_disabled(disabled),
                None => debug!("PlayerWorker: disableFadeOut ignored in {}", self.state),
            },
        }
    }

    async fn start(&mut self, request: SourceRequest) {
        if self.state.is_closed() {
            debug!("PlayerWorker: start ignored in {}", self.state);
            return;
        }

        // a restart ends the old instance first, with its own terminal event
        if let Some(old) = self.instance.take() {
            info!("PlayerWorker: restarting with {}", request.uri);
            self.pending = None;
            let outcome = old.close().await;
            self.emit(WorkerEvent::from(outcome)).await;
        }

        match self.open(&request) {
            Ok(instance) => {
                self.instance = Some(instance);
                self.exhausted = false;
                self.duration_sent = false;
                self.set_state(PipelineState::Running {
                    started_at: Instant::now(),
                });
            }
            Err(e) => {
                warn!("PlayerWorker: cannot open {}: {}", request.uri, e);
                self.set_state(PipelineState::Closing);
                self.emit(WorkerEvent::Error(e)).await;
                self.set_state(PipelineState::Closed);
            }
        }
    }

    fn open(&mut self, request: &SourceRequest) -> PipelineResult<PlayerInstance> {
        let source = (self.sources)(&request.uri)?;
        let engine = (self.engines)()?;
        Ok(self.coordinator.launch(request, source, engine))
    }

    /// Tear down whatever runs and end the worker. The terminal event is
    /// skipped when nobody is listening anymore.
    async fn close(&mut self, notify: bool) {
        if matches!(self.state, PipelineState::Closed) {
            return;
        }
        self.set_state(PipelineState::Closing);
        self.pending = None;
        let outcome = match self.instance.take() {
            Some(instance) => instance.close().await,
            None => Ok(()),
        };
        if notify {
            self.emit(WorkerEvent::from(outcome)).await;
        }
        self.set_state(PipelineState::Closed);
    }

    async fn on_pulled(&mut self, pulled: Pulled) {
        match pulled {
            Pulled::Frame(permit, frame) => {
                let Some(instance) = &self.instance else {
                    return;
                };
                // nothing reaches the consumer once a stage has failed
                if instance.is_failed() {
                    frame.release();
                    return;
                }
                if !self.duration_sent
                    && let Some(duration) = instance.duration()
                {
                    self.duration_sent = true;
                    self.pending = Some(frame);
                    permit.send(WorkerEvent::Duration(duration));
                    return;
                }
                if instance.gate_state() == GateState::Closed {
                    // paused after this frame left the gate: keep only the newest
                    if let Some(older) = self.pending.replace(frame) {
                        instance.health().record_frame_drop();
                        older.release();
                    }
                    return;
                }
                permit.send(WorkerEvent::Frame(frame));
            }
            Pulled::Ended(permit) => {
                let Some(instance) = self.instance.take() else {
                    return;
                };
                self.set_state(PipelineState::Closing);
                let outcome = instance.finish().await;
                permit.send(WorkerEvent::from(outcome));
                self.set_state(PipelineState::Closed);
            }
            Pulled::ConsumerGone => {
                info!("PlayerWorker: consumer dropped its events");
                self.close(false).await;
            }
        }
    }
}
