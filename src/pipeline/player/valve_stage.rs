//! Gate stage
//!
//! Last stop before the consumer. While the gate is open frames pass straight
//! through. While it is closed upstream keeps running, but only the newest
//! frame is held and every frame it supersedes is released, so a paused
//! player resumes on the current picture instead of a backlog.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::decoder::DecodedFrame;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{PipelineHealth, PipelineStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Closed,
}

/// Control side of a gate, held by the worker.
#[derive(Debug, Clone)]
pub struct GateHandle {
    tx: Arc<watch::Sender<GateState>>,
}

impl GateHandle {
    pub fn new(initial: GateState) -> (Self, watch::Receiver<GateState>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn open(&self) {
        self.tx.send_replace(GateState::Open);
    }

    pub fn close(&self) {
        self.tx.send_replace(GateState::Closed);
    }

    pub fn state(&self) -> GateState {
        *self.tx.borrow()
    }
}

/// Reduce-to-latest buffer, independent of channels.
pub struct ReducingValve {
    state: GateState,
    held: Option<DecodedFrame>,
    health: Arc<PipelineHealth>,
}

impl ReducingValve {
    pub fn new(state: GateState, health: Arc<PipelineHealth>) -> Self {
        Self {
            state,
            held: None,
            health,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn has_held(&self) -> bool {
        self.held.is_some()
    }

    /// Offer a frame; returns it back if it may pass now.
    pub fn push(&mut self, frame: DecodedFrame) -> Option<DecodedFrame> {
        match self.state {
            GateState::Open => Some(frame),
            GateState::Closed => {
                self.hold(frame);
                None
            }
        }
    }

    /// Keep `frame` as the newest, releasing whatever it replaces.
    pub fn hold(&mut self, frame: DecodedFrame) {
        if let Some(old) = self.held.replace(frame) {
            self.health.record_frame_drop();
            old.release();
        }
    }

    /// Switch state; opening hands back the held frame.
    pub fn set_state(&mut self, state: GateState) -> Option<DecodedFrame> {
        self.state = state;
        match state {
            GateState::Open => self.held.take(),
            GateState::Closed => None,
        }
    }
}

pub struct FlowGate {
    valve: ReducingValve,
    gate_rx: watch::Receiver<GateState>,
    /// False once the handle is gone; the gate keeps its last state
    gate_live: bool,
    cancel: CancellationToken,
    health: Arc<PipelineHealth>,
    input_rx: Option<mpsc::Receiver<DecodedFrame>>,
    output_tx: Option<mpsc::Sender<DecodedFrame>>,
}

impl FlowGate {
    pub fn new(
        mut gate_rx: watch::Receiver<GateState>,
        cancel: CancellationToken,
        health: Arc<PipelineHealth>,
    ) -> Self {
        let initial = *gate_rx.borrow_and_update();
        Self {
            valve: ReducingValve::new(initial, health.clone()),
            gate_rx,
            gate_live: true,
            cancel,
            health,
            input_rx: None,
            output_tx: None,
        }
    }

    /// Set the input channel
    pub fn set_input(&mut self, rx: mpsc::Receiver<DecodedFrame>) {
        self.input_rx = Some(rx);
    }

    /// Get the output channel
    pub fn take_output(&mut self, capacity: usize) -> mpsc::Receiver<DecodedFrame> {
        let (tx, rx) = mpsc::channel::<DecodedFrame>(capacity);
        self.output_tx = Some(tx);
        rx
    }

    /// Apply the latest gate state, returning a frame released by opening.
    fn on_gate_change(&mut self, changed: Result<(), watch::error::RecvError>) -> Option<DecodedFrame> {
        if changed.is_err() {
            self.gate_live = false;
            return None;
        }
        let state = *self.gate_rx.borrow_and_update();
        debug!("FlowGate: {:?}", state);
        self.valve.set_state(state)
    }

    /// Deliver one frame, parking it instead if the gate closes while the
    /// consumer is not ready for it.
    async fn forward(
        &mut self,
        frame: DecodedFrame,
        output_tx: &mpsc::Sender<DecodedFrame>,
    ) -> PipelineResult<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                changed = self.gate_rx.changed(), if self.gate_live => {
                    if let Some(older) = self.on_gate_change(changed) {
                        // cannot happen while a frame is in hand, but never leak
                        older.release();
                    }
                    if self.valve.state() == GateState::Closed {
                        self.valve.hold(frame);
                        return Ok(());
                    }
                }
                permit = output_tx.reserve() => {
                    let permit = permit.map_err(|_| PipelineError::Cancelled)?;
                    permit.send(frame);
                    self.health.record_delivered();
                    return Ok(());
                }
            }
        }
    }

    async fn pump(
        &mut self,
        input_rx: &mut mpsc::Receiver<DecodedFrame>,
        output_tx: &mpsc::Sender<DecodedFrame>,
    ) -> PipelineResult<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                changed = self.gate_rx.changed(), if self.gate_live => {
                    if let Some(frame) = self.on_gate_change(changed) {
                        self.forward(frame, output_tx).await?;
                    }
                }
                next = input_rx.recv() => match next {
                    Some(frame) => {
                        if let Some(frame) = self.valve.push(frame) {
                            self.forward(frame, output_tx).await?;
                        }
                    }
                    None => break,
                },
            }
        }

        // a frame parked at end of stream goes out when the gate next opens
        while self.valve.has_held() {
            if !self.gate_live {
                break;
            }
            let changed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                changed = self.gate_rx.changed() => changed,
            };
            if let Some(frame) = self.on_gate_change(changed) {
                self.forward(frame, output_tx).await?;
            }
        }
        Ok(())
    }

    fn release_held(&mut self) {
        if let Some(frame) = self.valve.set_state(GateState::Open) {
            frame.release();
        }
    }
}

#[async_trait]
impl PipelineStage for FlowGate {
    async fn run(&mut self) -> PipelineResult<()> {
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| PipelineError::Config("FlowGate: no input channel".into()))?;
        let output_tx = self
            .output_tx
            .take()
            .ok_or_else(|| PipelineError::Config("FlowGate: no output channel".into()))?;

        info!("FlowGate: started ({:?})", self.valve.state());
        let result = self.pump(&mut input_rx, &output_tx).await;
        self.release_held();

        match &result {
            Ok(()) => info!(
                "FlowGate: finished ({} delivered, {} dropped)",
                self.health.frames_delivered(),
                self.health.frame_drops()
            ),
            Err(e) if e.is_cancellation() => info!("FlowGate: cancelled"),
            Err(e) => error!("FlowGate: {}", e),
        }
        result
    }

    fn name(&self) -> &'static str {
        "FlowGate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FrameLedger;
    use crate::test_support::frame;
    use std::time::Duration;

    #[test]
    fn test_open_passes_through() {
        let ledger = FrameLedger::new();
        let mut valve = ReducingValve::new(GateState::Open, Arc::new(PipelineHealth::new()));
        let out = valve.push(frame(&ledger, 0));
        assert_eq!(out.map(|f| f.timestamp().micros), Some(0));
    }

    #[test]
    fn test_closed_keeps_only_latest() {
        let ledger = FrameLedger::new();
        let health = Arc::new(PipelineHealth::new());
        let mut valve = ReducingValve::new(GateState::Closed, health.clone());

        for ts in [0, 40, 80] {
            assert!(valve.push(frame(&ledger, ts)).is_none());
        }
        assert_eq!(ledger.outstanding(), 1);
        assert_eq!(health.frame_drops(), 2);

        let resumed = valve.set_state(GateState::Open).unwrap();
        assert_eq!(resumed.timestamp().micros, 80);
        assert!(valve.set_state(GateState::Open).is_none());
    }

    #[test]
    fn test_closing_does_not_emit() {
        let ledger = FrameLedger::new();
        let mut valve = ReducingValve::new(GateState::Open, Arc::new(PipelineHealth::new()));
        assert!(valve.set_state(GateState::Closed).is_none());
        assert!(valve.push(frame(&ledger, 0)).is_none());
    }

    type Wired = (
        FlowGate,
        GateHandle,
        mpsc::Sender<DecodedFrame>,
        mpsc::Receiver<DecodedFrame>,
    );

    fn make_gate(initial: GateState, cancel: CancellationToken) -> Wired {
        let (handle, rx) = GateHandle::new(initial);
        let mut gate = FlowGate::new(rx, cancel, Arc::new(PipelineHealth::new()));
        let (tx, input) = mpsc::channel(4);
        gate.set_input(input);
        let out = gate.take_output(1);
        (gate, handle, tx, out)
    }

    #[tokio::test]
    async fn test_closed_gate_delivers_latest_on_open() {
        let ledger = FrameLedger::new();
        let (mut gate, handle, tx, mut out) = make_gate(GateState::Closed, CancellationToken::new());
        let task = tokio::spawn(async move { gate.run().await });

        for ts in [0, 40, 80] {
            tx.send(frame(&ledger, ts)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(out.try_recv().is_err());

        handle.open();
        let first = out.recv().await.unwrap();
        assert_eq!(first.timestamp().micros, 80);
        drop(first);

        tx.send(frame(&ledger, 120)).await.unwrap();
        assert_eq!(out.recv().await.unwrap().timestamp().micros, 120);

        drop(tx);
        assert!(out.recv().await.is_none());
        task.await.unwrap().unwrap();
        assert_eq!(ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_held_frame_waits_for_open_at_end() {
        let ledger = FrameLedger::new();
        let (mut gate, handle, tx, mut out) = make_gate(GateState::Closed, CancellationToken::new());
        let task = tokio::spawn(async move { gate.run().await });

        tx.send(frame(&ledger, 0)).await.unwrap();
        drop(tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        handle.open();
        assert_eq!(out.recv().await.unwrap().timestamp().micros, 0);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_releases_held_frame() {
        let ledger = FrameLedger::new();
        let cancel = CancellationToken::new();
        let (mut gate, _handle, tx, _out) = make_gate(GateState::Closed, cancel.clone());
        let task = tokio::spawn(async move { gate.run().await });

        tx.send(frame(&ledger, 0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ledger.outstanding(), 1);

        cancel.cancel();
        assert!(task.await.unwrap().unwrap_err().is_cancellation());
        assert_eq!(ledger.outstanding(), 0);
    }
}
