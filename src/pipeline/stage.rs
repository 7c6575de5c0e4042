//! Pipeline stage traits and the generic stage runner
//!
//! `PipelineStage` is the task-level interface: something that runs until its
//! input ends, it is cancelled, or it fails. `Stage` is the per-item transform
//! interface (`push`/`flush`/`close`); `StageRunner` adapts any `Stage` into a
//! `PipelineStage` by pumping it between two bounded channels.

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};

/// Trait for pipeline stages that run as their own task
#[async_trait]
pub trait PipelineStage: Send {
    /// Run the stage, processing data until input ends or cancellation
    async fn run(&mut self) -> PipelineResult<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;
}

/// A unidirectional transform step.
///
/// Outputs are appended to `out`; the runner forwards them one at a time and
/// waits on the downstream channel before pulling more input.
pub trait Stage: Send {
    type In: Send + 'static;
    type Out: Send + 'static;

    fn name(&self) -> &'static str;

    /// Consume one input item.
    fn push(&mut self, input: Self::In, out: &mut Vec<Self::Out>) -> PipelineResult<()>;

    /// Upstream ended normally; emit anything still held.
    fn flush(&mut self, _out: &mut Vec<Self::Out>) -> PipelineResult<()> {
        Ok(())
    }

    /// Release held resources. Called exactly once, on every exit path.
    fn close(&mut self) {}
}

/// Send `item` downstream unless the pipeline is cancelled first.
///
/// A dropped receiver means downstream already stopped; that is reported as
/// cancellation since the stage that stopped owns the real error.
pub async fn send_or_cancel<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    cancel: &CancellationToken,
) -> PipelineResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        sent = tx.send(item) => sent.map_err(|_| PipelineError::Cancelled),
    }
}

/// Drives a `Stage` between an input and an output channel.
pub struct StageRunner<S: Stage> {
    stage: S,
    cancel: CancellationToken,
    input_rx: Option<mpsc::Receiver<S::In>>,
    output_tx: Option<mpsc::Sender<S::Out>>,
}

impl<S: Stage> StageRunner<S> {
    pub fn new(stage: S, cancel: CancellationToken) -> Self {
        Self {
            stage,
            cancel,
            input_rx: None,
            output_tx: None,
        }
    }

    /// Set the input channel
    pub fn set_input(&mut self, rx: mpsc::Receiver<S::In>) {
        self.input_rx = Some(rx);
    }

    /// Get the output channel
    pub fn take_output(&mut self, capacity: usize) -> mpsc::Receiver<S::Out> {
        let (tx, rx) = mpsc::channel::<S::Out>(capacity);
        self.output_tx = Some(tx);
        rx
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    async fn pump(
        &mut self,
        input_rx: &mut mpsc::Receiver<S::In>,
        output_tx: &mpsc::Sender<S::Out>,
    ) -> PipelineResult<(u64, u64)> {
        let mut pending = Vec::new();
        let (mut consumed, mut produced) = (0u64, 0u64);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                next = input_rx.recv() => next,
            };

            let ended = match next {
                Some(item) => {
                    consumed += 1;
                    self.stage.push(item, &mut pending)?;
                    false
                }
                None => {
                    self.stage.flush(&mut pending)?;
                    true
                }
            };

            for item in pending.drain(..) {
                produced += 1;
                send_or_cancel(output_tx, item, &self.cancel).await?;
            }

            if ended {
                return Ok((consumed, produced));
            }
        }
    }
}

#[async_trait]
impl<S: Stage> PipelineStage for StageRunner<S> {
    async fn run(&mut self) -> PipelineResult<()> {
        let name = self.stage.name();
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| PipelineError::Config(format!("{}: no input channel", name)))?;
        let output_tx = self
            .output_tx
            .take()
            .ok_or_else(|| PipelineError::Config(format!("{}: no output channel", name)))?;

        info!("{}: started", name);
        let result = self.pump(&mut input_rx, &output_tx).await;
        self.stage.close();

        match &result {
            Ok((consumed, produced)) => {
                info!("{}: finished ({} in, {} out)", name, consumed, produced)
            }
            Err(e) if e.is_cancellation() => info!("{}: cancelled", name),
            Err(e) => error!("{}: {}", name, e),
        }
        result.map(|_| ())
    }

    fn name(&self) -> &'static str {
        self.stage.name()
    }
}
