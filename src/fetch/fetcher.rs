//! Fetch stage
//!
//! Reads a resource front to back in fixed-size ranges. The next range is only
//! requested once the previous chunk has been taken by the demuxer, so at most
//! one chunk is buffered and one request is in flight.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::RangeSource;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{PipelineHealth, PipelineStage, send_or_cancel};

pub struct RangeFetcher {
    source: Arc<dyn RangeSource>,
    chunk_size: u64,
    cancel: CancellationToken,
    health: Arc<PipelineHealth>,
    output_tx: Option<mpsc::Sender<Bytes>>,
}

impl RangeFetcher {
    pub fn new(
        source: Arc<dyn RangeSource>,
        chunk_size: u64,
        cancel: CancellationToken,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            source,
            chunk_size,
            cancel,
            health,
            output_tx: None,
        }
    }

    /// Get the byte stream. Capacity 1 keeps fetching just-in-time.
    pub fn take_output(&mut self) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        self.output_tx = Some(tx);
        rx
    }

    async fn fetch_all(&self, output_tx: &mpsc::Sender<Bytes>) -> PipelineResult<u64> {
        let mut offset = 0u64;
        loop {
            // dropping the request future aborts it
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                chunk = self.source.fetch_range(offset, self.chunk_size) => chunk?,
            };

            let len = chunk.data.len() as u64;
            if len == 0 {
                break;
            }
            offset += len;
            self.health.record_bytes(len as usize);
            debug!("RangeFetcher: {} bytes (offset {})", len, offset);

            send_or_cancel(output_tx, chunk.data, &self.cancel).await?;

            let at_end = chunk.total_len.is_some_and(|total| offset >= total);
            if at_end || len < self.chunk_size {
                break;
            }
        }
        Ok(offset)
    }
}

#[async_trait]
impl PipelineStage for RangeFetcher {
    async fn run(&mut self) -> PipelineResult<()> {
        let output_tx = self
            .output_tx
            .take()
            .ok_or_else(|| PipelineError::Config("RangeFetcher: no output channel".into()))?;

        info!("RangeFetcher: started ({})", self.source.describe());
        let result = self.fetch_all(&output_tx).await;
        match &result {
            Ok(total) => info!("RangeFetcher: finished ({} bytes)", total),
            Err(e) if e.is_cancellation() => info!("RangeFetcher: cancelled"),
            Err(e) => error!("RangeFetcher: {}", e),
        }
        result.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "RangeFetcher"
    }
}
