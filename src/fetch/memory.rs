use async_trait::async_trait;
use bytes::Bytes;

use super::{RangeChunk, RangeSource};
use crate::error::PipelineResult;

/// A resource already held in memory.
#[derive(Debug, Clone)]
pub struct MemoryRangeSource {
    name: String,
    data: Bytes,
}

impl MemoryRangeSource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl RangeSource for MemoryRangeSource {
    async fn fetch_range(&self, start: u64, len: u64) -> PipelineResult<RangeChunk> {
        let total = self.data.len() as u64;
        let begin = start.min(total) as usize;
        let end = start.saturating_add(len).min(total) as usize;
        Ok(RangeChunk {
            data: self.data.slice(begin..end),
            total_len: Some(total),
        })
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}
