use crate::assets::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_CHUNK_SIZE, DEFAULT_LOOKAHEAD, DEFAULT_MAX_ELEMENT_SIZE,
};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables shared by every pipeline instance a worker starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Bytes requested per ranged fetch.
    pub chunk_size: u64,
    /// Depth of the decoder's presentation-order queue.
    pub lookahead: usize,
    /// Capacity of the bounded channels between stages.
    pub channel_capacity: usize,
    /// Largest element the demuxer buffers whole before giving up.
    pub max_element_size: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            lookahead: DEFAULT_LOOKAHEAD,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_element_size: DEFAULT_MAX_ELEMENT_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Load a config from a JSON file; missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        let config: PipelineConfig = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Config("chunkSize must be positive".into()));
        }
        if self.lookahead == 0 {
            return Err(PipelineError::Config("lookahead must be positive".into()));
        }
        if self.channel_capacity == 0 {
            return Err(PipelineError::Config("channelCapacity must be positive".into()));
        }
        Ok(())
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
