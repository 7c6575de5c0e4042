//! Byte-range sources and the fetch stage
//!
//! A `RangeSource` answers "give me up to N bytes starting at offset X" for one
//! resource. `RangeFetcher` turns that into a sequential byte stream, issuing
//! one request per chunk just before the previous chunk is consumed.

mod fetcher;
mod file;
mod http;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{PipelineError, PipelineResult};

pub use fetcher::RangeFetcher;
pub use file::FileRangeSource;
pub use http::HttpRangeSource;
pub use memory::MemoryRangeSource;

/// One answered range request.
#[derive(Debug, Clone)]
pub struct RangeChunk {
    /// Bytes starting at the requested offset; shorter than requested only at
    /// the end of the resource
    pub data: Bytes,
    /// Full resource length, when the source knows it
    pub total_len: Option<u64>,
}

#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Fetch up to `len` bytes starting at `start`.
    async fn fetch_range(&self, start: u64, len: u64) -> PipelineResult<RangeChunk>;

    /// Short description for logging.
    fn describe(&self) -> String;
}

/// Opens a source for a URI. One call per pipeline instance.
pub type SourceFactory = Arc<dyn Fn(&str) -> PipelineResult<Arc<dyn RangeSource>> + Send + Sync>;

/// Pick a source by URI scheme: `http(s)://` goes over the network, `file://`
/// and bare paths are read from disk.
pub fn open_source(uri: &str) -> PipelineResult<Arc<dyn RangeSource>> {
    match url::Url::parse(uri) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            Ok(Arc::new(HttpRangeSource::new(url)?))
        }
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| PipelineError::transport(format!("invalid file uri: {}", uri)))?;
            Ok(Arc::new(FileRangeSource::new(path)))
        }
        // single letters are Windows drive prefixes, not schemes
        Ok(url) if url.scheme().len() > 1 => Err(PipelineError::transport(format!(
            "unsupported uri scheme: {}",
            url.scheme()
        ))),
        _ => Ok(Arc::new(FileRangeSource::new(uri))),
    }
}

pub fn default_source_factory() -> SourceFactory {
    Arc::new(open_source)
}
