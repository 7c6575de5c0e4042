use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{RangeChunk, RangeSource};
use crate::error::PipelineResult;

/// Ranged reads from a local file. The file is reopened per request so the
/// source holds no descriptor between chunks.
#[derive(Debug, Clone)]
pub struct FileRangeSource {
    path: PathBuf,
}

impl FileRangeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RangeSource for FileRangeSource {
    async fn fetch_range(&self, start: u64, len: u64) -> PipelineResult<RangeChunk> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let total = file.metadata().await?.len();
        if start >= total {
            return Ok(RangeChunk {
                data: Bytes::new(),
                total_len: Some(total),
            });
        }

        let want = len.min(total - start) as usize;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buf = BytesMut::zeroed(want);
        let mut filled = 0;
        while filled < want {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        Ok(RangeChunk {
            data: buf.freeze(),
            total_len: Some(total),
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
