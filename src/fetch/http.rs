use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use url::Url;

use super::{RangeChunk, RangeSource};
use crate::assets::HTTP_USER_AGENT;
use crate::error::{PipelineError, PipelineResult};

/// Ranged `GET` requests against an HTTP(S) resource
#[derive(Clone, Debug)]
pub struct HttpRangeSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpRangeSource {
    pub fn new(url: Url) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(HTTP_USER_AGENT)
            .build()
            .map_err(|e| PipelineError::transport(e.to_string()))?;

        Ok(Self { client, url })
    }
}

/// Parse the total length out of `Content-Range: bytes a-b/total`.
fn parse_total(content_range: &str) -> Option<u64> {
    let (_, total) = content_range.rsplit_once('/')?;
    total.trim().parse().ok()
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn fetch_range(&self, start: u64, len: u64) -> PipelineResult<RangeChunk> {
        let end = start + len.saturating_sub(1);
        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await?;

        let status = response.status();
        let total_len = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_total);

        match status {
            StatusCode::PARTIAL_CONTENT => Ok(RangeChunk {
                data: response.bytes().await?,
                total_len,
            }),
            // server ignored the range and sent the whole body
            StatusCode::OK if start == 0 => {
                let data = response.bytes().await?;
                let total_len = Some(data.len() as u64);
                Ok(RangeChunk { data, total_len })
            }
            StatusCode::OK => Err(PipelineError::transport(format!(
                "{} does not support range requests",
                self.url
            ))),
            // asked past the end: nothing left
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(RangeChunk {
                data: bytes::Bytes::new(),
                total_len,
            }),
            _ => Err(PipelineError::transport(format!(
                "HTTP {} for URL: {}",
                status.as_u16(),
                self.url
            ))),
        }
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_total() {
        assert_eq!(parse_total("bytes 0-99/5000"), Some(5000));
        assert_eq!(parse_total("bytes */5000"), Some(5000));
        assert_eq!(parse_total("bytes 0-99/*"), None);
        assert_eq!(parse_total("garbage"), None);
    }
}
