//! HTTP client for the SWGTS API.
//!
//! The client never invents a wait interval: when the server defers a request
//! it sleeps exactly the hinted time and retries the identical request.

use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use swgts_core::{batch_bases, PairGroup};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::chunker::{halve, Chunker};
use crate::error::{ClientError, Result};
use crate::fastq::PairedReads;

/// `GET /server-status`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerStatus {
    pub version: String,
    #[serde(default)]
    pub commit: Option<String>,
    pub uptime: f64,
    #[serde(rename = "maximum pending bytes")]
    pub max_pending_bytes: u64,
    #[serde(rename = "processed bases", default)]
    pub processed_bases: u64,
}

/// Server answer to one batch
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitReply {
    Accepted { processed_reads: u64, pending_bytes: u64 },
    /// Buffer full, send the same batch again after the wait
    Deferred { retry_after: Duration, processed_reads: u64 },
    /// Batch is larger than the server buffer
    TooLarge { retry_after: Duration },
}

/// Result of a successful close
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloseSummary {
    /// Identifier lines of the kept records
    pub saved: Vec<String>,
    /// Pair groups the server examined
    pub total: u64,
}

/// Counters from transmitting one upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmitStats {
    pub chunks: usize,
    pub groups: usize,
    pub deferrals: usize,
    pub splits: usize,
    pub processed_reads: u64,
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Bases per transmission, defaults to a tenth of the server buffer
    pub chunk_bases: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub context: Uuid,
    pub files: Vec<PathBuf>,
    pub chunk_bases: u64,
    pub transmit: TransmitStats,
    pub summary: CloseSummary,
}

fn parse_wait(raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| ClientError::malformed(format!("invalid Retry-After {:?}", raw)))
}

fn header_wait(response: &Response) -> Result<Duration> {
    let value = response
        .headers()
        .get(RETRY_AFTER)
        .ok_or(ClientError::MissingRetryAfter)?;
    let raw = value
        .to_str()
        .map_err(|_| ClientError::malformed("non-ASCII Retry-After header"))?;
    parse_wait(raw)
}

fn count(body: &Value, field: &str) -> Result<u64> {
    body.get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| ClientError::malformed(format!("missing {:?}", field)))
}

async fn server_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text);
    ClientError::Server { status, message }
}

#[derive(Clone)]
pub struct SwgtsClient {
    http: Client,
    base_url: String,
    retries: Option<usize>,
}

impl SwgtsClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            http: Client::builder().build()?,
            base_url,
            retries: None,
        })
    }

    /// Give up once more than `retries` batches were deferred; `None` retries forever
    pub fn with_retries(mut self, retries: Option<usize>) -> Self {
        self.retries = retries;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn server_status(&self) -> Result<ServerStatus> {
        let response = self.http.get(self.url("/server-status")).send().await?;
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::malformed(e.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn create_context(&self, filenames: &[String]) -> Result<Uuid> {
        let response = self
            .http
            .post(self.url("/context/create"))
            .json(&json!({ "filenames": filenames }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        let body: Value = response.json().await?;
        body.get("context")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| ClientError::malformed("missing or invalid context id"))
    }

    /// Send one batch and classify the answer
    pub async fn submit_chunk(&self, context: Uuid, chunk: &[PairGroup]) -> Result<SubmitReply> {
        let response = self
            .http
            .post(self.url(&format!("/context/{}/reads", context)))
            .json(chunk)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: Value = response.json().await?;
                Ok(SubmitReply::Accepted {
                    processed_reads: count(&body, "processed reads")?,
                    pending_bytes: count(&body, "pending bytes")?,
                })
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let retry_after = header_wait(&response)?;
                let body: Value = response.json().await?;
                Ok(SubmitReply::Deferred {
                    retry_after,
                    processed_reads: count(&body, "processed reads")?,
                })
            }
            StatusCode::PAYLOAD_TOO_LARGE => Ok(SubmitReply::TooLarge {
                retry_after: header_wait(&response)?,
            }),
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(context)),
            _ => Err(server_error(response).await),
        }
    }

    /// Send every chunk, honoring deferrals and splitting chunks the server refuses
    #[instrument(skip(self, chunks))]
    pub async fn transmit<I>(&self, context: Uuid, chunks: I) -> Result<TransmitStats>
    where
        I: Iterator<Item = Result<Vec<PairGroup>>>,
    {
        let mut stats = TransmitStats::default();
        let mut chunks = chunks;
        let mut split: VecDeque<Vec<PairGroup>> = VecDeque::new();

        loop {
            let chunk = match split.pop_front() {
                Some(chunk) => chunk,
                None => match chunks.next() {
                    Some(chunk) => chunk?,
                    None => break,
                },
            };

            loop {
                if let Some(limit) = self.retries {
                    if stats.deferrals > limit {
                        return Err(ClientError::TooManyRetries(stats.deferrals));
                    }
                }

                match self.submit_chunk(context, &chunk).await? {
                    SubmitReply::Accepted {
                        processed_reads,
                        pending_bytes,
                    } => {
                        stats.chunks += 1;
                        stats.groups += chunk.len();
                        stats.processed_reads = processed_reads;
                        debug!(groups = chunk.len(), processed_reads, pending_bytes, "Chunk accepted");
                        break;
                    }
                    SubmitReply::Deferred {
                        retry_after,
                        processed_reads,
                    } => {
                        stats.deferrals += 1;
                        stats.processed_reads = processed_reads;
                        debug!(wait = ?retry_after, processed_reads, "Server buffer full");
                        tokio::time::sleep(retry_after).await;
                    }
                    SubmitReply::TooLarge { .. } => {
                        let bases = batch_bases(&chunk);
                        let (front, back) = halve(chunk)
                            .ok_or(ClientError::UnsplittableChunk { bases })?;
                        warn!(bases, "Chunk too large for the server, splitting");
                        stats.splits += 1;
                        split.push_front(back);
                        split.push_front(front);
                        break;
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Close a context, polling while reads are still being filtered
    #[instrument(skip(self))]
    pub async fn close(&self, context: Uuid) -> Result<CloseSummary> {
        let url = self.url(&format!("/context/{}/close", context));
        loop {
            let response = self.http.post(&url).send().await?;
            match response.status() {
                StatusCode::OK => {
                    return response
                        .json()
                        .await
                        .map_err(|e| ClientError::malformed(e.to_string()));
                }
                StatusCode::SERVICE_UNAVAILABLE => {
                    let body: Value = response.json().await?;
                    let wait = match body.get("Retry-After") {
                        Some(Value::Number(n)) => parse_wait(&n.to_string())?,
                        Some(Value::String(s)) => parse_wait(s)?,
                        _ => return Err(ClientError::MissingRetryAfter),
                    };
                    debug!(?wait, "Reads still being filtered");
                    tokio::time::sleep(wait).await;
                }
                StatusCode::NOT_FOUND => return Err(ClientError::NotFound(context)),
                _ => return Err(server_error(response).await),
            }
        }
    }

    /// Upload paired FASTQ files and close the context
    pub async fn upload<P: AsRef<Path>>(&self, files: &[P], options: &UploadOptions) -> Result<UploadReport> {
        let files: Vec<PathBuf> = files.iter().map(|f| f.as_ref().to_path_buf()).collect();
        let filenames: Vec<String> = files
            .iter()
            .map(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string_lossy().into_owned())
            })
            .collect();

        let reads = PairedReads::open(&files)?;
        let status = self.server_status().await?;
        let chunk_bases = options
            .chunk_bases
            .unwrap_or(status.max_pending_bytes / 10)
            .max(1);

        let context = self.create_context(&filenames).await?;
        info!(
            context = %context,
            files = ?filenames,
            max_pending_bytes = status.max_pending_bytes,
            chunk_bases,
            "Uploading"
        );

        let transmit = self
            .transmit(context, Chunker::new(reads, chunk_bases))
            .await?;
        info!(
            context = %context,
            chunks = transmit.chunks,
            deferrals = transmit.deferrals,
            "Transmission done"
        );

        let summary = self.close(context).await?;
        info!(
            context = %context,
            saved = summary.saved.len(),
            total = summary.total,
            "Context closed"
        );

        Ok(UploadReport {
            context,
            files,
            chunk_bases,
            transmit,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wait() {
        assert_eq!(parse_wait("1.5").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_wait(" 0 ").unwrap(), Duration::ZERO);
        assert!(parse_wait("soon").is_err());
        assert!(parse_wait("-1").is_err());
    }

    #[test]
    fn test_server_status_keys() {
        let status: ServerStatus = serde_json::from_value(json!({
            "version": "0.1.0",
            "uptime": 3.5,
            "maximum pending bytes": 300000,
        }))
        .unwrap();
        assert_eq!(status.max_pending_bytes, 300000);
        assert_eq!(status.processed_bases, 0);
        assert_eq!(status.commit, None);
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = SwgtsClient::new("http://localhost:8000/").unwrap();
        assert_eq!(client.url("/live"), "http://localhost:8000/live");
    }
}
