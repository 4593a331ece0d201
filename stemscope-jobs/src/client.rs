//! HTTP client for the analysis API
//!
//! One retry policy for every call: network errors, 5xx and 408 retry with
//! jittered exponential backoff, 429 honors Retry-After, and a 401 triggers
//! at most one token refresh per request before giving up. Everything else
//! fails straight through.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use serde::Deserialize;
use stemscope_common::jobs::FileRef;
use stemscope_common::{Error, Result};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::backoff::retry_delay;

/// Total attempts per logical request, including the first
pub const MAX_ATTEMPTS: u32 = 4;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Source of fresh auth tokens, consulted on a 401
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn refresh(&self) -> Result<String>;
}

/// Server response to an accepted upload
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub job_id: String,
}

/// Snapshot of a job as reported by the status poll endpoint
#[derive(Debug, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Retry-After is either delay-seconds or an HTTP date; only the seconds
/// form is supported, anything else falls back to the attempt's backoff.
fn parse_retry_after(value: Option<&str>, attempt: u32) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| retry_delay(attempt))
}

/// What the retry policy inspects from a completed HTTP exchange
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport seam under the retry policy
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<RawResponse>;
}

struct ReqwestSend;

#[async_trait]
impl HttpSend for ReqwestSend {
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<RawResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?
            .to_vec();
        Ok(RawResponse { status, retry_after, body })
    }
}

/// Analysis API client
pub struct ApiClient {
    http: reqwest::Client,
    sender: Arc<dyn HttpSend>,
    base_url: String,
    token: RwLock<Option<String>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            sender: Arc::new(ReqwestSend),
            base_url: base_url.into(),
            token: RwLock::new(token),
            token_provider: None,
        }
    }

    /// Swap the transport under the retry policy, for tests and proxies.
    pub fn with_sender(mut self, sender: Arc<dyn HttpSend>) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run `build` through the shared retry policy.
    ///
    /// `build` constructs a fresh request per attempt, so streamed bodies are
    /// re-created rather than replayed.
    async fn execute_with_retry<F>(&self, build: F) -> Result<RawResponse>
    where
        F: Fn(&reqwest::Client) -> Result<reqwest::RequestBuilder>,
    {
        let mut refreshed = false;
        let mut last_error = Error::Internal("request never attempted".to_string());

        for attempt in 0..MAX_ATTEMPTS {
            let mut request = build(&self.http)?;
            if let Some(token) = self.token.read().await.clone() {
                request = request.bearer_auth(token);
            }

            match self.sender.send(request).await {
                Ok(response) => {
                    if response.is_success() {
                        return Ok(response);
                    }

                    if response.status == 401 && !refreshed {
                        let Some(provider) = &self.token_provider else {
                            return Err(Error::Auth("unauthorized and no token provider".into()));
                        };
                        if attempt + 1 >= MAX_ATTEMPTS {
                            return Err(Error::Auth(
                                "unauthorized with no attempts remaining".into(),
                            ));
                        }
                        info!("Got 401, refreshing auth token");
                        let fresh = provider.refresh().await?;
                        *self.token.write().await = Some(fresh);
                        refreshed = true;
                        continue;
                    }
                    if response.status == 401 {
                        return Err(Error::Auth("unauthorized after token refresh".into()));
                    }

                    if response.status == 429 {
                        if attempt + 1 >= MAX_ATTEMPTS {
                            return Err(Error::RateLimited { attempts: attempt + 1 });
                        }
                        let wait = parse_retry_after(response.retry_after.as_deref(), attempt);
                        warn!(wait_ms = wait.as_millis() as u64, "Rate limited, backing off");
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    let err = Error::Http {
                        status: response.status,
                        message: String::from_utf8_lossy(&response.body).into_owned(),
                    };
                    if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS {
                        let wait = retry_delay(attempt);
                        warn!(status = response.status, wait_ms = wait.as_millis() as u64,
                            "Retryable HTTP error");
                        tokio::time::sleep(wait).await;
                        last_error = err;
                        continue;
                    }
                    return Err(err);
                }
                Err(err) => {
                    if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS {
                        let wait = retry_delay(attempt);
                        warn!(error = %err, wait_ms = wait.as_millis() as u64,
                            "Transport error, retrying");
                        tokio::time::sleep(wait).await;
                        last_error = err;
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(last_error)
    }

    /// Current status of a server-side job, for reconcile-after-reconnect.
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatusResponse> {
        let url = format!("{}/jobs/{}/status", self.base_url, job_id);
        let response = self.execute_with_retry(|http| Ok(http.get(&url))).await?;
        serde_json::from_slice(&response.body).map_err(|e| Error::Transport(e.to_string()))
    }

    /// Full feature payload of a completed job.
    pub async fn get_job_results(&self, job_id: &str) -> Result<serde_json::Value> {
        let url = format!("{}/jobs/{}/results", self.base_url, job_id);
        let response = self.execute_with_retry(|http| Ok(http.get(&url))).await?;
        serde_json::from_slice(&response.body).map_err(|e| Error::Transport(e.to_string()))
    }
}

/// Upload capability used by the queue
///
/// Byte progress flows through the channel as 0-100 percentages; the queue
/// bridges it into tracker updates. Returns the server-assigned job id.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: &FileRef, progress: mpsc::UnboundedSender<u8>) -> Result<String>;
}

/// Multipart streaming uploader
///
/// Streams file bytes from `root/<name>` in chunks, reporting percentage as
/// chunks are handed to the transport. The whole request goes through the
/// client's retry policy; every attempt reopens the file.
pub struct HttpUploader {
    api: Arc<ApiClient>,
    root: PathBuf,
}

impl HttpUploader {
    pub fn new(api: Arc<ApiClient>, root: impl Into<PathBuf>) -> Self {
        Self { api, root: root.into() }
    }

    fn file_part(
        &self,
        file: &FileRef,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<reqwest::multipart::Part> {
        let path = self.root.join(&file.name);
        let total = file.size_bytes.max(1);

        let stream = try_stream! {
            let mut reader = tokio::fs::File::open(&path).await?;
            let mut sent = 0u64;
            loop {
                let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                buf.truncate(n);
                sent += n as u64;
                let pct = ((sent as f64 / total as f64) * 100.0).round().min(100.0) as u8;
                let _ = progress.send(pct);
                yield buf;
            }
        };
        let stream: std::pin::Pin<
            Box<dyn futures::Stream<Item = std::io::Result<Vec<u8>>> + Send>,
        > = Box::pin(stream);

        reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
            .file_name(file.name.clone())
            .mime_str(&file.content_type)
            .map_err(|e| Error::InvalidInput(format!("bad content type: {e}")))
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, file: &FileRef, progress: mpsc::UnboundedSender<u8>) -> Result<String> {
        let url = format!("{}/upload", self.api.base_url());
        debug!(file = %file.name, size = file.size_bytes, "Starting upload");

        let response = self
            .api
            .execute_with_retry(|http| {
                // Rebuilt per attempt so the body stream starts over
                let part = self.file_part(file, progress.clone())?;
                Ok(http
                    .post(&url)
                    .multipart(reqwest::multipart::Form::new().part("file", part)))
            })
            .await?;

        let accepted: UploadResponse = serde_json::from_slice(&response.body)
            .map_err(|e| Error::Transport(e.to_string()))?;
        info!(file = %file.name, job_id = %accepted.job_id, "Upload accepted");
        Ok(accepted.job_id)
    }
}
