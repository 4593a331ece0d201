//! Push channel for per-job analysis updates
//!
//! Each active server-side job gets its own push connection. The transport
//! is pluggable: production uses SSE over HTTP, tests inject scripted
//! streams. The subscriber arena owns one task per job, reconnecting with
//! doubling backoff until the job reaches a terminal message.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use stemscope_common::events::{EventBus, ScopeEvent};
use stemscope_common::jobs::ProgressSnapshot;
use stemscope_common::{Error, Result};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;

fn default_stage() -> String {
    "Processing".to_string()
}

/// One message from the analysis push channel
///
/// Unknown wire fields are ignored and absent ones take documented defaults,
/// so a newer server never breaks an older client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    Progress {
        #[serde(default)]
        percentage: u8,
        #[serde(default = "default_stage")]
        current_stage: String,
        #[serde(default = "default_stage")]
        current_activity: String,
        #[serde(default)]
        processing_rate: String,
        #[serde(default)]
        estimated_time_remaining_secs: u64,
    },
    JobComplete,
    Error {
        #[serde(default)]
        message: String,
    },
}

impl PushMessage {
    /// Terminal messages end the subscription; the channel for this job is
    /// torn down, never reconnected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PushMessage::JobComplete | PushMessage::Error { .. })
    }

    /// Progress payload as a snapshot, if this is a progress message.
    pub fn as_snapshot(&self) -> Option<ProgressSnapshot> {
        match self {
            PushMessage::Progress {
                percentage,
                current_stage,
                current_activity,
                processing_rate,
                estimated_time_remaining_secs,
            } => Some(ProgressSnapshot {
                percentage: (*percentage).min(100),
                current_stage: current_stage.clone(),
                current_activity: current_activity.clone(),
                processing_rate: processing_rate.clone(),
                estimated_time_remaining_secs: *estimated_time_remaining_secs,
            }),
            _ => None,
        }
    }
}

pub type PushStream = Pin<Box<dyn Stream<Item = Result<PushMessage>> + Send>>;

/// Connection factory for per-job push streams
///
/// A transport error from `connect` or mid-stream means the connection
/// dropped; the subscriber decides whether to reconnect. Malformed payloads
/// are the transport's problem: it logs and drops them without surfacing an
/// item, so one bad message never kills a healthy stream.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, job_id: &str) -> Result<PushStream>;
}

/// SSE push transport over HTTP
///
/// Connects to `{base_url}/jobs/{job_id}/events` and parses the `data:`
/// frames off the byte stream. The optional token rides in the query string
/// because the browser-equivalent EventSource cannot set headers, and the
/// server accepts the same form here.
pub struct SsePushTransport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl SsePushTransport {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }
}

#[async_trait]
impl PushTransport for SsePushTransport {
    async fn connect(&self, job_id: &str) -> Result<PushStream> {
        let url = format!("{}/jobs/{}/events", self.base_url, job_id);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.query(&[("token", token.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: format!("push channel connect failed for {url}"),
            });
        }

        debug!(job_id, "Push channel connected");
        let mut bytes = response.bytes_stream();
        let job = job_id.to_string();

        let stream = try_stream! {
            let mut buffer = String::new();
            let mut data = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| Error::Transport(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    if let Some(payload) = line.strip_prefix("data:") {
                        if !data.is_empty() {
                            data.push('\n');
                        }
                        data.push_str(payload.trim_start());
                    } else if line.is_empty() && !data.is_empty() {
                        // Blank line ends the event
                        let frame = std::mem::take(&mut data);
                        match serde_json::from_str::<PushMessage>(&frame) {
                            Ok(message) => yield message,
                            Err(e) => {
                                warn!(job_id = %job, error = %e, "Dropping unparseable push message");
                            }
                        }
                    }
                    // Comment and event-name lines are ignored
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Inbound message with the job it belongs to
pub type JobMessage = (String, PushMessage);

/// One push task per active job
///
/// `subscribe` spawns a task that connects, forwards messages to the
/// channel handed in at construction, and reconnects with doubling backoff
/// on disconnect. A terminal message or an explicit `unsubscribe` removes
/// the job from the arena; nothing is forwarded for it afterwards.
pub struct JobSubscriber {
    transport: Arc<dyn PushTransport>,
    bus: EventBus,
    outbound: mpsc::UnboundedSender<JobMessage>,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl JobSubscriber {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        bus: EventBus,
        outbound: mpsc::UnboundedSender<JobMessage>,
    ) -> Self {
        Self {
            transport,
            bus,
            outbound,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start (or restart) the push task for `job_id`.
    pub async fn subscribe(&self, job_id: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.remove(job_id) {
            old.abort();
        }

        let handle = tokio::spawn(run_job_channel(
            self.transport.clone(),
            self.bus.clone(),
            self.outbound.clone(),
            job_id.to_string(),
            self.tasks.clone(),
        ));
        tasks.insert(job_id.to_string(), handle);
        info!(job_id, "Subscribed to push channel");
    }

    /// Stop the push task for `job_id`, if any.
    pub async fn unsubscribe(&self, job_id: &str) {
        if let Some(handle) = self.tasks.lock().await.remove(job_id) {
            handle.abort();
            info!(job_id, "Unsubscribed from push channel");
        }
    }

    pub async fn active_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Abort every push task.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (job_id, handle) in tasks.drain() {
            handle.abort();
            debug!(job_id, "Aborted push channel task");
        }
    }
}

async fn run_job_channel(
    transport: Arc<dyn PushTransport>,
    bus: EventBus,
    outbound: mpsc::UnboundedSender<JobMessage>,
    job_id: String,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
) {
    let mut backoff = Backoff::new();
    loop {
        match transport.connect(&job_id).await {
            Ok(mut stream) => {
                backoff.reset();
                bus.emit_lossy(ScopeEvent::PushChannelUp {
                    job_id: job_id.clone(),
                    timestamp: Utc::now(),
                });

                while let Some(item) = stream.next().await {
                    match item {
                        Ok(message) => {
                            let terminal = message.is_terminal();
                            if outbound.send((job_id.clone(), message)).is_err() {
                                // Tracker is gone; nothing left to do
                                tasks.lock().await.remove(&job_id);
                                return;
                            }
                            if terminal {
                                debug!(job_id, "Terminal push message, tearing down channel");
                                tasks.lock().await.remove(&job_id);
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(job_id, error = %e, "Push stream error");
                            break;
                        }
                    }
                }
                // Stream ended without a terminal message; reconnect
            }
            Err(e) => {
                warn!(job_id, error = %e, "Push channel connect failed");
            }
        }

        let delay = backoff.next_delay();
        bus.emit_lossy(ScopeEvent::PushChannelDown {
            job_id: job_id.clone(),
            retry_in_ms: delay.as_millis() as u64,
            timestamp: Utc::now(),
        });
        tokio::time::sleep(delay).await;
    }
}
