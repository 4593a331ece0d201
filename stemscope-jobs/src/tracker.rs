//! Shared job tracking state
//!
//! One tracker per dashboard session. It owns the map of tracked jobs, the
//! reverse index from server-side job id to local id, and the translation of
//! inbound push messages into status transitions and bus events. Terminal
//! states absorb late messages inside `TrackedJob::transition`; the tracker
//! just drops whatever that rejects.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use stemscope_common::events::{EventBus, ScopeEvent};
use stemscope_common::jobs::{FileRef, JobStatus, TrackedJob};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::push::{JobMessage, PushMessage};

/// Tracked-job store shared across queue, push consumer and UI
#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<Uuid, TrackedJob>>>,
    by_server_id: Arc<RwLock<HashMap<String, Uuid>>>,
    bus: EventBus,
}

impl JobTracker {
    pub fn new(bus: EventBus) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            by_server_id: Arc::new(RwLock::new(HashMap::new())),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Track a new pending job for `file`. Returns its local id.
    pub async fn create(&self, file: FileRef) -> Uuid {
        let job = TrackedJob::new(file);
        let id = job.id;
        self.jobs.write().await.insert(id, job);
        info!(%id, "Tracking new job");
        id
    }

    pub async fn get(&self, id: Uuid) -> Option<TrackedJob> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// All jobs, newest first.
    pub async fn jobs(&self) -> Vec<TrackedJob> {
        let mut jobs: Vec<TrackedJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    pub async fn get_by_server_id(&self, server_id: &str) -> Option<TrackedJob> {
        let id = self.by_server_id.read().await.get(server_id).copied()?;
        self.get(id).await
    }

    /// Jobs currently in `status`, newest first.
    pub async fn jobs_with_status(&self, status: JobStatus) -> Vec<TrackedJob> {
        let mut jobs: Vec<TrackedJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.status.is_active())
            .count()
    }

    /// Apply a status transition and broadcast it.
    ///
    /// Returns false when the job is unknown or already terminal.
    pub async fn set_status(&self, id: Uuid, status: JobStatus) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            warn!(%id, "Status update for unknown job");
            return false;
        };
        let old_status = job.status;
        if !job.transition(status) {
            debug!(%id, %status, "Dropping transition for terminal job");
            return false;
        }
        drop(jobs);

        self.bus.emit_lossy(ScopeEvent::JobStatusChanged {
            job: id,
            old_status,
            new_status: status,
            timestamp: Utc::now(),
        });
        true
    }

    /// Record the server-accepted job id once the upload response arrives.
    pub async fn set_server_job_id(&self, id: Uuid, server_id: &str) {
        if let Some(job) = self.jobs.write().await.get_mut(&id) {
            job.job_id = Some(server_id.to_string());
        }
        self.by_server_id
            .write()
            .await
            .insert(server_id.to_string(), id);
    }

    pub async fn set_upload_progress(&self, id: Uuid, percentage: u8) {
        let percentage = percentage.min(100);
        if let Some(job) = self.jobs.write().await.get_mut(&id) {
            if job.status.is_terminal() {
                return;
            }
            job.upload_progress = percentage;
        } else {
            return;
        }
        self.bus.emit_lossy(ScopeEvent::UploadProgress {
            job: id,
            percentage,
            timestamp: Utc::now(),
        });
    }

    /// Record a failure and broadcast it.
    pub async fn fail(&self, id: Uuid, error: &str) {
        {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(&id) else { return };
            if !job.transition(JobStatus::Failed) {
                return;
            }
            job.error = Some(error.to_string());
        }
        self.bus.emit_lossy(ScopeEvent::JobFailed {
            job: id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// User-initiated cancellation.
    pub async fn cancel(&self, id: Uuid) -> bool {
        self.set_status(id, JobStatus::Cancelled).await
    }

    /// Remove a job card. Only terminal jobs can be dismissed.
    pub async fn dismiss(&self, id: Uuid) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get(&id) else { return false };
        if !job.status.is_terminal() {
            return false;
        }
        let removed = jobs.remove(&id);
        drop(jobs);
        if let Some(job) = removed {
            if let Some(server_id) = &job.job_id {
                self.by_server_id.write().await.remove(server_id);
            }
        }
        true
    }

    /// Apply one inbound push message addressed by server job id.
    pub async fn apply_push_message(&self, server_id: &str, message: PushMessage) {
        let Some(id) = self.by_server_id.read().await.get(server_id).copied() else {
            warn!(server_id, "Push message for unknown job");
            return;
        };

        match message {
            PushMessage::Progress { .. } => {
                let snapshot = match message.as_snapshot() {
                    Some(s) => s,
                    None => return,
                };
                {
                    let mut jobs = self.jobs.write().await;
                    let Some(job) = jobs.get_mut(&id) else { return };
                    if job.status.is_terminal() {
                        debug!(%id, "Dropping progress for terminal job");
                        return;
                    }
                    job.analysis_progress = Some(snapshot.clone());
                }
                self.bus.emit_lossy(ScopeEvent::AnalysisProgress {
                    job: id,
                    snapshot,
                    timestamp: Utc::now(),
                });
            }
            PushMessage::JobComplete => {
                if self.set_status(id, JobStatus::Completed).await {
                    self.bus.emit_lossy(ScopeEvent::JobCompleted {
                        job: id,
                        job_id: server_id.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
            PushMessage::Error { message } => {
                self.fail(id, &message).await;
            }
        }
    }

    /// Consume push messages until the channel closes.
    ///
    /// Spawned once per session, next to the `JobSubscriber` that feeds the
    /// sender side.
    pub async fn run_push_consumer(&self, mut receiver: mpsc::UnboundedReceiver<JobMessage>) {
        while let Some((server_id, message)) = receiver.recv().await {
            self.apply_push_message(&server_id, message).await;
        }
        debug!("Push message channel closed");
    }
}
