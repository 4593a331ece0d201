//! Tracked upload/analysis job model
//!
//! A `TrackedJob` is created when the user selects a file and lives until
//! explicit dismissal. Status moves forward only; the three terminal states
//! absorb everything that arrives after them, so a late `job_complete` for a
//! cancelled job is a no-op rather than a resurrection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a tracked job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Uploading,
    Analyzing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Active jobs occupy an upload-queue slot
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Uploading | JobStatus::Analyzing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Uploading => write!(f, "uploading"),
            JobStatus::Analyzing => write!(f, "analyzing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Reference to a local file queued for upload
///
/// The queue only needs enough to submit the multipart request and render
/// the job card; it never reads file contents itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub size_bytes: u64,
    pub content_type: String,
}

/// Analysis progress as reported by the push channel
///
/// Overwritten wholesale on each inbound progress event. Absent wire fields
/// get documented defaults (percentage 0, stage "Processing") rather than
/// propagating missing values into the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// 0-100
    pub percentage: u8,
    pub current_stage: String,
    pub current_activity: String,
    pub processing_rate: String,
    pub estimated_time_remaining_secs: u64,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            percentage: 0,
            current_stage: "Processing".to_string(),
            current_activity: "Processing".to_string(),
            processing_rate: String::new(),
            estimated_time_remaining_secs: 0,
        }
    }
}

/// One upload + analysis job as tracked by the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedJob {
    /// Local identifier, assigned at enqueue time
    pub id: Uuid,
    pub file: FileRef,
    /// Server-side job id, known once the upload has been accepted
    pub job_id: Option<String>,
    /// 0-100
    pub upload_progress: u8,
    pub analysis_progress: Option<ProgressSnapshot>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrackedJob {
    pub fn new(file: FileRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            job_id: None,
            upload_progress: 0,
            analysis_progress: None,
            status: JobStatus::Pending,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Apply a status transition, enforcing terminal-state absorption.
    ///
    /// Returns true if the transition was applied. Late events for jobs that
    /// already reached a terminal state are dropped here, in one place,
    /// instead of being guarded at every call site.
    pub fn transition(&mut self, status: JobStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }
}
