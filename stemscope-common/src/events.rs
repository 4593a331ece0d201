//! Event types and EventBus for the StemScope client core
//!
//! Everything that changes job state flows through one broadcast bus: the
//! upload queue reacts to status changes to admit more work, the dashboard
//! subscribes for rendering, and tests subscribe to assert ordering. Events
//! are serializable so they can be mirrored onto a debug channel unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::jobs::{JobStatus, ProgressSnapshot};

/// StemScope client events
///
/// Broadcast via [`EventBus`]. Each variant carries a timestamp so consumers
/// can order events from different subscriptions without a shared clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScopeEvent {
    /// A tracked job changed lifecycle state
    ///
    /// Triggers:
    /// - Upload queue: re-run the admission pass (a freed slot admits the
    ///   next pending job)
    /// - UI: update the job card
    JobStatusChanged {
        job: Uuid,
        old_status: JobStatus,
        new_status: JobStatus,
        timestamp: DateTime<Utc>,
    },

    /// Upload byte progress for a job currently in `uploading`
    UploadProgress {
        job: Uuid,
        /// 0-100, `round(loaded / total * 100)`
        percentage: u8,
        timestamp: DateTime<Utc>,
    },

    /// Analysis progress pushed by the server for a job in `analyzing`
    AnalysisProgress {
        job: Uuid,
        snapshot: ProgressSnapshot,
        timestamp: DateTime<Utc>,
    },

    /// A job reached `completed`
    JobCompleted {
        job: Uuid,
        /// Server-side job id, for fetching results
        job_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A job reached `failed`
    JobFailed {
        job: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Pending and active counts both reached zero
    ///
    /// Fired exactly once per drain; enqueueing new files re-arms it.
    QueueDrained {
        timestamp: DateTime<Utc>,
    },

    /// Push channel for a job lost its connection while the job was still
    /// active; a reconnect is scheduled
    PushChannelDown {
        job_id: String,
        /// Delay before the next reconnect attempt, milliseconds
        retry_in_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Push channel for a job (re)connected
    PushChannelUp {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl ScopeEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            ScopeEvent::JobStatusChanged { .. } => "JobStatusChanged",
            ScopeEvent::UploadProgress { .. } => "UploadProgress",
            ScopeEvent::AnalysisProgress { .. } => "AnalysisProgress",
            ScopeEvent::JobCompleted { .. } => "JobCompleted",
            ScopeEvent::JobFailed { .. } => "JobFailed",
            ScopeEvent::QueueDrained { .. } => "QueueDrained",
            ScopeEvent::PushChannelDown { .. } => "PushChannelDown",
            ScopeEvent::PushChannelUp { .. } => "PushChannelUp",
        }
    }
}

/// Central event distribution bus
///
/// Backed by `tokio::broadcast`, so a slow subscriber never blocks a
/// producer; lagged subscribers observe a recv error and resynchronize from
/// current state rather than stalling the queue.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScopeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// 256 is plenty for a dashboard session; tests use small capacities to
    /// exercise lag handling.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ScopeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the subscriber count, or an error if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ScopeEvent,
    ) -> Result<usize, broadcast::error::SendError<ScopeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    ///
    /// Progress events use this: it is fine if no component is currently
    /// subscribed.
    pub fn emit_lossy(&self, event: ScopeEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
