//! Bounded-concurrency upload queue
//!
//! Admission control: at most `max_concurrent` jobs may be active (uploading
//! or analyzing) at once; the rest wait in FIFO order. Admission passes run
//! on enqueue and whenever a job reaches a terminal state, and an atomic
//! guard keeps overlapping passes from double-admitting. When the last job
//! finishes and nothing is pending, `QueueDrained` fires exactly once;
//! enqueueing re-arms it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use stemscope_common::events::ScopeEvent;
use stemscope_common::jobs::{FileRef, JobStatus};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::Uploader;
use crate::push::JobSubscriber;
use crate::tracker::JobTracker;

struct QueueInner {
    tracker: JobTracker,
    uploader: Arc<dyn Uploader>,
    subscriber: Arc<JobSubscriber>,
    pending: Mutex<VecDeque<Uuid>>,
    /// In-flight upload tasks, aborted on cancel
    active_uploads: Mutex<HashMap<Uuid, tokio::task::JoinHandle<()>>>,
    processing: AtomicBool,
    /// True once QueueDrained has fired for the current drain
    drained: AtomicBool,
    max_concurrent: usize,
}

/// The upload queue. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<QueueInner>,
}

impl UploadQueue {
    pub fn new(
        tracker: JobTracker,
        uploader: Arc<dyn Uploader>,
        subscriber: Arc<JobSubscriber>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                tracker,
                uploader,
                subscriber,
                pending: Mutex::new(VecDeque::new()),
                active_uploads: Mutex::new(HashMap::new()),
                processing: AtomicBool::new(false),
                // Armed only after something has been enqueued
                drained: AtomicBool::new(true),
                max_concurrent: max_concurrent.max(1),
            }),
        }
    }

    /// Add a file to the queue and run an admission pass.
    pub async fn enqueue(&self, file: FileRef) -> Uuid {
        let id = self.inner.tracker.create(file).await;
        self.inner.pending.lock().await.push_back(id);
        self.inner.drained.store(false, Ordering::SeqCst);
        info!(%id, "Enqueued upload");
        self.process().await;
        id
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Cancel a job whether pending, uploading or analyzing.
    ///
    /// An in-flight upload is aborted outright; the dropped request ends the
    /// transfer. Late server responses are absorbed by the terminal state.
    pub async fn cancel(&self, id: Uuid) {
        self.inner.pending.lock().await.retain(|p| *p != id);
        if let Some(handle) = self.inner.active_uploads.lock().await.remove(&id) {
            handle.abort();
        }
        let server_id = self
            .inner
            .tracker
            .get(id)
            .await
            .and_then(|job| job.job_id);
        if self.inner.tracker.cancel(id).await {
            if let Some(server_id) = server_id {
                self.inner.subscriber.unsubscribe(&server_id).await;
            }
        }
        self.check_drained().await;
    }

    /// Admission pass: start pending uploads while slots are free.
    ///
    /// Admits `min(available slots, pending)` in FIFO order and starts the
    /// batch in parallel, one task each. The atomic guard makes concurrent
    /// passes collapse into one; callers never wait on uploads.
    // Desugared so the recursive spawn below can prove the future is Send
    pub fn process(&self) -> impl std::future::Future<Output = ()> + Send + '_ {
        async move {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let active = self.inner.tracker.active_count().await;
        let available = self.inner.max_concurrent.saturating_sub(active);
        let batch: Vec<Uuid> = {
            let mut pending = self.inner.pending.lock().await;
            let take = available.min(pending.len());
            pending.drain(..take).collect()
        };
        // Mark the batch active before releasing the guard, so a concurrent
        // pass sees the slots as taken
        let mut admitted = Vec::with_capacity(batch.len());
        for id in batch {
            if self.inner.tracker.set_status(id, JobStatus::Uploading).await {
                admitted.push(id);
            }
            // A job cancelled while pending is skipped; its slot stays free
        }
        self.inner.processing.store(false, Ordering::SeqCst);

        if !admitted.is_empty() {
            debug!(count = admitted.len(), "Admitting uploads");
        }
        for id in admitted {
            // The map lock is held across spawn and insert; the task's own
            // cleanup locks the same map, so removal cannot precede insert
            let mut uploads = self.inner.active_uploads.lock().await;
            let queue = self.clone();
            let handle = tokio::spawn(async move {
                queue.run_upload(id).await;
                queue.inner.active_uploads.lock().await.remove(&id);
                queue.process().await;
                queue.check_drained().await;
            });
            uploads.insert(id, handle);
        }
        }
    }

    /// Drive one admitted upload to completion. The job is already in
    /// `uploading` when this runs.
    async fn run_upload(&self, id: Uuid) {
        let inner = &self.inner;
        let Some(job) = inner.tracker.get(id).await else { return };

        // Bridge byte progress from the uploader into tracker updates
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let progress_tracker = inner.tracker.clone();
        let progress_task = tokio::spawn(async move {
            while let Some(pct) = progress_rx.recv().await {
                progress_tracker.set_upload_progress(id, pct).await;
            }
        });

        let outcome = inner.uploader.upload(&job.file, progress_tx).await;
        progress_task.await.ok();

        match outcome {
            Ok(server_id) => {
                inner.tracker.set_server_job_id(id, &server_id).await;
                if inner.tracker.set_status(id, JobStatus::Analyzing).await {
                    inner.subscriber.subscribe(&server_id).await;
                } else {
                    // Cancelled mid-upload; the server job is abandoned
                    debug!(%id, "Upload finished for a terminal job, not subscribing");
                }
            }
            Err(e) => {
                inner.tracker.fail(id, &e.to_string()).await;
            }
        }
    }

    /// Emit `QueueDrained` once when nothing is pending or active.
    pub async fn check_drained(&self) {
        if !self.inner.pending.lock().await.is_empty() {
            return;
        }
        if self.inner.tracker.active_count().await > 0 {
            return;
        }
        if !self.inner.drained.swap(true, Ordering::SeqCst) {
            info!("Upload queue drained");
            self.inner
                .tracker
                .bus()
                .emit_lossy(ScopeEvent::QueueDrained { timestamp: Utc::now() });
        }
    }

    /// React to job lifecycle events until the bus closes.
    ///
    /// Jobs finish analysis through the push channel, not through queue
    /// code, so the freed slot is noticed here.
    pub async fn run_reactor(&self) {
        let mut events = self.inner.tracker.bus().subscribe();
        loop {
            match events.recv().await {
                Ok(ScopeEvent::JobStatusChanged { new_status, .. })
                    if new_status.is_terminal() =>
                {
                    self.process().await;
                    self.check_drained().await;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    // Missed events; run a pass anyway
                    self.process().await;
                    self.check_drained().await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use stemscope_common::events::EventBus;
    use stemscope_common::Result;
    use tokio::sync::oneshot;

    use crate::push::{PushStream, PushTransport};

    /// Push transport that never connects; queue tests drive terminal
    /// states directly through the tracker.
    struct NullTransport;

    #[async_trait]
    impl PushTransport for NullTransport {
        async fn connect(&self, _job_id: &str) -> Result<PushStream> {
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    /// Uploader that completes only when the test releases it
    struct GatedUploader {
        gates: std::sync::Mutex<HashMap<String, oneshot::Receiver<Result<String>>>>,
    }

    impl GatedUploader {
        fn new() -> (Arc<Self>, GateControl) {
            let uploader = Arc::new(Self { gates: std::sync::Mutex::new(HashMap::new()) });
            (uploader.clone(), GateControl { uploader })
        }
    }

    struct GateControl {
        uploader: Arc<GatedUploader>,
    }

    impl GateControl {
        /// Pre-register a gate for `file_name`; the upload blocks until the
        /// returned sender fires.
        fn gate(&self, file_name: &str) -> oneshot::Sender<Result<String>> {
            let (tx, rx) = oneshot::channel();
            self.uploader
                .gates
                .lock()
                .unwrap()
                .insert(file_name.to_string(), rx);
            tx
        }
    }

    #[async_trait]
    impl Uploader for GatedUploader {
        async fn upload(
            &self,
            file: &FileRef,
            progress: mpsc::UnboundedSender<u8>,
        ) -> Result<String> {
            let _ = progress.send(100);
            let gate = self.gates.lock().unwrap().remove(&file.name);
            match gate {
                Some(rx) => rx.await.unwrap_or_else(|_| Ok(format!("srv-{}", file.name))),
                None => Ok(format!("srv-{}", file.name)),
            }
        }
    }

    fn file(name: &str) -> FileRef {
        FileRef {
            name: name.to_string(),
            size_bytes: 100,
            content_type: "audio/wav".into(),
        }
    }

    fn build_queue(max_concurrent: usize) -> (UploadQueue, JobTracker, GateControl, EventBus) {
        let bus = EventBus::new(256);
        let tracker = JobTracker::new(bus.clone());
        let (uploader, control) = GatedUploader::new();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let subscriber = Arc::new(JobSubscriber::new(
            Arc::new(NullTransport),
            bus.clone(),
            push_tx,
        ));
        // Keep the push consumer running like a real session would
        let consumer = tracker.clone();
        tokio::spawn(async move { consumer.run_push_consumer(push_rx).await });

        let queue = UploadQueue::new(tracker.clone(), uploader, subscriber, max_concurrent);
        let reactor = queue.clone();
        tokio::spawn(async move { reactor.run_reactor().await });
        (queue, tracker, control, bus)
    }

    async fn settle() {
        // Let spawned admission and upload tasks run
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_is_bounded() {
        let (queue, tracker, control, _bus) = build_queue(3);
        let mut gates = Vec::new();
        for i in 0..5 {
            gates.push(control.gate(&format!("f{i}.wav")));
        }
        for i in 0..5 {
            queue.enqueue(file(&format!("f{i}.wav"))).await;
        }
        settle().await;

        assert_eq!(tracker.active_count().await, 3);
        assert_eq!(queue.pending_count().await, 2);

        // Finishing an upload moves the job to analyzing; the slot is still
        // occupied, so nothing new is admitted yet
        gates.remove(0).send(Ok("srv-f0".into())).ok();
        settle().await;
        assert_eq!(tracker.active_count().await, 3);
        assert_eq!(queue.pending_count().await, 2);
        let jobs = tracker.jobs().await;
        let analyzing = jobs
            .iter()
            .find(|j| j.status == JobStatus::Analyzing)
            .unwrap();
        assert_eq!(analyzing.file.name, "f0.wav");

        // Completing analysis frees the slot; the next pending job is
        // admitted in FIFO order
        tracker
            .apply_push_message("srv-f0", crate::push::PushMessage::JobComplete)
            .await;
        settle().await;
        assert_eq!(tracker.active_count().await, 3);
        assert_eq!(queue.pending_count().await, 1);
        let jobs = tracker.jobs().await;
        let admitted = jobs
            .iter()
            .find(|j| j.file.name == "f3.wav")
            .unwrap();
        assert_eq!(admitted.status, JobStatus::Uploading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_upload_frees_slot() {
        let (queue, tracker, control, _bus) = build_queue(1);
        let gate_a = control.gate("a.wav");
        let _gate_b = control.gate("b.wav");

        let a = queue.enqueue(file("a.wav")).await;
        queue.enqueue(file("b.wav")).await;
        settle().await;
        assert_eq!(queue.pending_count().await, 1);

        gate_a
            .send(Err(stemscope_common::Error::Transport("reset".into())))
            .ok();
        settle().await;

        assert_eq!(tracker.get(a).await.unwrap().status, JobStatus::Failed);
        // b was admitted into the freed slot
        assert_eq!(tracker.active_count().await, 1);
        assert_eq!(queue.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_job_never_uploads() {
        let (queue, tracker, control, _bus) = build_queue(1);
        let _gate_a = control.gate("a.wav");

        queue.enqueue(file("a.wav")).await;
        let b = queue.enqueue(file("b.wav")).await;
        settle().await;

        queue.cancel(b).await;
        assert_eq!(queue.pending_count().await, 0);
        assert_eq!(tracker.get(b).await.unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_fires_once_and_rearms() {
        let (queue, tracker, control, bus) = build_queue(3);
        let mut events = bus.subscribe();

        let a = queue.enqueue(file("a.wav")).await;
        settle().await;
        // Upload done, job now analyzing; finish it via the tracker the way
        // a push message would
        let _ = control;
        let server_id = tracker.get(a).await.unwrap().job_id.unwrap();
        tracker
            .apply_push_message(&server_id, crate::push::PushMessage::JobComplete)
            .await;
        settle().await;

        let drained: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| e.event_type() == "QueueDrained")
            .collect();
        assert_eq!(drained.len(), 1);

        // Re-arms on the next enqueue
        let b = queue.enqueue(file("b.wav")).await;
        settle().await;
        let server_id = tracker.get(b).await.unwrap().job_id.unwrap();
        tracker
            .apply_push_message(&server_id, crate::push::PushMessage::JobComplete)
            .await;
        settle().await;

        let drained: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| e.event_type() == "QueueDrained")
            .collect();
        assert_eq!(drained.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_progress_reaches_tracker() {
        let (queue, tracker, _control, _bus) = build_queue(1);
        let a = queue.enqueue(file("a.wav")).await;
        settle().await;

        let job = tracker.get(a).await.unwrap();
        assert_eq!(job.upload_progress, 100);
        assert_eq!(job.status, JobStatus::Analyzing);
    }
}
