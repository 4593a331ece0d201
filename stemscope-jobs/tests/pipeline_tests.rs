//! End-to-end pipeline tests with scripted transport and uploader
//!
//! Exercise the full path a file takes: enqueue, bounded upload, push
//! subscription, progress folding, terminal teardown, and queue drain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stemscope_common::events::{EventBus, ScopeEvent};
use stemscope_common::jobs::{FileRef, JobStatus};
use stemscope_common::Result;
use stemscope_jobs::push::PushStream;
use stemscope_jobs::{JobSubscriber, JobTracker, PushMessage, PushTransport, UploadQueue, Uploader};
use tokio::sync::mpsc;

/// Transport that replays one scripted stream per connect call
struct ScriptedTransport {
    connects: AtomicUsize,
    scripts: std::sync::Mutex<Vec<Vec<Result<PushMessage>>>>,
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn connect(&self, _job_id: &str) -> Result<PushStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap();
        let script = if scripts.is_empty() { Vec::new() } else { scripts.remove(0) };
        if script.is_empty() {
            // Hold the connection open with no traffic
            Ok(Box::pin(futures::stream::pending()))
        } else {
            Ok(Box::pin(futures::stream::iter(script)))
        }
    }
}

/// Uploader that succeeds immediately with a server id derived from the
/// file name
struct InstantUploader;

#[async_trait]
impl Uploader for InstantUploader {
    async fn upload(&self, file: &FileRef, progress: mpsc::UnboundedSender<u8>) -> Result<String> {
        for pct in [25u8, 50, 100] {
            let _ = progress.send(pct);
        }
        Ok(format!("srv-{}", file.name))
    }
}

fn wav(name: &str) -> FileRef {
    FileRef {
        name: name.to_string(),
        size_bytes: 4096,
        content_type: "audio/wav".into(),
    }
}

fn progress_msg(pct: u8) -> PushMessage {
    serde_json::from_value(serde_json::json!({
        "type": "progress",
        "percentage": pct,
        "current_stage": "Separating stems",
    }))
    .unwrap()
}

struct Pipeline {
    tracker: JobTracker,
    queue: UploadQueue,
    bus: EventBus,
    transport: Arc<ScriptedTransport>,
}

fn pipeline(scripts: Vec<Vec<Result<PushMessage>>>, max_concurrent: usize) -> Pipeline {
    let bus = EventBus::new(256);
    let tracker = JobTracker::new(bus.clone());
    let transport = Arc::new(ScriptedTransport {
        connects: AtomicUsize::new(0),
        scripts: std::sync::Mutex::new(scripts),
    });
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let subscriber = Arc::new(JobSubscriber::new(transport.clone(), bus.clone(), push_tx));

    let consumer = tracker.clone();
    tokio::spawn(async move { consumer.run_push_consumer(push_rx).await });

    let queue = UploadQueue::new(
        tracker.clone(),
        Arc::new(InstantUploader),
        subscriber,
        max_concurrent,
    );
    let reactor = queue.clone();
    tokio::spawn(async move { reactor.run_reactor().await });

    Pipeline { tracker, queue, bus, transport }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test(start_paused = true)]
async fn test_file_travels_enqueue_to_completed() {
    let p = pipeline(
        vec![vec![
            Ok(progress_msg(30)),
            Ok(progress_msg(80)),
            Ok(PushMessage::JobComplete),
        ]],
        3,
    );
    let mut events = p.bus.subscribe();

    let id = p.queue.enqueue(wav("mix.wav")).await;
    settle().await;

    let job = p.tracker.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.job_id.as_deref(), Some("srv-mix.wav"));
    assert_eq!(job.upload_progress, 100);
    let snap = job.analysis_progress.unwrap();
    assert_eq!(snap.percentage, 80);
    assert_eq!(snap.current_stage, "Separating stems");
    assert!(job.finished_at.is_some());

    // The drain event fired after the terminal transition
    let types: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.event_type().to_string())
        .collect();
    assert!(types.contains(&"JobCompleted".to_string()));
    assert!(types.contains(&"QueueDrained".to_string()));
    let completed_at = types.iter().position(|t| t == "JobCompleted").unwrap();
    let drained_at = types.iter().position(|t| t == "QueueDrained").unwrap();
    assert!(completed_at < drained_at);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_fails_job_and_frees_slot() {
    let p = pipeline(
        vec![
            vec![Ok(PushMessage::Error { message: "separation failed".into() })],
            vec![Ok(PushMessage::JobComplete)],
        ],
        1,
    );

    let a = p.queue.enqueue(wav("bad.wav")).await;
    let b = p.queue.enqueue(wav("good.wav")).await;
    settle().await;

    let job_a = p.tracker.get(a).await.unwrap();
    assert_eq!(job_a.status, JobStatus::Failed);
    assert_eq!(job_a.error.as_deref(), Some("separation failed"));

    let job_b = p.tracker.get(b).await.unwrap();
    assert_eq!(job_b.status, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_channel_reconnects_and_resumes() {
    // First connection dies mid-stream; the reconnect completes the job
    let p = pipeline(
        vec![
            vec![
                Ok(progress_msg(10)),
                Err(stemscope_common::Error::Transport("conn reset".into())),
            ],
            vec![Ok(progress_msg(95)), Ok(PushMessage::JobComplete)],
        ],
        1,
    );
    let mut events = p.bus.subscribe();

    let id = p.queue.enqueue(wav("long.wav")).await;
    // Ride out the 1s reconnect delay
    tokio::time::sleep(Duration::from_secs(5)).await;

    let job = p.tracker.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(p.transport.connects.load(Ordering::SeqCst), 2);

    let mut saw_down = false;
    let mut ups = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ScopeEvent::PushChannelDown { retry_in_ms, .. } => {
                saw_down = true;
                assert_eq!(retry_in_ms, 1000);
            }
            ScopeEvent::PushChannelUp { .. } => ups += 1,
            _ => {}
        }
    }
    assert!(saw_down);
    assert_eq!(ups, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_job_ignores_late_push_traffic() {
    // Channel stays open and silent; the user cancels, then stale messages
    // arrive through the tracker
    let p = pipeline(vec![vec![]], 1);

    let id = p.queue.enqueue(wav("meh.wav")).await;
    settle().await;
    assert_eq!(p.tracker.get(id).await.unwrap().status, JobStatus::Analyzing);

    p.queue.cancel(id).await;
    settle().await;
    assert_eq!(p.tracker.get(id).await.unwrap().status, JobStatus::Cancelled);

    p.tracker.apply_push_message("srv-meh.wav", progress_msg(99)).await;
    p.tracker
        .apply_push_message("srv-meh.wav", PushMessage::JobComplete)
        .await;

    let job = p.tracker.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.analysis_progress.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_queue_keeps_admission_order_under_load() {
    let scripts = (0..6)
        .map(|_| vec![Ok(PushMessage::JobComplete)])
        .collect();
    let p = pipeline(scripts, 2);
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(p.queue.enqueue(wav(&format!("t{i}.wav"))).await);
    }
    settle().await;

    for id in &ids {
        assert_eq!(p.tracker.get(*id).await.unwrap().status, JobStatus::Completed);
    }
    // Every job got exactly one push connection
    assert_eq!(p.transport.connects.load(Ordering::SeqCst), 6);
}
