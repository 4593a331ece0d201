//! Session wiring
//!
//! Builds the whole upload/tracking pipeline from a `ScopeConfig`: one bus,
//! one tracker, the push subscriber arena, the HTTP uploader and the queue,
//! plus the two long-lived tasks (push consumer and queue reactor).

use std::path::PathBuf;
use std::sync::Arc;

use stemscope_common::config::ScopeConfig;
use stemscope_common::events::EventBus;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::client::{ApiClient, HttpUploader};
use crate::push::{JobSubscriber, SsePushTransport};
use crate::queue::UploadQueue;
use crate::tracker::JobTracker;

const EVENT_BUS_CAPACITY: usize = 256;

/// One dashboard session's job machinery
pub struct JobSession {
    pub bus: EventBus,
    pub tracker: JobTracker,
    pub queue: UploadQueue,
    pub api: Arc<ApiClient>,
    subscriber: Arc<JobSubscriber>,
    consumer: JoinHandle<()>,
    reactor: JoinHandle<()>,
}

impl JobSession {
    /// Wire everything up. `upload_root` is the directory uploads are read
    /// from.
    pub fn start(config: &ScopeConfig, upload_root: impl Into<PathBuf>) -> Self {
        let bus = EventBus::new(EVENT_BUS_CAPACITY);
        let tracker = JobTracker::new(bus.clone());

        let api = Arc::new(ApiClient::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
        ));
        let uploader = Arc::new(HttpUploader::new(api.clone(), upload_root));

        let transport = Arc::new(SsePushTransport::new(
            config.push_base_url.clone(),
            config.auth_token.clone(),
        ));
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let subscriber = Arc::new(JobSubscriber::new(transport, bus.clone(), push_tx));

        let consumer_tracker = tracker.clone();
        let consumer = tokio::spawn(async move {
            consumer_tracker.run_push_consumer(push_rx).await;
        });

        let queue = UploadQueue::new(
            tracker.clone(),
            uploader,
            subscriber.clone(),
            config.max_concurrent_uploads,
        );
        let reactor_queue = queue.clone();
        let reactor = tokio::spawn(async move {
            reactor_queue.run_reactor().await;
        });

        info!(
            api = %config.api_base_url,
            push = %config.push_base_url,
            max_concurrent = config.max_concurrent_uploads,
            "Job session started"
        );

        Self { bus, tracker, queue, api, subscriber, consumer, reactor }
    }

    /// Stop all background tasks and push channels.
    pub async fn shutdown(self) {
        self.subscriber.shutdown().await;
        self.reactor.abort();
        self.consumer.abort();
        info!("Job session stopped");
    }
}
