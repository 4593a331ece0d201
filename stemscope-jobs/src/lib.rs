//! Upload and analysis job management for StemScope
//!
//! The pipeline: files enter through the [`queue::UploadQueue`], the
//! [`client::HttpUploader`] streams them to the analysis API, the
//! [`push::JobSubscriber`] follows each accepted job over its push channel,
//! and the [`tracker::JobTracker`] folds everything into shared state and
//! bus events. [`session::JobSession`] wires it all from config.

pub mod backoff;
pub mod client;
pub mod push;
pub mod queue;
pub mod session;
pub mod tracker;

pub use client::{ApiClient, HttpSend, HttpUploader, RawResponse, TokenProvider, Uploader};
pub use push::{JobSubscriber, PushMessage, PushTransport, SsePushTransport};
pub use queue::UploadQueue;
pub use session::JobSession;
pub use tracker::JobTracker;
