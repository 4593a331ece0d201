//! # StemScope Common Library
//!
//! Shared code for the StemScope client core crates:
//! - Core data model (time series, multi-band series, segments)
//! - Tracked job model and lifecycle rules
//! - Event types (ScopeEvent enum) and EventBus
//! - Error taxonomy
//! - Configuration loading
//! - Tracing setup

pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
