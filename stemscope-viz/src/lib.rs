//! # StemScope Visualization Data Layer
//!
//! Turns raw analysis payloads into bounded-size, renderer-ready chart data:
//! - Feature payload normalization into typed canonical features
//! - Shape-preserving decimation (LTTB, nth-point, min-max) with memoization
//! - Chord label helpers and band-energy constants
//! - Stateless chart view models
//!
//! Everything here is pure and synchronous; playback synchronization lives
//! in `stemscope-playback`.

pub mod bands;
pub mod cache;
pub mod chords;
pub mod decimate;
pub mod features;
pub mod views;

pub use cache::DecimationCache;
pub use decimate::{decimate, decimate_multi_band, DecimationMethod};
pub use features::{transform, CanonicalFeature, FeaturePayload};
