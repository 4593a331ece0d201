//! Playback state and time distribution for StemScope
//!
//! The clock owns playback state and drives the audio engine; the time
//! broadcaster fans frame-coalesced position updates out to every
//! time-synchronized consumer.

pub mod clock;
pub mod timesync;

pub use clock::{AudioEngine, PlaybackClock, PlaybackSnapshot, SharedPlaybackClock};
pub use timesync::{TimeBroadcaster, TimeSubscription, DEFAULT_FRAME};
