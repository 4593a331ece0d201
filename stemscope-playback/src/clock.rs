//! Playback clock
//!
//! Single source of truth for playback time, rate, volume, loop region and
//! stem selection. Exactly one clock exists per analysis view; it drives the
//! external audio engine through the [`AudioEngine`] capability and is the
//! only component allowed to mutate `current_time`. Chart components read
//! time through the broadcast channel and talk back exclusively via `seek`.

use std::collections::BTreeSet;
use std::sync::Arc;

use stemscope_common::{Error, Result};
use tokio::sync::RwLock;
use tracing::warn;

/// Lowest accepted playback rate
pub const MIN_PLAYBACK_RATE: f64 = 0.25;
/// Highest accepted playback rate
pub const MAX_PLAYBACK_RATE: f64 = 2.0;

const DEFAULT_VOLUME: f64 = 0.8;
const DEFAULT_STEMS: [&str; 4] = ["vocals", "drums", "bass", "other"];

/// Capability interface the audio engine adapter implements
///
/// Wired once when the analysis view mounts. The clock never learns anything
/// about the engine beyond these three operations; the engine reports back
/// through `update_current_time` and `set_duration` on the clock.
pub trait AudioEngine: Send + Sync {
    fn play(&self);
    fn pause(&self);
    /// Seek to a position expressed as a fraction of duration in `[0, 1]`
    fn seek_to(&self, fraction: f64);
}

/// Read-only copy of the clock state, for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub playback_rate: f64,
    pub volume: f64,
    pub loop_enabled: bool,
    pub loop_start: f64,
    pub loop_end: f64,
    pub selected_stems: BTreeSet<String>,
    pub muted_stems: BTreeSet<String>,
    pub solo_stem: Option<String>,
}

/// The playback state machine
///
/// Synchronous and engine-agnostic; the async shared wrapper is
/// [`SharedPlaybackClock`].
pub struct PlaybackClock {
    is_playing: bool,
    current_time: f64,
    duration: f64,
    playback_rate: f64,
    volume: f64,
    loop_enabled: bool,
    loop_start: f64,
    loop_end: f64,
    selected_stems: BTreeSet<String>,
    muted_stems: BTreeSet<String>,
    solo_stem: Option<String>,
    engine: Option<Arc<dyn AudioEngine>>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            playback_rate: 1.0,
            volume: DEFAULT_VOLUME,
            loop_enabled: false,
            loop_start: 0.0,
            loop_end: 0.0,
            selected_stems: DEFAULT_STEMS.iter().map(|s| s.to_string()).collect(),
            muted_stems: BTreeSet::new(),
            solo_stem: None,
            engine: None,
        }
    }

    /// Wire the audio engine adapter. Called once at mount time.
    pub fn attach_engine(&mut self, engine: Arc<dyn AudioEngine>) {
        self.engine = Some(engine);
    }

    pub fn play(&mut self) {
        self.is_playing = true;
        if let Some(engine) = &self.engine {
            engine.play();
        }
    }

    pub fn pause(&mut self) {
        self.is_playing = false;
        if let Some(engine) = &self.engine {
            engine.pause();
        }
    }

    pub fn toggle_play_pause(&mut self) {
        if self.is_playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Seek to `time`, clamped to `[0, duration]`.
    ///
    /// Out-of-range seeks clamp rather than wrap or error: chart strips hand
    /// over raw click positions and a click past the end should land on the
    /// end, not be rejected.
    pub fn seek(&mut self, time: f64) {
        let clamped = if self.duration > 0.0 {
            time.clamp(0.0, self.duration)
        } else {
            time.max(0.0)
        };
        self.current_time = clamped;
        if let Some(engine) = &self.engine {
            let fraction = if self.duration > 0.0 { clamped / self.duration } else { 0.0 };
            engine.seek_to(fraction);
        }
    }

    /// Duration as reported by the engine's ready event.
    ///
    /// Non-finite or negative values are rejected here, at the boundary, so
    /// they can never corrupt clamping math inside the clock.
    pub fn set_duration(&mut self, duration: f64) -> Result<()> {
        if !duration.is_finite() || duration < 0.0 {
            warn!(duration, "Rejecting invalid duration from audio engine");
            return Err(Error::InvalidInput(format!("invalid duration: {duration}")));
        }
        self.duration = duration;
        Ok(())
    }

    /// High-frequency position update from the engine's own clock.
    ///
    /// When looping is enabled and `time` has reached the loop end, the
    /// update is redirected through [`Self::seek`] back to the loop start.
    /// The wrap is an explicit seek: the engine's `seek_to` fires exactly
    /// once per wrap, a side effect consumers must tolerate.
    pub fn update_current_time(&mut self, time: f64) {
        if self.loop_enabled && self.loop_end > self.loop_start && time >= self.loop_end {
            self.seek(self.loop_start);
        } else {
            self.current_time = time;
        }
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        self.playback_rate = rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_loop(&mut self, enabled: bool, start: Option<f64>, end: Option<f64>) {
        self.loop_enabled = enabled;
        if let Some(start) = start {
            self.loop_start = start;
        }
        if let Some(end) = end {
            self.loop_end = end;
        }
    }

    pub fn toggle_stem(&mut self, stem: &str) {
        if !self.selected_stems.remove(stem) {
            self.selected_stems.insert(stem.to_string());
        }
    }

    pub fn mute_stem(&mut self, stem: &str) {
        self.muted_stems.insert(stem.to_string());
    }

    pub fn unmute_stem(&mut self, stem: &str) {
        self.muted_stems.remove(stem);
    }

    pub fn set_solo_stem(&mut self, stem: Option<&str>) {
        self.solo_stem = stem.map(|s| s.to_string());
    }

    /// The stems that should currently be audible.
    ///
    /// Solo takes absolute precedence: a soloed stem is active even if it is
    /// muted or deselected. Without a solo, active = selected minus muted.
    pub fn active_stems(&self) -> BTreeSet<String> {
        if let Some(solo) = &self.solo_stem {
            return BTreeSet::from([solo.clone()]);
        }
        self.selected_stems
            .difference(&self.muted_stems)
            .cloned()
            .collect()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            is_playing: self.is_playing,
            current_time: self.current_time,
            duration: self.duration,
            playback_rate: self.playback_rate,
            volume: self.volume,
            loop_enabled: self.loop_enabled,
            loop_start: self.loop_start,
            loop_end: self.loop_end,
            selected_stems: self.selected_stems.clone(),
            muted_stems: self.muted_stems.clone(),
            solo_stem: self.solo_stem.clone(),
        }
    }

    /// Back to initial state. The engine wiring survives a reset; the view
    /// resets the clock on unmount/remount without rebuilding the adapter.
    pub fn reset(&mut self) {
        let engine = self.engine.take();
        *self = Self::new();
        self.engine = engine;
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared playback clock
///
/// One instance per analysis view, cloned into whatever needs it. All
/// mutation goes through these methods; no consumer touches time directly.
#[derive(Clone)]
pub struct SharedPlaybackClock {
    inner: Arc<RwLock<PlaybackClock>>,
}

impl SharedPlaybackClock {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(PlaybackClock::new())) }
    }

    pub async fn attach_engine(&self, engine: Arc<dyn AudioEngine>) {
        self.inner.write().await.attach_engine(engine);
    }

    pub async fn play(&self) {
        self.inner.write().await.play();
    }

    pub async fn pause(&self) {
        self.inner.write().await.pause();
    }

    pub async fn toggle_play_pause(&self) {
        self.inner.write().await.toggle_play_pause();
    }

    pub async fn seek(&self, time: f64) {
        self.inner.write().await.seek(time);
    }

    pub async fn set_duration(&self, duration: f64) -> Result<()> {
        self.inner.write().await.set_duration(duration)
    }

    pub async fn update_current_time(&self, time: f64) {
        self.inner.write().await.update_current_time(time);
    }

    pub async fn set_playback_rate(&self, rate: f64) {
        self.inner.write().await.set_playback_rate(rate);
    }

    pub async fn set_volume(&self, volume: f64) {
        self.inner.write().await.set_volume(volume);
    }

    pub async fn set_loop(&self, enabled: bool, start: Option<f64>, end: Option<f64>) {
        self.inner.write().await.set_loop(enabled, start, end);
    }

    pub async fn toggle_stem(&self, stem: &str) {
        self.inner.write().await.toggle_stem(stem);
    }

    pub async fn mute_stem(&self, stem: &str) {
        self.inner.write().await.mute_stem(stem);
    }

    pub async fn unmute_stem(&self, stem: &str) {
        self.inner.write().await.unmute_stem(stem);
    }

    pub async fn set_solo_stem(&self, stem: Option<&str>) {
        self.inner.write().await.set_solo_stem(stem);
    }

    pub async fn active_stems(&self) -> BTreeSet<String> {
        self.inner.read().await.active_stems()
    }

    pub async fn current_time(&self) -> f64 {
        self.inner.read().await.current_time()
    }

    pub async fn snapshot(&self) -> PlaybackSnapshot {
        self.inner.read().await.snapshot()
    }

    pub async fn reset(&self) {
        self.inner.write().await.reset();
    }
}

impl Default for SharedPlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEngine {
        plays: AtomicUsize,
        pauses: AtomicUsize,
        seeks: AtomicUsize,
    }

    impl AudioEngine for CountingEngine {
        fn play(&self) {
            self.plays.fetch_add(1, Ordering::SeqCst);
        }
        fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }
        fn seek_to(&self, _fraction: f64) {
            self.seeks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn clock_with_engine() -> (PlaybackClock, Arc<CountingEngine>) {
        let engine = Arc::new(CountingEngine::default());
        let mut clock = PlaybackClock::new();
        clock.attach_engine(engine.clone());
        (clock, engine)
    }

    #[test]
    fn test_play_pause_drive_engine() {
        let (mut clock, engine) = clock_with_engine();
        clock.play();
        assert!(clock.is_playing());
        clock.pause();
        assert!(!clock.is_playing());
        clock.toggle_play_pause();
        assert!(clock.is_playing());
        assert_eq!(engine.plays.load(Ordering::SeqCst), 2);
        assert_eq!(engine.pauses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_seek_clamps_to_duration() {
        let (mut clock, engine) = clock_with_engine();
        clock.set_duration(100.0).unwrap();
        clock.seek(150.0);
        assert_eq!(clock.current_time(), 100.0);
        clock.seek(-5.0);
        assert_eq!(clock.current_time(), 0.0);
        assert_eq!(engine.seeks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_loop_wrap_is_exactly_one_seek() {
        let (mut clock, engine) = clock_with_engine();
        clock.set_duration(60.0).unwrap();
        clock.set_loop(true, Some(2.0), Some(10.0));

        clock.update_current_time(10.5);
        assert_eq!(clock.current_time(), 2.0);
        assert_eq!(engine.seeks.load(Ordering::SeqCst), 1);

        // Inside the loop region, updates pass straight through
        clock.update_current_time(5.0);
        assert_eq!(clock.current_time(), 5.0);
        assert_eq!(engine.seeks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_degenerate_loop_region_never_wraps() {
        let (mut clock, engine) = clock_with_engine();
        clock.set_duration(60.0).unwrap();
        clock.set_loop(true, Some(10.0), Some(10.0));
        clock.update_current_time(30.0);
        assert_eq!(clock.current_time(), 30.0);
        assert_eq!(engine.seeks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rate_and_volume_clamping() {
        let mut clock = PlaybackClock::new();
        clock.set_playback_rate(10.0);
        assert_eq!(clock.snapshot().playback_rate, MAX_PLAYBACK_RATE);
        clock.set_playback_rate(0.01);
        assert_eq!(clock.snapshot().playback_rate, MIN_PLAYBACK_RATE);
        clock.set_volume(2.0);
        assert_eq!(clock.snapshot().volume, 1.0);
        clock.set_volume(-1.0);
        assert_eq!(clock.snapshot().volume, 0.0);
    }

    #[test]
    fn test_invalid_duration_rejected_at_boundary() {
        let mut clock = PlaybackClock::new();
        assert!(clock.set_duration(f64::NAN).is_err());
        assert!(clock.set_duration(f64::INFINITY).is_err());
        assert!(clock.set_duration(-1.0).is_err());
        assert_eq!(clock.duration(), 0.0);
        assert!(clock.set_duration(180.0).is_ok());
        assert_eq!(clock.duration(), 180.0);
    }

    #[test]
    fn test_solo_takes_absolute_precedence() {
        let mut clock = PlaybackClock::new();
        clock.mute_stem("drums");
        clock.set_solo_stem(Some("drums"));
        // Soloed stem is active even though it is muted
        assert_eq!(clock.active_stems(), BTreeSet::from(["drums".to_string()]));

        clock.set_solo_stem(None);
        let active = clock.active_stems();
        assert!(!active.contains("drums"));
        assert!(active.contains("vocals"));
    }

    #[test]
    fn test_stem_selection_and_muting() {
        let mut clock = PlaybackClock::new();
        clock.toggle_stem("vocals");
        assert!(!clock.active_stems().contains("vocals"));
        clock.toggle_stem("vocals");
        assert!(clock.active_stems().contains("vocals"));

        clock.mute_stem("bass");
        assert!(!clock.active_stems().contains("bass"));
        clock.unmute_stem("bass");
        assert!(clock.active_stems().contains("bass"));
    }

    #[test]
    fn test_reset_keeps_engine_wiring() {
        let (mut clock, engine) = clock_with_engine();
        clock.set_duration(60.0).unwrap();
        clock.seek(30.0);
        clock.reset();
        assert_eq!(clock.current_time(), 0.0);
        assert_eq!(clock.duration(), 0.0);
        clock.play();
        assert_eq!(engine.plays.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shared_clock_round_trip() {
        let clock = SharedPlaybackClock::new();
        clock.set_duration(120.0).await.unwrap();
        clock.seek(60.0).await;
        clock.play().await;

        let snapshot = clock.snapshot().await;
        assert!(snapshot.is_playing);
        assert_eq!(snapshot.current_time, 60.0);
        assert_eq!(snapshot.duration, 120.0);
    }
}
