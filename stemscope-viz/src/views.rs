//! Chart view models
//!
//! Stateless builders turning canonical features plus the current playback
//! time into renderer-ready layout data. The renderer itself is external;
//! these functions own everything that is worth testing: percent layout,
//! active-segment lookup, and the seek mapping back from a click fraction.
//! View models are read-only over feature data; the only thing flowing back
//! toward playback is a seek time.

use stemscope_common::types::Segment;

use crate::chords::{is_minor, roman_numeral};

/// One block of the song-structure strip
#[derive(Debug, Clone, PartialEq)]
pub struct SectionBlock {
    pub label: String,
    pub color: String,
    pub start_percent: f64,
    pub width_percent: f64,
    /// Whether the playhead currently sits inside this block
    pub active: bool,
}

/// One block of the chord progression strip
#[derive(Debug, Clone, PartialEq)]
pub struct ChordBlock {
    pub chord: String,
    pub roman: String,
    pub is_minor: bool,
    pub color: String,
    pub confidence: f64,
    pub start_percent: f64,
    pub width_percent: f64,
    pub active: bool,
}

/// Index of the segment containing `time`, if any
pub fn active_segment(segments: &[Segment], time: f64) -> Option<usize> {
    segments.iter().position(|seg| seg.contains(time))
}

/// Layout for the song-structure strip
///
/// Zero duration yields an empty layout rather than dividing by zero.
pub fn structure_view(segments: &[Segment], current_time: f64, duration: f64) -> Vec<SectionBlock> {
    if duration <= 0.0 {
        return Vec::new();
    }
    segments
        .iter()
        .map(|seg| SectionBlock {
            label: seg.label.clone(),
            color: seg.color.clone().unwrap_or_else(|| "#64748b".to_string()),
            start_percent: seg.start / duration * 100.0,
            width_percent: (seg.end - seg.start) / duration * 100.0,
            active: seg.contains(current_time),
        })
        .collect()
}

/// Layout for the chord progression strip, with Roman numeral annotations
pub fn chord_view(segments: &[Segment], current_time: f64, duration: f64) -> Vec<ChordBlock> {
    if duration <= 0.0 {
        return Vec::new();
    }
    segments
        .iter()
        .map(|seg| ChordBlock {
            chord: seg.label.clone(),
            roman: roman_numeral(&seg.label),
            is_minor: is_minor(&seg.label),
            color: seg.color.clone().unwrap_or_default(),
            confidence: seg.confidence,
            start_percent: seg.start / duration * 100.0,
            width_percent: (seg.end - seg.start) / duration * 100.0,
            active: seg.contains(current_time),
        })
        .collect()
}

/// Map a click fraction along the strip back to a seek time
pub fn seek_time(fraction: f64, duration: f64) -> f64 {
    (fraction.clamp(0.0, 1.0)) * duration.max(0.0)
}
