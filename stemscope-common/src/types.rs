//! Core time-series and segment types shared across StemScope crates
//!
//! These are the canonical in-memory shapes the transform layer produces and
//! the visualization crates consume. Wire payloads (whatever the analysis
//! backend reports) are decoded into these; chart code never sees raw JSON.

use serde::{Deserialize, Serialize};

/// Ordered `(timestamp, value)` series with optional per-sample confidence
///
/// Invariants:
/// - `timestamps.len() == values.len()`
/// - If present, `confidence.len() == timestamps.len()`
/// - Timestamps are non-decreasing, in seconds
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Vec<f64>>,
}

impl TimeSeries {
    pub fn new(timestamps: Vec<f64>, values: Vec<f64>) -> Self {
        Self { timestamps, values, confidence: None }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// One named band of a multi-band series (e.g. the "bass" energy band)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Display name ("Sub-bass", "Bass", ...)
    pub name: String,
    /// CSS-style color spec handed straight to the renderer
    pub color: String,
    /// One value per entry in the parent `times` array
    pub values: Vec<f64>,
}

/// Several aligned value series sharing one time grid
///
/// Invariant: every band's `values.len()` equals `times.len()`. Missing
/// samples are filled with `0.0` at construction time, never left absent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiBandSeries {
    pub times: Vec<f64>,
    pub bands: Vec<Band>,
}

impl MultiBandSeries {
    /// Check the shared-grid invariant. Used by tests and debug assertions.
    pub fn is_aligned(&self) -> bool {
        self.bands.iter().all(|b| b.values.len() == self.times.len())
    }
}

/// A labeled time interval (chord, song section) with a confidence score
///
/// `start < end` for all segments except the documented final-sample edge
/// case, where a categorical run consisting of only the last sample yields
/// `start == end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub label: String,
    /// In `[0, 1]`
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whether `time` falls inside this segment (half-open interval)
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}
