//! Feature payload normalization
//!
//! The analysis backend reports features in several shapes: explicit segment
//! lists (song structure), scalar time series (tempo, loudness), categorical
//! series (chords), and band-keyed objects (band energy). This module
//! decodes them against each known variant in a fixed priority order and
//! produces one typed [`CanonicalFeature`]. An unrecognized shape decodes to
//! `None` with a diagnostic; chart components treat that as "no data", never
//! as an error.

use serde::Deserialize;
use serde_json::Value;
use stemscope_common::types::{MultiBandSeries, Segment, TimeSeries};
use tracing::debug;

use crate::bands::transform_band_energy;
use crate::chords::chord_color;

/// Confidence substituted when the payload reports none
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Segment duration assumed when a segment reports a start but no end
const DEFAULT_SEGMENT_DURATION: f64 = 1.0;

/// Colors for song-structure categories; unknown labels take the `break`
/// color so every rendered segment has one
const SECTION_COLORS: [(&str, &str); 7] = [
    ("intro", "#10b981"),
    ("verse", "#3b82f6"),
    ("chorus", "#ef4444"),
    ("bridge", "#f59e0b"),
    ("outro", "#6366f1"),
    ("instrumental", "#8b5cf6"),
    ("break", "#64748b"),
];

/// Color for a section label by category substring match
pub fn section_color(label: &str) -> &'static str {
    let lower = label.to_lowercase();
    SECTION_COLORS
        .iter()
        .find(|(key, _)| lower.contains(key))
        .map(|(_, color)| *color)
        .unwrap_or("#64748b")
}

/// One feature as reported on the wire
///
/// Loose by design: which fields are present determines the variant. The
/// backend has used both `times` and `timestamps`, and both `label` and
/// `value` on segments, so both spellings decode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeaturePayload {
    #[serde(default)]
    pub segments: Option<Vec<RawSegment>>,
    #[serde(default, alias = "timestamps")]
    pub times: Option<Vec<f64>>,
    #[serde(default)]
    pub values: Option<Value>,
    #[serde(default)]
    pub confidence: Option<Vec<f64>>,
    #[serde(default)]
    pub statistics: Option<Statistics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSegment {
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Summary statistics the backend attaches to scalar series
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Statistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// A normalized feature, ready for decimation and rendering
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalFeature {
    /// Labeled intervals (song structure), sorted by start
    Segments(Vec<Segment>),
    /// Aligned multi-band values on one time grid (band energy)
    Bands(MultiBandSeries),
    /// Scalar values over time (tempo, loudness)
    Series(TimeSeries),
    /// Chord segments derived from a categorical series by run-length
    /// collapsing consecutive equal labels
    Chords(Vec<Segment>),
}

/// Decode a raw payload into a [`CanonicalFeature`].
///
/// Priority order: segment list, band object, scalar series, categorical
/// series. Returns `None` for anything else; never panics, never errors.
pub fn transform(payload: &FeaturePayload) -> Option<CanonicalFeature> {
    if let Some(segments) = &payload.segments {
        return Some(CanonicalFeature::Segments(map_segments(segments)));
    }

    if let Some(Value::Object(map)) = &payload.values {
        let times = payload.times.as_deref();
        return transform_band_energy(times, map).map(CanonicalFeature::Bands);
    }

    if let (Some(times), Some(Value::Array(raw))) = (&payload.times, &payload.values) {
        if times.len() != raw.len() {
            debug!(
                times = times.len(),
                values = raw.len(),
                "Feature payload arrays disagree in length; dropping"
            );
            return None;
        }
        if raw.iter().all(Value::is_number) {
            let values = raw.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect();
            return Some(CanonicalFeature::Series(TimeSeries {
                timestamps: times.clone(),
                values,
                confidence: payload.confidence.clone(),
            }));
        }
        if raw.iter().all(Value::is_string) {
            let labels: Vec<&str> = raw.iter().filter_map(Value::as_str).collect();
            return Some(CanonicalFeature::Chords(rle_segments(
                times,
                &labels,
                payload.confidence.as_deref(),
            )));
        }
    }

    debug!("Unrecognized feature payload shape; treating as no data");
    None
}

fn map_segments(raw: &[RawSegment]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = raw
        .iter()
        .map(|seg| {
            let start = seg.start.or(seg.time).unwrap_or(0.0);
            let end = seg.end.unwrap_or(start + seg.duration.unwrap_or(DEFAULT_SEGMENT_DURATION));
            let label = seg
                .label
                .clone()
                .or_else(|| seg.value.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            let color = seg
                .color
                .clone()
                .unwrap_or_else(|| section_color(&label).to_string());
            Segment {
                start,
                end,
                confidence: seg.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                color: Some(color),
                label,
            }
        })
        .collect();
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    segments
}

/// Collapse consecutive equal labels into segments.
///
/// Each run ends where the next run begins; the final run ends at the last
/// timestamp. A run consisting of only the final sample therefore yields a
/// zero-width segment, the one documented exception to `start < end`.
fn rle_segments(times: &[f64], labels: &[&str], confidence: Option<&[f64]>) -> Vec<Segment> {
    let mut segments = Vec::new();
    let n = labels.len().min(times.len());
    let mut run_start = 0usize;

    while run_start < n {
        let label = labels[run_start];
        let mut next = run_start + 1;
        while next < n && labels[next] == label {
            next += 1;
        }

        let start = times[run_start];
        let end = if next < n { times[next] } else { times[n - 1] };
        let conf = confidence
            .and_then(|c| c.get(run_start).copied())
            .unwrap_or(DEFAULT_CONFIDENCE);

        segments.push(Segment {
            start,
            end,
            label: label.to_string(),
            confidence: conf,
            color: Some(chord_color(label, conf)),
        });

        run_start = next;
    }

    segments
}
