//! Band-energy payload normalization
//!
//! The analysis backend reports band energy as an object of per-band arrays:
//!
//! ```json
//! { "sub_bass": [0.01, ...], "bass": [0.03, ...], "mids": [...], "highs": [...] }
//! ```
//!
//! The charts want one shared time grid with one aligned value array per
//! band. Missing bands and short arrays fill with 0.0 so the grid invariant
//! always holds.

use serde_json::Value;
use stemscope_common::types::{Band, MultiBandSeries};
use tracing::debug;

/// Sample rate assumed when the payload carries no explicit timestamps
pub const SYNTHETIC_SAMPLE_RATE_HZ: f64 = 10.0;

/// Frequency band definition matching the backend's four-band split
pub struct BandDef {
    /// Key in the wire payload
    pub key: &'static str,
    /// Display name
    pub name: &'static str,
    /// Frequency range, for legends
    pub range: &'static str,
    /// Chart color spec
    pub color: &'static str,
}

/// The backend's band layout, lowest frequency first
pub const ENERGY_BANDS: [BandDef; 4] = [
    BandDef { key: "sub_bass", name: "Sub-bass", range: "20-60 Hz", color: "rgba(139, 92, 246, 0.8)" },
    BandDef { key: "bass", name: "Bass", range: "60-250 Hz", color: "rgba(124, 58, 237, 0.8)" },
    BandDef { key: "mids", name: "Mids", range: "250-4k Hz", color: "rgba(109, 40, 217, 0.8)" },
    BandDef { key: "highs", name: "Highs", range: "4k-20k Hz", color: "rgba(91, 33, 182, 0.8)" },
];

fn as_f64_array(value: &Value) -> Option<Vec<f64>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect())
}

/// Build a [`MultiBandSeries`] from a band-keyed object.
///
/// `explicit_times` comes from the enclosing payload when present; otherwise
/// a `times` array inside the band object is honored, and failing both,
/// timestamps are synthesized at [`SYNTHETIC_SAMPLE_RATE_HZ`].
///
/// Returns `None` when no known band key maps to an array.
pub fn transform_band_energy(
    explicit_times: Option<&[f64]>,
    values: &serde_json::Map<String, Value>,
) -> Option<MultiBandSeries> {
    let available: Vec<(&BandDef, Vec<f64>)> = ENERGY_BANDS
        .iter()
        .filter_map(|def| values.get(def.key).and_then(as_f64_array).map(|arr| (def, arr)))
        .collect();

    if available.is_empty() {
        debug!("No known band arrays in band-energy payload");
        return None;
    }

    let times: Vec<f64> = if let Some(t) = explicit_times {
        t.to_vec()
    } else if let Some(t) = values.get("times").and_then(as_f64_array) {
        t
    } else {
        let len = available[0].1.len();
        (0..len).map(|i| i as f64 / SYNTHETIC_SAMPLE_RATE_HZ).collect()
    };

    // Every defined band appears in output order; absent or short arrays pad
    // with zero so each band is exactly `times.len()` long.
    let bands = ENERGY_BANDS
        .iter()
        .map(|def| {
            let source = available
                .iter()
                .find(|(d, _)| d.key == def.key)
                .map(|(_, arr)| arr.as_slice())
                .unwrap_or(&[]);
            let mut band_values = Vec::with_capacity(times.len());
            for i in 0..times.len() {
                band_values.push(source.get(i).copied().unwrap_or(0.0));
            }
            Band {
                name: def.name.to_string(),
                color: def.color.to_string(),
                values: band_values,
            }
        })
        .collect();

    let series = MultiBandSeries { times, bands };
    debug_assert!(series.is_aligned());
    Some(series)
}
