//! Chart data decimation
//!
//! Reduces large `(time, value)` series to a bounded point budget while
//! preserving visual shape, so chart redraws stay cheap while the playhead
//! moves. All functions are pure; memoization lives in [`crate::cache`].

use stemscope_common::{Error, Result};

/// Downsampling algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DecimationMethod {
    /// Largest Triangle Three Buckets. Keeps first and last samples and the
    /// visually dominant point of each bucket. Best general-purpose choice.
    #[default]
    Lttb,
    /// Fixed-stride subsampling. Fast, lossy on spikes.
    NthPoint,
    /// Per-bucket min and max in time order. Doubles effective density per
    /// bucket; best for preserving extremes (clipping detection).
    MinMax,
}

/// A decimated series
#[derive(Debug, Clone, PartialEq)]
pub struct Decimated {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

/// A decimated multi-band series sharing one time grid
#[derive(Debug, Clone, PartialEq)]
pub struct DecimatedMulti {
    pub times: Vec<f64>,
    /// One value vector per band, each the same length as `times`
    pub bands: Vec<Vec<f64>>,
}

/// Decimate a series down to roughly `target_points` samples.
///
/// Identity when the input already fits the budget; empty input yields empty
/// output. Mismatched array lengths fail fast instead of producing a
/// desynchronized chart.
pub fn decimate(
    times: &[f64],
    values: &[f64],
    target_points: usize,
    method: DecimationMethod,
) -> Result<Decimated> {
    let indices = select_indices(times, values, target_points, method)?;
    Ok(Decimated {
        times: indices.iter().map(|&i| times[i]).collect(),
        values: indices.iter().map(|&i| values[i]).collect(),
    })
}

/// Decimate a multi-band series onto one shared time grid.
///
/// Index selection runs once, against band 0, and every band is then sampled
/// at those same indices. Decimating each band independently would pick
/// different indices per band and silently desynchronize the grid, making
/// cross-band comparison meaningless.
pub fn decimate_multi_band(
    times: &[f64],
    bands: &[Vec<f64>],
    target_points: usize,
    method: DecimationMethod,
) -> Result<DecimatedMulti> {
    let Some(first) = bands.first() else {
        return Ok(DecimatedMulti { times: Vec::new(), bands: Vec::new() });
    };
    for (i, band) in bands.iter().enumerate() {
        if band.len() != times.len() {
            return Err(Error::ShapeMismatch {
                context: "band length vs time grid",
                left: times.len(),
                right: bands[i].len(),
            });
        }
    }

    let indices = select_indices(times, first, target_points, method)?;
    Ok(DecimatedMulti {
        times: indices.iter().map(|&i| times[i]).collect(),
        bands: bands
            .iter()
            .map(|band| indices.iter().map(|&i| band[i]).collect())
            .collect(),
    })
}

/// Pick the indices a decimation pass would keep.
fn select_indices(
    times: &[f64],
    values: &[f64],
    target_points: usize,
    method: DecimationMethod,
) -> Result<Vec<usize>> {
    if times.len() != values.len() {
        return Err(Error::ShapeMismatch {
            context: "times vs values",
            left: times.len(),
            right: values.len(),
        });
    }
    let n = times.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    if n <= target_points {
        return Ok((0..n).collect());
    }
    // Budgets below 3 cannot hold a bucket between the endpoints
    if target_points < 3 {
        return Ok(vec![0, n - 1]);
    }

    match method {
        DecimationMethod::Lttb => Ok(lttb_indices(times, values, target_points)),
        DecimationMethod::NthPoint => Ok(nth_point_indices(n, target_points)),
        DecimationMethod::MinMax => Ok(min_max_indices(values, target_points)),
    }
}

/// Largest Triangle Three Buckets
///
/// For each interior bucket, keeps the point forming the largest triangle
/// with the previously kept point and the centroid of the next bucket.
fn lttb_indices(times: &[f64], values: &[f64], target_points: usize) -> Vec<usize> {
    let n = times.len();
    let mut kept = Vec::with_capacity(target_points);

    // Always keep the first point
    kept.push(0);

    let bucket_size = (n - 2) as f64 / (target_points - 2) as f64;
    let mut previous = 0usize;

    for i in 1..(target_points - 1) {
        let bucket_start = ((i - 1) as f64 * bucket_size) as usize + 1;
        let bucket_end = (i as f64 * bucket_size) as usize + 1;
        let next_start = bucket_end;
        let next_end = (((i + 1) as f64 * bucket_size) as usize + 1).min(n);

        // Centroid of the next bucket
        let mut avg_x = 0.0;
        let mut avg_y = 0.0;
        let mut count = 0usize;
        for j in next_start..next_end {
            avg_x += times[j];
            avg_y += values[j];
            count += 1;
        }
        if count > 0 {
            avg_x /= count as f64;
            avg_y /= count as f64;
        }

        // Point in the current bucket with the largest triangle area
        let mut max_area = -1.0f64;
        let mut selected = bucket_start;
        for j in bucket_start..bucket_end.min(n) {
            let area = ((times[previous] - avg_x) * (values[j] - values[previous])
                - (times[previous] - times[j]) * (avg_y - values[previous]))
                .abs();
            if area > max_area {
                max_area = area;
                selected = j;
            }
        }

        kept.push(selected);
        previous = selected;
    }

    // Always keep the last point
    kept.push(n - 1);
    kept
}

fn nth_point_indices(n: usize, target_points: usize) -> Vec<usize> {
    let step = n.div_ceil(target_points);
    (0..n).step_by(step).collect()
}

/// Per bucket, keep min and max samples in original time order.
fn min_max_indices(values: &[f64], target_points: usize) -> Vec<usize> {
    let n = values.len();
    let bucket_size = n.div_ceil(target_points / 2).max(1);
    let mut kept = Vec::with_capacity(target_points + 2);

    let mut start = 0usize;
    while start < n {
        let end = (start + bucket_size).min(n);
        let mut min_idx = start;
        let mut max_idx = start;
        for j in (start + 1)..end {
            if values[j] < values[min_idx] {
                min_idx = j;
            }
            if values[j] > values[max_idx] {
                max_idx = j;
            }
        }
        if min_idx == max_idx {
            // Flat bucket: a single sample stands for both extremes
            kept.push(min_idx);
        } else {
            kept.push(min_idx.min(max_idx));
            kept.push(min_idx.max(max_idx));
        }
        start = end;
    }

    kept
}
