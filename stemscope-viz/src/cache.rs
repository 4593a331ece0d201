//! Memoized decimation
//!
//! The playback clock ticks many times per second; decimation must not run
//! on every tick. Results are cached per (feature key, point budget, method)
//! and invalidated by bumping the feature's generation when new analysis
//! data replaces the old, not by time.

use std::collections::HashMap;
use std::sync::Arc;

use stemscope_common::Result;

use crate::decimate::{
    decimate, decimate_multi_band, Decimated, DecimatedMulti, DecimationMethod,
};

type Key = (String, usize, DecimationMethod);

/// Cache over pure decimation results
///
/// Not thread-safe by itself; the dashboard owns one per analysis view on
/// the render path, matching the single-threaded cooperative model.
#[derive(Default)]
pub struct DecimationCache {
    series: HashMap<Key, (u64, Arc<Decimated>)>,
    multi: HashMap<Key, (u64, Arc<DecimatedMulti>)>,
}

impl DecimationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decimate a scalar series, reusing the cached result while the
    /// feature generation and point budget are unchanged.
    pub fn series(
        &mut self,
        feature_key: &str,
        generation: u64,
        times: &[f64],
        values: &[f64],
        target_points: usize,
        method: DecimationMethod,
    ) -> Result<Arc<Decimated>> {
        let key = (feature_key.to_string(), target_points, method);
        if let Some((cached_gen, cached)) = self.series.get(&key) {
            if *cached_gen == generation {
                return Ok(Arc::clone(cached));
            }
        }
        let computed = Arc::new(decimate(times, values, target_points, method)?);
        self.series.insert(key, (generation, Arc::clone(&computed)));
        Ok(computed)
    }

    /// Multi-band variant of [`Self::series`]
    pub fn multi_band(
        &mut self,
        feature_key: &str,
        generation: u64,
        times: &[f64],
        bands: &[Vec<f64>],
        target_points: usize,
        method: DecimationMethod,
    ) -> Result<Arc<DecimatedMulti>> {
        let key = (feature_key.to_string(), target_points, method);
        if let Some((cached_gen, cached)) = self.multi.get(&key) {
            if *cached_gen == generation {
                return Ok(Arc::clone(cached));
            }
        }
        let computed = Arc::new(decimate_multi_band(times, bands, target_points, method)?);
        self.multi.insert(key, (generation, Arc::clone(&computed)));
        Ok(computed)
    }

    /// Drop all cached results for one feature
    pub fn invalidate(&mut self, feature_key: &str) {
        self.series.retain(|(key, _, _), _| key != feature_key);
        self.multi.retain(|(key, _, _), _| key != feature_key);
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.multi.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(n: usize) -> (Vec<f64>, Vec<f64>) {
        let times: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let values: Vec<f64> = (0..n).map(|i| (i as f64).sin()).collect();
        (times, values)
    }

    #[test]
    fn test_same_generation_reuses_result() {
        let mut cache = DecimationCache::new();
        let (times, values) = data(5000);
        let a = cache
            .series("tempo", 1, &times, &values, 200, DecimationMethod::Lttb)
            .unwrap();
        let b = cache
            .series("tempo", 1, &times, &values, 200, DecimationMethod::Lttb)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_generation_bump_recomputes() {
        let mut cache = DecimationCache::new();
        let (times, values) = data(5000);
        let a = cache
            .series("tempo", 1, &times, &values, 200, DecimationMethod::Lttb)
            .unwrap();
        let b = cache
            .series("tempo", 2, &times, &values, 200, DecimationMethod::Lttb)
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_budget_change_is_a_distinct_entry() {
        let mut cache = DecimationCache::new();
        let (times, values) = data(5000);
        let a = cache
            .series("energy", 1, &times, &values, 200, DecimationMethod::Lttb)
            .unwrap();
        let b = cache
            .series("energy", 1, &times, &values, 400, DecimationMethod::Lttb)
            .unwrap();
        assert_eq!(a.times.len(), 200);
        assert_eq!(b.times.len(), 400);
    }

    #[test]
    fn test_invalidate_only_touches_named_feature() {
        let mut cache = DecimationCache::new();
        let (times, values) = data(5000);
        let tempo = cache
            .series("tempo", 1, &times, &values, 200, DecimationMethod::Lttb)
            .unwrap();
        let energy = cache
            .series("energy", 1, &times, &values, 200, DecimationMethod::Lttb)
            .unwrap();
        cache.invalidate("tempo");

        let tempo2 = cache
            .series("tempo", 1, &times, &values, 200, DecimationMethod::Lttb)
            .unwrap();
        let energy2 = cache
            .series("energy", 1, &times, &values, 200, DecimationMethod::Lttb)
            .unwrap();
        assert!(!Arc::ptr_eq(&tempo, &tempo2));
        assert!(Arc::ptr_eq(&energy, &energy2));
    }
}
