//! Train/test partitioning of a city's observations.
//!
//! Splits are index sets into a [`CityDataset`]; the dataset itself is never
//! copied or reordered.

use crate::data::observation::{AqiCategory, CityDataset};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Disjoint train and test index sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl ValidationSplit {
    pub fn is_disjoint(&self) -> bool {
        let mut train = self.train.clone();
        train.sort_unstable();
        self.test.iter().all(|i| train.binary_search(i).is_err())
    }
}

/// How one AQI category was divided between the partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCoverage {
    pub category: AqiCategory,
    pub total: usize,
    pub train: usize,
    pub test: usize,
}

/// A stratified hold-out split plus its per-category coverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratifiedSplit {
    pub split: ValidationSplit,
    pub coverage: Vec<BucketCoverage>,
}

impl StratifiedSplit {
    /// Categories present in the data but absent from the test partition.
    pub fn missing_from_test(&self) -> Vec<AqiCategory> {
        self.coverage
            .iter()
            .filter(|b| b.total > 0 && b.test == 0)
            .map(|b| b.category)
            .collect()
    }
}

/// Randomly hold out `fraction` of `candidates`, stratified by AQI category.
///
/// Each category contributes `round(size * fraction)` test samples, clamped so
/// that a category with two or more samples keeps at least one in each
/// partition. A category with a single sample stays in train and shows up in
/// [`StratifiedSplit::missing_from_test`]. Deterministic for a given seed.
pub fn stratified_holdout(
    dataset: &CityDataset,
    candidates: &[usize],
    fraction: f64,
    seed: u64,
) -> StratifiedSplit {
    let mut buckets: BTreeMap<AqiCategory, Vec<usize>> = BTreeMap::new();
    for &i in candidates {
        if let Some(obs) = dataset.get(i) {
            buckets.entry(obs.category()).or_default().push(i);
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    let mut coverage = Vec::with_capacity(buckets.len());
    for (category, mut indices) in buckets {
        indices.shuffle(&mut rng);
        let total = indices.len();
        let n_test = if total < 2 {
            0
        } else {
            ((total as f64 * fraction).round() as usize).clamp(1, total - 1)
        };
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
        coverage.push(BucketCoverage {
            category,
            total,
            train: total - n_test,
            test: n_test,
        });
    }
    train.sort_unstable();
    test.sort_unstable();

    StratifiedSplit {
        split: ValidationSplit { train, test },
        coverage,
    }
}

/// One walk-forward evaluation point: train on everything up to and
/// including `origin`, test on the forecast targets after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardSplit {
    pub origin: usize,
    pub split: ValidationSplit,
}

/// Evaluation origins for walk-forward validation.
///
/// Origins begin once `min_train` observations are available, advance by
/// `stride`, leave room for at least one later observation, and are capped to
/// the most recent `max_origins` (0 = no cap).
pub fn walk_forward_origins(
    len: usize,
    min_train: usize,
    stride: usize,
    max_origins: usize,
) -> Vec<usize> {
    let first = min_train.max(1) - 1;
    if len < 2 || first >= len - 1 {
        return Vec::new();
    }
    let origins: Vec<usize> = (first..len - 1).step_by(stride.max(1)).collect();
    if max_origins > 0 && origins.len() > max_origins {
        origins[origins.len() - max_origins..].to_vec()
    } else {
        origins
    }
}

/// Walk-forward splits for `horizons`; origins without any recorded target
/// are dropped.
pub fn walk_forward_splits(
    dataset: &CityDataset,
    horizons: &[u32],
    min_train: usize,
    stride: usize,
    max_origins: usize,
) -> Vec<WalkForwardSplit> {
    walk_forward_origins(dataset.len(), min_train, stride, max_origins)
        .into_iter()
        .filter_map(|origin| {
            let mut test: Vec<usize> = horizons
                .iter()
                .filter_map(|&h| dataset.index_after_hours(origin, h))
                .collect();
            if test.is_empty() {
                return None;
            }
            test.sort_unstable();
            test.dedup();
            Some(WalkForwardSplit {
                origin,
                split: ValidationSplit {
                    train: (0..=origin).collect(),
                    test,
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::observation::Observation;
    use chrono::{Duration, TimeZone, Utc};

    fn dataset(values: &[f64]) -> CityDataset {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let obs = values
            .iter()
            .enumerate()
            .map(|(i, v)| Observation::new("Delhi", start + Duration::hours(i as i64), *v))
            .collect();
        CityDataset::new("Delhi", obs)
    }

    #[test]
    fn test_stratified_holdout_proportions() {
        let mut values = vec![30.0; 50];
        values.extend(vec![80.0; 30]);
        values.extend(vec![180.0; 20]);
        let ds = dataset(&values);
        let candidates: Vec<usize> = (0..ds.len()).collect();
        let split = stratified_holdout(&ds, &candidates, 0.2, 42);

        assert!(split.split.is_disjoint());
        assert_eq!(split.split.train.len() + split.split.test.len(), 100);
        let tests: Vec<usize> = split.coverage.iter().map(|b| b.test).collect();
        assert_eq!(tests, vec![10, 6, 4]);
        assert!(split.missing_from_test().is_empty());
    }

    #[test]
    fn test_singleton_bucket_flagged() {
        let mut values = vec![30.0; 20];
        values.push(400.0);
        let ds = dataset(&values);
        let candidates: Vec<usize> = (0..ds.len()).collect();
        let split = stratified_holdout(&ds, &candidates, 0.2, 1);
        assert_eq!(split.missing_from_test(), vec![AqiCategory::Hazardous]);
        assert!(split.split.train.contains(&20));
    }

    #[test]
    fn test_small_bucket_keeps_one_in_each_partition() {
        let values = vec![30.0, 35.0, 160.0, 170.0];
        let ds = dataset(&values);
        let split = stratified_holdout(&ds, &[0, 1, 2, 3], 0.1, 3);
        for bucket in &split.coverage {
            assert_eq!(bucket.test, 1);
            assert_eq!(bucket.train, 1);
        }
    }

    #[test]
    fn test_holdout_is_deterministic() {
        let values: Vec<f64> = (0..200).map(|i| (i * 7 % 250) as f64).collect();
        let ds = dataset(&values);
        let candidates: Vec<usize> = (1..ds.len()).collect();
        assert_eq!(
            stratified_holdout(&ds, &candidates, 0.25, 9),
            stratified_holdout(&ds, &candidates, 0.25, 9)
        );
    }

    #[test]
    fn test_walk_forward_origins() {
        assert_eq!(walk_forward_origins(10, 5, 2, 0), vec![4, 6, 8]);
        assert_eq!(walk_forward_origins(10, 5, 1, 2), vec![7, 8]);
        assert!(walk_forward_origins(5, 5, 1, 0).is_empty());
        assert!(walk_forward_origins(0, 1, 1, 0).is_empty());
    }

    #[test]
    fn test_walk_forward_splits_never_look_ahead() {
        let values: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let ds = dataset(&values);
        let splits = walk_forward_splits(&ds, &[1, 6, 12], 10, 3, 0);
        assert!(!splits.is_empty());
        for s in &splits {
            let last_train = ds.get(*s.split.train.last().unwrap()).unwrap().timestamp;
            assert_eq!(*s.split.train.last().unwrap(), s.origin);
            for &t in &s.split.test {
                assert!(ds.get(t).unwrap().timestamp > last_train);
            }
        }
    }
}
