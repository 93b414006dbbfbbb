//! Per-city data quality summary included in the report metadata.

use crate::data::observation::{AqiCategory, CityDataset};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shape of one city's series as seen by the validators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityDataQuality {
    pub city: String,
    pub observations: usize,
    pub duplicates_removed: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Consecutive observations more than one hour apart.
    pub hourly_gaps: usize,
    /// Share of rows with a PM2.5 reading (0.0-1.0).
    pub pm25_coverage: f64,
    pub category_counts: BTreeMap<AqiCategory, usize>,
    pub meets_min_samples: bool,
}

/// Summarize a city's dataset against the minimum sample threshold.
pub fn assess_city(dataset: &CityDataset, min_samples: usize) -> CityDataQuality {
    let obs = dataset.observations();
    let hourly_gaps = obs
        .windows(2)
        .filter(|w| (w[1].timestamp - w[0].timestamp).num_minutes() > 60)
        .count();
    let pm25_coverage = if obs.is_empty() {
        0.0
    } else {
        obs.iter().filter(|o| o.pm25.is_some()).count() as f64 / obs.len() as f64
    };

    CityDataQuality {
        city: dataset.city().to_string(),
        observations: dataset.len(),
        duplicates_removed: dataset.duplicates_removed(),
        first_timestamp: obs.first().map(|o| o.timestamp),
        last_timestamp: obs.last().map(|o| o.timestamp),
        hourly_gaps,
        pm25_coverage,
        category_counts: dataset.category_counts(),
        meets_min_samples: dataset.len() >= min_samples,
    }
}
