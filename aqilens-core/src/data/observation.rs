//! Observation records, AQI categories and per-city datasets.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One hourly (or coarser) measurement for a city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub city: String,
    pub timestamp: DateTime<Utc>,
    pub aqi: f64,
    #[serde(default)]
    pub pm25: Option<f64>,
    #[serde(default)]
    pub pm10: Option<f64>,
    #[serde(default)]
    pub no2: Option<f64>,
    #[serde(default)]
    pub so2: Option<f64>,
    #[serde(default)]
    pub co: Option<f64>,
    #[serde(default)]
    pub o3: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub wind_speed: Option<f64>,
}

impl Observation {
    /// An observation carrying only the required fields.
    pub fn new(city: impl Into<String>, timestamp: DateTime<Utc>, aqi: f64) -> Self {
        Self {
            city: city.into(),
            timestamp,
            aqi,
            pm25: None,
            pm10: None,
            no2: None,
            so2: None,
            co: None,
            o3: None,
            temperature: None,
            humidity: None,
            wind_speed: None,
        }
    }

    pub fn category(&self) -> AqiCategory {
        AqiCategory::from_aqi(self.aqi)
    }
}

/// US EPA AQI severity buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_aqi(aqi: f64) -> Self {
        match aqi {
            a if a <= 50.0 => Self::Good,
            a if a <= 100.0 => Self::Moderate,
            a if a <= 150.0 => Self::UnhealthyForSensitiveGroups,
            a if a <= 200.0 => Self::Unhealthy,
            a if a <= 300.0 => Self::VeryUnhealthy,
            _ => Self::Hazardous,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }
}

/// Time-ordered observations of a single city.
///
/// Construction sorts by timestamp and drops duplicate timestamps, so
/// timestamps are strictly increasing. The dataset is never mutated afterwards;
/// validators only partition it by index.
#[derive(Debug, Clone, PartialEq)]
pub struct CityDataset {
    city: String,
    observations: Vec<Observation>,
    duplicates_removed: usize,
}

impl CityDataset {
    pub fn new(city: impl Into<String>, mut observations: Vec<Observation>) -> Self {
        // Stable sort keeps the first occurrence of a duplicated timestamp first.
        observations.sort_by_key(|o| o.timestamp);
        let before = observations.len();
        observations.dedup_by_key(|o| o.timestamp);
        let duplicates_removed = before - observations.len();
        Self {
            city: city.into(),
            observations,
            duplicates_removed,
        }
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Observation> {
        self.observations.get(index)
    }

    pub fn duplicates_removed(&self) -> usize {
        self.duplicates_removed
    }

    /// Index of the observation recorded exactly at `timestamp`.
    pub fn index_at(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        self.observations
            .binary_search_by_key(&timestamp, |o| o.timestamp)
            .ok()
    }

    /// Index of the observation `hours` after the one at `index`, if recorded.
    pub fn index_after_hours(&self, index: usize, hours: u32) -> Option<usize> {
        let origin = self.observations.get(index)?;
        let target = origin.timestamp + Duration::hours(i64::from(hours));
        // The target can only sit after `index`; search that tail.
        self.observations[index + 1..]
            .binary_search_by_key(&target, |o| o.timestamp)
            .ok()
            .map(|offset| index + 1 + offset)
    }

    /// Observation count per AQI category, omitting empty categories.
    pub fn category_counts(&self) -> BTreeMap<AqiCategory, usize> {
        let mut counts = BTreeMap::new();
        for obs in &self.observations {
            *counts.entry(obs.category()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(i64::from(hour))
    }

    #[test]
    fn test_category_boundaries() {
        assert_eq!(AqiCategory::from_aqi(0.0), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(50.0), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(50.5), AqiCategory::Moderate);
        assert_eq!(
            AqiCategory::from_aqi(150.0),
            AqiCategory::UnhealthyForSensitiveGroups
        );
        assert_eq!(AqiCategory::from_aqi(301.0), AqiCategory::Hazardous);
    }

    #[test]
    fn test_city_dataset_sorts_and_dedups() {
        let mut first = Observation::new("Delhi", at(1), 120.0);
        first.pm25 = Some(80.0);
        let ds = CityDataset::new(
            "Delhi",
            vec![
                Observation::new("Delhi", at(2), 130.0),
                first.clone(),
                Observation::new("Delhi", at(1), 999.0),
                Observation::new("Delhi", at(0), 110.0),
            ],
        );
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.duplicates_removed(), 1);
        assert_eq!(ds.get(1), Some(&first));
        let ts: Vec<_> = ds.observations().iter().map(|o| o.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_index_after_hours_skips_gaps() {
        let ds = CityDataset::new(
            "Pune",
            vec![
                Observation::new("Pune", at(0), 10.0),
                Observation::new("Pune", at(1), 11.0),
                Observation::new("Pune", at(3), 13.0),
            ],
        );
        assert_eq!(ds.index_after_hours(0, 1), Some(1));
        assert_eq!(ds.index_after_hours(0, 2), None);
        assert_eq!(ds.index_after_hours(1, 2), Some(2));
        assert_eq!(ds.index_after_hours(2, 1), None);
        assert_eq!(ds.index_at(at(3)), Some(2));
    }
}
