//! Feature rows handed to model adapters.
//!
//! A [`FeatureRow`] only ever contains information available at its origin
//! observation: pollutant and weather readings at the origin, AQI history up to
//! and including the origin, and the calendar hour of the target.

use crate::data::observation::{CityDataset, Observation};
use chrono::{Duration, Timelike};
use serde::{Deserialize, Serialize};

/// Names of the entries of [`FeatureRow::vector`], in order.
pub const FEATURE_NAMES: [&str; 15] = [
    "pm25",
    "pm10",
    "no2",
    "so2",
    "co",
    "o3",
    "temperature",
    "humidity",
    "wind_speed",
    "hour_sin",
    "hour_cos",
    "current_aqi",
    "mean_aqi_window",
    "seasonal_aqi",
    "horizon_hours",
];

/// Rolling window used for the mean-AQI feature.
pub const DEFAULT_HISTORY_WINDOW: usize = 24;

/// Model input for one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    /// Hours between the origin and the target (0 for same-time estimation).
    pub horizon_hours: u32,
    /// Hour of day (UTC) of the target.
    pub target_hour: u32,
    /// Latest AQI known at the origin.
    pub current_aqi: f64,
    /// Mean AQI over the history window ending at the origin.
    pub mean_aqi_window: f64,
    /// AQI at the same hour of day on the most recent day known at the origin.
    pub seasonal_aqi: Option<f64>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub no2: Option<f64>,
    pub so2: Option<f64>,
    pub co: Option<f64>,
    pub o3: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

impl FeatureRow {
    /// Dense numeric form in [`FEATURE_NAMES`] order; missing readings are NaN.
    pub fn vector(&self) -> Vec<f64> {
        let opt = |v: Option<f64>| v.unwrap_or(f64::NAN);
        let angle = f64::from(self.target_hour) / 24.0 * std::f64::consts::TAU;
        vec![
            opt(self.pm25),
            opt(self.pm10),
            opt(self.no2),
            opt(self.so2),
            opt(self.co),
            opt(self.o3),
            opt(self.temperature),
            opt(self.humidity),
            opt(self.wind_speed),
            angle.sin(),
            angle.cos(),
            self.current_aqi,
            self.mean_aqi_window,
            opt(self.seasonal_aqi),
            f64::from(self.horizon_hours),
        ]
    }
}

/// A feature row paired with the AQI it should predict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: FeatureRow,
    pub target: f64,
}

/// Builds feature rows from a city's series.
#[derive(Debug, Clone, Copy)]
pub struct FeatureBuilder {
    window: usize,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self {
            window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl FeatureBuilder {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    /// Same-time estimation of the AQI at `index` from its readings and the
    /// AQI history strictly before it. Requires `index >= 1`.
    pub fn nowcast_row(&self, dataset: &CityDataset, index: usize) -> Option<FeatureRow> {
        if index == 0 {
            return None;
        }
        let obs = dataset.observations();
        let current = obs.get(index)?;
        let history = &obs[index.saturating_sub(self.window)..index];
        let seasonal = dataset
            .index_at(current.timestamp - Duration::hours(24))
            .map(|i| obs[i].aqi);
        Some(self.row(current, history, 0, current.timestamp.hour(), seasonal))
    }

    /// Forecast of the AQI `horizon` hours after `origin`, using only data at
    /// or before the origin.
    pub fn forecast_row(
        &self,
        dataset: &CityDataset,
        origin: usize,
        horizon: u32,
    ) -> Option<FeatureRow> {
        let obs = dataset.observations();
        let current = obs.get(origin)?;
        let history = &obs[(origin + 1).saturating_sub(self.window)..=origin];
        let target_time = current.timestamp + Duration::hours(i64::from(horizon));
        // Step back whole days until the seasonal reference is no later than the origin.
        let days_back = i64::from(horizon).div_euclid(24) + i64::from(horizon % 24 != 0);
        let seasonal = dataset
            .index_at(target_time - Duration::hours(24 * days_back.max(1)))
            .filter(|i| *i <= origin)
            .map(|i| obs[i].aqi);
        Some(self.row(current, history, horizon, target_time.hour(), seasonal))
    }

    fn row(
        &self,
        readings: &Observation,
        history: &[Observation],
        horizon_hours: u32,
        target_hour: u32,
        seasonal_aqi: Option<f64>,
    ) -> FeatureRow {
        let current_aqi = history.last().map(|o| o.aqi).unwrap_or(f64::NAN);
        let mean_aqi_window = if history.is_empty() {
            f64::NAN
        } else {
            history.iter().map(|o| o.aqi).sum::<f64>() / history.len() as f64
        };
        FeatureRow {
            horizon_hours,
            target_hour,
            current_aqi,
            mean_aqi_window,
            seasonal_aqi,
            pm25: readings.pm25,
            pm10: readings.pm10,
            no2: readings.no2,
            so2: readings.so2,
            co: readings.co,
            o3: readings.o3,
            temperature: readings.temperature,
            humidity: readings.humidity,
            wind_speed: readings.wind_speed,
        }
    }

    /// Same-time training samples for the given indices (index 0 is skipped).
    pub fn nowcast_samples(&self, dataset: &CityDataset, indices: &[usize]) -> Vec<TrainingSample> {
        indices
            .iter()
            .filter_map(|&i| {
                let features = self.nowcast_row(dataset, i)?;
                Some(TrainingSample {
                    features,
                    target: dataset.get(i)?.aqi,
                })
            })
            .collect()
    }
}
