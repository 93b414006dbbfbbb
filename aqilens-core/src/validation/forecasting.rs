//! Walk-forward forecast evaluation across horizons.
//!
//! For each evaluation origin `t` a model is fit only on (features, target)
//! pairs whose target lies at or before `t`, then asked for the AQI at
//! `t + h`. Pairs whose target hour was never recorded are left out.

use crate::config::ValidationConfig;
use crate::data::observation::CityDataset;
use crate::data::source::LoadedDataset;
use crate::error::{ModelError, ValidationError};
use crate::features::{FeatureBuilder, TrainingSample};
use crate::metrics::{directional_accuracy, regression_metrics, rmse, skill_score};
use crate::models::{Model, Predictor};
use crate::validation::record::{MetricRecord, SkippedCity};
use crate::validation::split::{WalkForwardSplit, walk_forward_origins, walk_forward_splits};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Records and skips produced by the forecasting validator.
#[derive(Debug, Clone, Default)]
pub struct ForecastingOutcome {
    pub records: Vec<MetricRecord>,
    pub skipped_cities: Vec<SkippedCity>,
}

/// Training pairs of one city at one horizon, ordered by origin. Target
/// indices increase with origin indices.
struct HorizonPairs {
    targets: Vec<usize>,
    samples: Vec<TrainingSample>,
}

impl HorizonPairs {
    fn build(features: &FeatureBuilder, ds: &CityDataset, horizon: u32) -> Self {
        let mut targets = Vec::new();
        let mut samples = Vec::new();
        for origin in 0..ds.len() {
            let Some(target) = ds.index_after_hours(origin, horizon) else {
                continue;
            };
            let (Some(row), Some(obs)) = (features.forecast_row(ds, origin, horizon), ds.get(target))
            else {
                continue;
            };
            targets.push(target);
            samples.push(TrainingSample {
                features: row,
                target: obs.aqi,
            });
        }
        Self { targets, samples }
    }

    /// Samples whose target is known at `origin`.
    fn known_at(&self, origin: usize) -> &[TrainingSample] {
        let available = self.targets.partition_point(|&j| j <= origin);
        &self.samples[..available]
    }
}

/// Evaluates temporal forecast accuracy without lookahead.
pub struct ForecastingValidator<'a> {
    config: &'a ValidationConfig,
    features: FeatureBuilder,
    cancel: CancellationToken,
}

impl<'a> ForecastingValidator<'a> {
    pub fn new(config: &'a ValidationConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            features: FeatureBuilder::default(),
            cancel,
        }
    }

    fn min_train(&self) -> usize {
        self.config
            .forecasting
            .min_train_samples
            .unwrap_or(self.config.min_samples)
    }

    fn origins(&self, ds: &CityDataset) -> Vec<usize> {
        let fc = &self.config.forecasting;
        walk_forward_origins(ds.len(), self.min_train(), fc.stride, fc.max_origins)
    }

    /// The walk-forward splits evaluated for `ds`.
    pub fn splits(&self, ds: &CityDataset) -> Vec<WalkForwardSplit> {
        let fc = &self.config.forecasting;
        walk_forward_splits(ds, &fc.horizons, self.min_train(), fc.stride, fc.max_origins)
    }

    /// One record per (model, city, horizon). Only cancellation is returned
    /// as an error.
    pub fn validate(
        &self,
        models: &[Arc<dyn Model>],
        datasets: &LoadedDataset,
        cities: &[String],
    ) -> Result<ForecastingOutcome, ValidationError> {
        let horizons = &self.config.forecasting.horizons;
        tracing::info!(
            cities = cities.len(),
            models = models.len(),
            ?horizons,
            "Starting walk-forward forecasting validation"
        );

        let mut outcome = ForecastingOutcome::default();
        for name in cities {
            let reason = match datasets.city(name) {
                None => Some((0, "skipped: city not present in dataset".to_string())),
                Some(ds) if ds.len() < self.config.min_samples => Some((
                    ds.len(),
                    format!(
                        "skipped: insufficient data ({} observations, minimum {})",
                        ds.len(),
                        self.config.min_samples
                    ),
                )),
                Some(_) => None,
            };
            if let Some((observations, reason)) = reason {
                tracing::warn!(city = %name, %reason, "Skipping forecasting for city");
                for model in models {
                    for &h in horizons {
                        outcome
                            .records
                            .push(MetricRecord::skipped(model.name(), name, Some(h), &reason));
                    }
                }
                outcome.skipped_cities.push(SkippedCity {
                    city: name.clone(),
                    observations,
                    reason,
                });
                continue;
            }
            if let Some(ds) = datasets.city(name) {
                outcome.records.extend(self.evaluate_city(models, ds)?);
            }
        }
        Ok(outcome)
    }

    fn evaluate_city(
        &self,
        models: &[Arc<dyn Model>],
        ds: &CityDataset,
    ) -> Result<Vec<MetricRecord>, ValidationError> {
        let origins = self.origins(ds);
        tracing::debug!(city = %ds.city(), origins = origins.len(), "Walk-forward window");

        let mut records = Vec::new();
        for &horizon in &self.config.forecasting.horizons {
            let pairs = HorizonPairs::build(&self.features, ds, horizon);
            for model in models {
                if self.cancel.is_cancelled() {
                    return Err(ValidationError::Cancelled);
                }
                let record = if origins.is_empty() {
                    MetricRecord::skipped(
                        model.name(),
                        ds.city(),
                        Some(horizon),
                        "skipped: no evaluation origins after the minimum training window",
                    )
                } else {
                    self.evaluate_horizon(model.as_ref(), ds, horizon, &origins, &pairs)
                };
                if let Some(reason) = &record.failure_reason {
                    tracing::warn!(city = %ds.city(), model = model.name(), horizon, %reason, "Forecast evaluation not scored");
                } else if record.no_skill() {
                    tracing::warn!(
                        city = %ds.city(),
                        model = model.name(),
                        horizon,
                        skill = ?record.skill_score,
                        "Model does not beat persistence"
                    );
                }
                records.push(record);
            }
        }
        Ok(records)
    }

    fn evaluate_horizon(
        &self,
        model: &dyn Model,
        ds: &CityDataset,
        horizon: u32,
        origins: &[usize],
        pairs: &HorizonPairs,
    ) -> MetricRecord {
        let city = ds.city();
        let refit_every = self.config.forecasting.refit_every;
        let mut predictor: Option<Arc<dyn Predictor>> = None;
        let mut since_fit = 0usize;
        let mut origin_values = Vec::new();
        let mut actual = Vec::new();
        let mut predicted = Vec::new();

        for &origin in origins {
            let Some(target) = ds.index_after_hours(origin, horizon) else {
                continue;
            };
            if predictor.is_none() || since_fit >= refit_every {
                match fit_at(model, pairs.known_at(origin)) {
                    Ok(p) => {
                        predictor = Some(p);
                        since_fit = 0;
                    }
                    // Too early in the series; later origins have more data.
                    Err(ModelError::InsufficientData(_)) if predictor.is_none() => continue,
                    Err(e) => {
                        return MetricRecord::failed(
                            model.name(),
                            city,
                            Some(horizon),
                            format!("fit failed at origin {origin}: {e}"),
                        );
                    }
                }
            }
            since_fit += 1;

            let (Some(p), Some(row), Some(origin_obs), Some(target_obs)) = (
                predictor.as_ref(),
                self.features.forecast_row(ds, origin, horizon),
                ds.get(origin),
                ds.get(target),
            ) else {
                continue;
            };
            match p.predict(&row) {
                Ok(v) if v.is_finite() => {
                    origin_values.push(origin_obs.aqi);
                    actual.push(target_obs.aqi);
                    predicted.push(v);
                }
                Ok(v) => {
                    return MetricRecord::failed(
                        model.name(),
                        city,
                        Some(horizon),
                        format!("predict failed at origin {origin}: non-finite prediction {v}"),
                    );
                }
                Err(e) => {
                    return MetricRecord::failed(
                        model.name(),
                        city,
                        Some(horizon),
                        format!("predict failed at origin {origin}: {e}"),
                    );
                }
            }
        }

        let Some(metrics) = regression_metrics(&actual, &predicted) else {
            return MetricRecord::skipped(
                model.name(),
                city,
                Some(horizon),
                "skipped: no evaluable forecast pairs",
            );
        };
        let baseline_rmse = rmse(&actual, &origin_values);
        MetricRecord::from_metrics(model.name(), city, Some(horizon), &metrics).with_forecast_scores(
            directional_accuracy(&origin_values, &actual, &predicted),
            metrics.bias,
            skill_score(metrics.rmse, baseline_rmse),
        )
    }
}

/// Trainable models are always refit so nothing after the origin leaks in;
/// opaque pre-trained predictors are used as supplied.
fn fit_at(model: &dyn Model, samples: &[TrainingSample]) -> Result<Arc<dyn Predictor>, ModelError> {
    if model.trainable() {
        model.fit(samples)
    } else {
        model
            .pretrained()
            .ok_or_else(|| ModelError::NotFitted(model.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::observation::Observation;
    use crate::features::FeatureRow;
    use crate::models::{LinearModel, PersistenceModel};
    use crate::validation::record::RecordStatus;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;

    fn series(name: &str, values: impl Iterator<Item = f64>) -> Vec<Observation> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .enumerate()
            .map(|(i, v)| Observation::new(name, start + Duration::hours(i as i64), v))
            .collect()
    }

    fn small_config() -> ValidationConfig {
        let mut config = ValidationConfig::default();
        config.forecasting.horizons = vec![1, 6];
        config.forecasting.refit_every = 5;
        config
    }

    /// Fails the test if it is ever trained on a target later than the origin
    /// it is then asked to forecast from. AQI equals the hour index.
    struct LookaheadSpy {
        latest_target: Arc<Mutex<f64>>,
    }

    impl Model for LookaheadSpy {
        fn name(&self) -> &str {
            "spy"
        }

        fn fit(&self, samples: &[TrainingSample]) -> Result<Arc<dyn Predictor>, ModelError> {
            let latest = samples.iter().map(|s| s.target).fold(f64::MIN, f64::max);
            *self.latest_target.lock().unwrap() = latest;
            let seen = self.latest_target.clone();
            Ok(Arc::new(move |f: &FeatureRow| -> Result<f64, ModelError> {
                let latest = *seen.lock().unwrap();
                assert!(latest <= f.current_aqi, "trained on {latest} at origin {}", f.current_aqi);
                Ok(f.current_aqi + f64::from(f.horizon_hours))
            }))
        }
    }

    #[test]
    fn test_no_lookahead_in_training() {
        let data = LoadedDataset::from_observations(series("Delhi", (0..200).map(f64::from))).unwrap();
        let config = small_config();
        let validator = ForecastingValidator::new(&config, CancellationToken::new());
        let spy: Arc<dyn Model> = Arc::new(LookaheadSpy {
            latest_target: Arc::new(Mutex::new(f64::MIN)),
        });
        let outcome = validator
            .validate(&[spy], &data, &["Delhi".to_string()])
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        for record in &outcome.records {
            assert_eq!(record.status, RecordStatus::Ok);
            // Linear trend continued exactly.
            assert_eq!(record.rmse, Some(0.0));
            assert_eq!(record.directional_accuracy, Some(1.0));
            assert_eq!(record.skill_score, Some(1.0));
        }
    }

    #[test]
    fn test_persistence_has_zero_skill() {
        let values = (0..150).map(|i| 80.0 + 30.0 * (f64::from(i) / 5.0).sin());
        let data = LoadedDataset::from_observations(series("Mumbai", values)).unwrap();
        let config = small_config();
        let validator = ForecastingValidator::new(&config, CancellationToken::new());
        let models: Vec<Arc<dyn Model>> = vec![Arc::new(PersistenceModel), Arc::new(LinearModel::default())];
        let outcome = validator
            .validate(&models, &data, &["Mumbai".to_string()])
            .unwrap();
        assert_eq!(outcome.records.len(), 4);
        let persistence = outcome
            .records
            .iter()
            .find(|r| r.model_name == "persistence" && r.horizon_hours == Some(6))
            .unwrap();
        assert_eq!(persistence.skill_score, Some(0.0));
        assert!(persistence.no_skill());
        assert_eq!(persistence.bias.map(f64::is_finite), Some(true));
    }

    #[test]
    fn test_gaps_are_excluded_not_zero() {
        // Every fourth hour is missing; 1h-ahead targets after a gap vanish.
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let obs: Vec<Observation> = (0..240)
            .filter(|i| i % 4 != 3)
            .map(|i| Observation::new("Pune", start + Duration::hours(i), 50.0 + (i % 24) as f64))
            .collect();
        let data = LoadedDataset::from_observations(obs).unwrap();
        let mut config = small_config();
        config.forecasting.horizons = vec![1];
        config.forecasting.max_origins = 0;
        let validator = ForecastingValidator::new(&config, CancellationToken::new());
        let models: Vec<Arc<dyn Model>> = vec![Arc::new(PersistenceModel)];
        let outcome = validator
            .validate(&models, &data, &["Pune".to_string()])
            .unwrap();
        let record = &outcome.records[0];
        let ds = data.city("Pune").unwrap();
        let origins = walk_forward_origins(ds.len(), config.min_samples, 1, 0);
        let with_target = origins
            .iter()
            .filter(|&&o| ds.index_after_hours(o, 1).is_some())
            .count();
        assert!(with_target < origins.len());
        assert_eq!(record.n_samples, with_target);
    }

    #[test]
    fn test_small_city_skipped_per_horizon() {
        let data = LoadedDataset::from_observations(series("Goa", (0..10).map(f64::from))).unwrap();
        let config = small_config();
        let validator = ForecastingValidator::new(&config, CancellationToken::new());
        let models: Vec<Arc<dyn Model>> = vec![Arc::new(PersistenceModel)];
        let outcome = validator
            .validate(&models, &data, &["Goa".to_string()])
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records.iter().all(|r| r.status == RecordStatus::Skipped));
        assert_eq!(outcome.skipped_cities.len(), 1);
    }

    /// Neither trainable nor shipped with a predictor.
    struct Untrained;

    impl Model for Untrained {
        fn name(&self) -> &str {
            "untrained"
        }

        fn fit(&self, _samples: &[TrainingSample]) -> Result<Arc<dyn Predictor>, ModelError> {
            Err(ModelError::NotTrainable("untrained".into()))
        }

        fn trainable(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_untrained_model_fails_as_not_fitted() {
        assert_eq!(
            fit_at(&Untrained, &[]).err(),
            Some(ModelError::NotFitted("untrained".into()))
        );

        let data = LoadedDataset::from_observations(series("Delhi", (0..120).map(f64::from))).unwrap();
        let config = small_config();
        let validator = ForecastingValidator::new(&config, CancellationToken::new());
        let models: Vec<Arc<dyn Model>> = vec![Arc::new(Untrained)];
        let outcome = validator
            .validate(&models, &data, &["Delhi".to_string()])
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        for record in &outcome.records {
            assert_eq!(record.status, RecordStatus::Failed);
            let reason = record.failure_reason.as_deref().unwrap();
            assert!(reason.contains("model 'untrained' has not been fitted"), "{reason}");
        }
    }

    #[test]
    fn test_splits_are_time_ordered() {
        let data = LoadedDataset::from_observations(series("Delhi", (0..120).map(f64::from))).unwrap();
        let config = small_config();
        let validator = ForecastingValidator::new(&config, CancellationToken::new());
        let ds = data.city("Delhi").unwrap();
        let splits = validator.splits(ds);
        assert!(!splits.is_empty());
        for s in &splits {
            let train_max = s.split.train.iter().max().unwrap();
            assert!(s.split.test.iter().all(|t| t > train_max));
        }
    }
}
