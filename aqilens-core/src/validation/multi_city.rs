//! Multi-city hold-out validation and the leave-one-city-out check.

use crate::config::ValidationConfig;
use crate::data::observation::{AqiCategory, CityDataset};
use crate::data::source::LoadedDataset;
use crate::error::ValidationError;
use crate::features::{FeatureBuilder, TrainingSample};
use crate::metrics::{regression_metrics, rmse, round_metric};
use crate::models::{Model, Predictor, resolve_predictor};
use crate::validation::record::{GeneralizationRecord, MetricRecord, SkippedCity};
use crate::validation::split::{BucketCoverage, StratifiedSplit, stratified_holdout};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Hold-out partition sizes and category coverage for one city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityCoverage {
    pub city: String,
    pub train_size: usize,
    pub test_size: usize,
    pub buckets: Vec<BucketCoverage>,
    /// Categories present in the city's data with no test sample.
    pub missing_from_test: Vec<AqiCategory>,
}

/// Everything the multi-city validator produces.
#[derive(Debug, Clone)]
pub struct MultiCityOutcome {
    pub records: Vec<MetricRecord>,
    /// Leave-one-city-out records, or the reason the check could not run.
    pub generalization: Result<Vec<GeneralizationRecord>, String>,
    pub skipped_cities: Vec<SkippedCity>,
    pub coverage: Vec<CityCoverage>,
}

struct CityEvaluation {
    city: String,
    records: Vec<MetricRecord>,
    split: StratifiedSplit,
    train_samples: Vec<TrainingSample>,
    test_samples: Vec<TrainingSample>,
}

/// Measures how well models generalize across cities.
pub struct MultiCityValidator<'a> {
    config: &'a ValidationConfig,
    features: FeatureBuilder,
    cancel: CancellationToken,
}

impl<'a> MultiCityValidator<'a> {
    pub fn new(config: &'a ValidationConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            features: FeatureBuilder::default(),
            cancel,
        }
    }

    fn checkpoint(&self) -> Result<(), ValidationError> {
        if self.cancel.is_cancelled() {
            Err(ValidationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Hold out part of each city's data, evaluate every model on it, then run
    /// the leave-one-city-out check across the usable cities.
    ///
    /// Only cancellation is returned as an error; skips and model failures
    /// become records.
    pub fn validate_all_cities(
        &self,
        models: &[Arc<dyn Model>],
        datasets: &LoadedDataset,
        validation_cities: &[String],
    ) -> Result<MultiCityOutcome, ValidationError> {
        tracing::info!(
            cities = validation_cities.len(),
            models = models.len(),
            "Starting multi-city validation"
        );

        let mut records = Vec::new();
        let mut skipped_cities = Vec::new();
        let mut usable: Vec<&CityDataset> = Vec::new();
        for name in validation_cities {
            match datasets.city(name) {
                None => {
                    tracing::warn!(city = %name, "City not present in dataset, skipping");
                    let reason = "skipped: city not present in dataset".to_string();
                    records.extend(skip_all(models, name, &reason));
                    skipped_cities.push(SkippedCity {
                        city: name.clone(),
                        observations: 0,
                        reason,
                    });
                }
                Some(ds) if ds.len() < self.config.min_samples => {
                    tracing::warn!(
                        city = %name,
                        observations = ds.len(),
                        min_samples = self.config.min_samples,
                        "Insufficient data, skipping city"
                    );
                    let reason = format!(
                        "skipped: insufficient data ({} observations, minimum {})",
                        ds.len(),
                        self.config.min_samples
                    );
                    records.extend(skip_all(models, ds.city(), &reason));
                    skipped_cities.push(SkippedCity {
                        city: ds.city().to_string(),
                        observations: ds.len(),
                        reason,
                    });
                }
                Some(ds) => usable.push(ds),
            }
        }

        let evaluations = if self.config.parallel && usable.len() > 1 {
            self.evaluate_parallel(models, &usable)?
        } else {
            let mut evaluations = Vec::with_capacity(usable.len());
            for ds in &usable {
                evaluations.push(self.evaluate_city(models, ds)?);
            }
            evaluations
        };

        let mut coverage = Vec::with_capacity(evaluations.len());
        for eval in &evaluations {
            let missing = eval.split.missing_from_test();
            if !missing.is_empty() {
                tracing::warn!(city = %eval.city, ?missing, "AQI categories missing from hold-out");
            }
            coverage.push(CityCoverage {
                city: eval.city.clone(),
                train_size: eval.split.split.train.len(),
                test_size: eval.split.split.test.len(),
                buckets: eval.split.coverage.clone(),
                missing_from_test: missing,
            });
            records.extend(eval.records.iter().cloned());
        }

        let generalization = if !self.config.multi_city.leave_one_city_out {
            Err("leave-one-city-out check disabled".to_string())
        } else if evaluations.len() < 2 {
            Err(format!(
                "leave-one-city-out needs at least 2 usable cities, found {}",
                evaluations.len()
            ))
        } else {
            Ok(self.leave_one_city_out(models, &evaluations)?)
        };

        Ok(MultiCityOutcome {
            records,
            generalization,
            skipped_cities,
            coverage,
        })
    }

    fn evaluate_parallel(
        &self,
        models: &[Arc<dyn Model>],
        usable: &[&CityDataset],
    ) -> Result<Vec<CityEvaluation>, ValidationError> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = usable
                .iter()
                .map(|ds| scope.spawn(move || self.evaluate_city(models, ds)))
                .collect();
            handles
                .into_iter()
                .zip(usable)
                .map(|(handle, ds)| {
                    handle.join().unwrap_or_else(|_| {
                        tracing::error!(city = %ds.city(), "City worker panicked");
                        Ok(CityEvaluation {
                            city: ds.city().to_string(),
                            records: models
                                .iter()
                                .map(|m| {
                                    MetricRecord::failed(m.name(), ds.city(), None, "worker panicked")
                                })
                                .collect(),
                            split: StratifiedSplit {
                                split: Default::default(),
                                coverage: Vec::new(),
                            },
                            train_samples: Vec::new(),
                            test_samples: Vec::new(),
                        })
                    })
                })
                .collect()
        })
    }

    fn evaluate_city(
        &self,
        models: &[Arc<dyn Model>],
        ds: &CityDataset,
    ) -> Result<CityEvaluation, ValidationError> {
        // Index 0 has no AQI history to build features from.
        let candidates: Vec<usize> = (1..ds.len()).collect();
        let split = stratified_holdout(
            ds,
            &candidates,
            self.config.multi_city.holdout_fraction,
            self.config.seed,
        );
        let train_samples = self.features.nowcast_samples(ds, &split.split.train);
        let test_samples = self.features.nowcast_samples(ds, &split.split.test);
        tracing::debug!(
            city = %ds.city(),
            train = train_samples.len(),
            test = test_samples.len(),
            "Hold-out split"
        );

        let mut records = Vec::with_capacity(models.len());
        for model in models {
            self.checkpoint()?;
            let record = evaluate_model(
                model.as_ref(),
                ds.city(),
                &train_samples,
                &test_samples,
                self.config.force_retrain,
            );
            match &record.failure_reason {
                Some(reason) => {
                    tracing::warn!(city = %ds.city(), model = model.name(), %reason, "Evaluation failed")
                }
                None => {
                    tracing::debug!(city = %ds.city(), model = model.name(), rmse = ?record.rmse, "Evaluated")
                }
            }
            records.push(record);
        }

        Ok(CityEvaluation {
            city: ds.city().to_string(),
            records,
            split,
            train_samples,
            test_samples,
        })
    }

    fn leave_one_city_out(
        &self,
        models: &[Arc<dyn Model>],
        evaluations: &[CityEvaluation],
    ) -> Result<Vec<GeneralizationRecord>, ValidationError> {
        let mut out = Vec::new();
        for (held_out, eval) in evaluations.iter().enumerate() {
            let training: Vec<TrainingSample> = evaluations
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != held_out)
                .flat_map(|(_, e)| e.train_samples.iter().chain(&e.test_samples).cloned())
                .collect();

            for model in models {
                self.checkpoint()?;
                let holdout_rmse = eval
                    .records
                    .iter()
                    .find(|r| r.model_name == model.name() && r.is_ok())
                    .and_then(|r| r.rmse);

                // A hold-out record scored with pre-trained coefficients is not
                // comparable to a fresh leave-one-out fit.
                let reused_pretrained = model.trainable()
                    && !self.config.force_retrain
                    && model.pretrained().is_some();
                let same_city = if reused_pretrained {
                    fit_rmse(model.as_ref(), &eval.train_samples, &eval.test_samples)
                        .map(Some)
                        .map_err(|reason| format!("same-city refit: {reason}"))
                } else {
                    Ok(holdout_rmse)
                };

                let loo = if model.trainable() {
                    fit_rmse(model.as_ref(), &training, &eval.test_samples)
                } else {
                    Err("pre-trained model cannot be refit".to_string())
                };

                let record = match (same_city, loo) {
                    (Ok(same_city_rmse), Ok(loo_rmse)) => GeneralizationRecord {
                        model_name: model.name().to_string(),
                        city: eval.city.clone(),
                        same_city_rmse,
                        leave_one_out_rmse: Some(loo_rmse),
                        generalization_gap: same_city_rmse
                            .map(|same| round_metric(loo_rmse - same)),
                        failure_reason: None,
                    },
                    (Ok(same_city_rmse), Err(reason)) => GeneralizationRecord {
                        model_name: model.name().to_string(),
                        city: eval.city.clone(),
                        same_city_rmse,
                        leave_one_out_rmse: None,
                        generalization_gap: None,
                        failure_reason: Some(reason),
                    },
                    (Err(reason), loo) => GeneralizationRecord {
                        model_name: model.name().to_string(),
                        city: eval.city.clone(),
                        same_city_rmse: None,
                        leave_one_out_rmse: loo.ok(),
                        generalization_gap: None,
                        failure_reason: Some(reason),
                    },
                };
                out.push(record);
            }
        }
        Ok(out)
    }
}

fn skip_all(models: &[Arc<dyn Model>], city: &str, reason: &str) -> Vec<MetricRecord> {
    models
        .iter()
        .map(|m| MetricRecord::skipped(m.name(), city, None, reason))
        .collect()
}

fn predict_all(predictor: &dyn Predictor, samples: &[TrainingSample]) -> Result<Vec<f64>, String> {
    samples
        .iter()
        .map(|s| {
            let value = predictor
                .predict(&s.features)
                .map_err(|e| format!("predict failed: {e}"))?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(format!("predict failed: non-finite prediction {value}"))
            }
        })
        .collect()
}

/// RMSE on `test` of a fresh fit on `train`.
fn fit_rmse(model: &dyn Model, train: &[TrainingSample], test: &[TrainingSample]) -> Result<f64, String> {
    let predictor = model.fit(train).map_err(|e| format!("fit failed: {e}"))?;
    let predicted = predict_all(predictor.as_ref(), test)?;
    let actual: Vec<f64> = test.iter().map(|s| s.target).collect();
    Ok(round_metric(rmse(&actual, &predicted)))
}

/// Fit (or reuse) a model on the train partition and score it on the test one.
fn evaluate_model(
    model: &dyn Model,
    city: &str,
    train: &[TrainingSample],
    test: &[TrainingSample],
    force_retrain: bool,
) -> MetricRecord {
    if test.is_empty() {
        return MetricRecord::skipped(model.name(), city, None, "skipped: empty hold-out partition");
    }
    let predictor = match resolve_predictor(model, train, force_retrain) {
        Ok(p) => p,
        Err(e) => return MetricRecord::failed(model.name(), city, None, format!("fit failed: {e}")),
    };
    let predicted = match predict_all(predictor.as_ref(), test) {
        Ok(p) => p,
        Err(reason) => return MetricRecord::failed(model.name(), city, None, reason),
    };
    let actual: Vec<f64> = test.iter().map(|s| s.target).collect();
    match regression_metrics(&actual, &predicted) {
        Some(metrics) => MetricRecord::from_metrics(model.name(), city, None, &metrics),
        None => MetricRecord::skipped(model.name(), city, None, "skipped: no comparable predictions"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::observation::Observation;
    use crate::error::ModelError;
    use crate::features::FeatureRow;
    use crate::models::{LinearCoefficients, LinearModel, PersistenceModel};
    use crate::validation::record::RecordStatus;
    use chrono::{Duration, TimeZone, Utc};

    fn city(name: &str, n: usize, offset: f64) -> Vec<Observation> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let aqi = offset + 60.0 + 50.0 * ((i as f64) / 9.0).sin();
                let mut o = Observation::new(name, start + Duration::hours(i as i64), aqi);
                o.pm25 = Some(aqi * 0.45);
                o
            })
            .collect()
    }

    struct Exploding;

    impl Model for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn fit(&self, _samples: &[TrainingSample]) -> Result<Arc<dyn Predictor>, ModelError> {
            Ok(Arc::new(|f: &FeatureRow| -> Result<f64, ModelError> {
                if f.current_aqi > 100.0 {
                    Err(ModelError::Prediction("out of range".into()))
                } else {
                    Ok(f.current_aqi)
                }
            }))
        }
    }

    fn models() -> Vec<Arc<dyn Model>> {
        vec![
            Arc::new(PersistenceModel),
            Arc::new(LinearModel::default()),
            Arc::new(Exploding),
        ]
    }

    #[test]
    fn test_small_city_skipped_others_scored() {
        let mut obs = city("Delhi", 300, 60.0);
        obs.extend(city("Mumbai", 300, 0.0));
        obs.extend(city("Goa", 10, 0.0));
        let data = LoadedDataset::from_observations(obs).unwrap();
        let config = ValidationConfig::default();
        let validator = MultiCityValidator::new(&config, CancellationToken::new());
        let cities = vec!["Delhi".to_string(), "Mumbai".to_string(), "Goa".to_string()];

        let outcome = validator
            .validate_all_cities(&models(), &data, &cities)
            .unwrap();

        assert_eq!(outcome.skipped_cities.len(), 1);
        assert_eq!(outcome.skipped_cities[0].city, "Goa");
        assert!(outcome.skipped_cities[0].reason.contains("insufficient data"));

        let linear_delhi = outcome
            .records
            .iter()
            .find(|r| r.city == "Delhi" && r.model_name == "linear")
            .unwrap();
        assert_eq!(linear_delhi.status, RecordStatus::Ok);
        assert!(linear_delhi.r2.unwrap() > 0.9);

        let exploding_delhi = outcome
            .records
            .iter()
            .find(|r| r.city == "Delhi" && r.model_name == "exploding")
            .unwrap();
        assert_eq!(exploding_delhi.status, RecordStatus::Failed);

        let goa: Vec<_> = outcome.records.iter().filter(|r| r.city == "Goa").collect();
        assert_eq!(goa.len(), 3);
        assert!(goa.iter().all(|r| r.status == RecordStatus::Skipped));

        let generalization = outcome.generalization.unwrap();
        assert_eq!(generalization.len(), 2 * 3);
        let loo = generalization
            .iter()
            .find(|g| g.city == "Mumbai" && g.model_name == "linear")
            .unwrap();
        assert!(loo.generalization_gap.is_some());
    }

    #[test]
    fn test_generalization_gap_compares_refit_predictors() {
        let mut obs = city("Delhi", 200, 60.0);
        obs.extend(city("Mumbai", 200, 0.0));
        let data = LoadedDataset::from_observations(obs).unwrap();
        let config = ValidationConfig::default();
        let validator = MultiCityValidator::new(&config, CancellationToken::new());
        let model: Arc<dyn Model> =
            Arc::new(LinearModel::default().with_pretrained(LinearCoefficients::constant(0.0)));
        let cities = vec!["Delhi".to_string(), "Mumbai".to_string()];

        let outcome = validator
            .validate_all_cities(&[model], &data, &cities)
            .unwrap();

        // The hold-out record still reports the pre-trained predictor.
        let delhi = outcome.records.iter().find(|r| r.city == "Delhi").unwrap();
        assert!(delhi.rmse.unwrap() > 100.0);

        let generalization = outcome.generalization.unwrap();
        let delhi_gap = generalization.iter().find(|g| g.city == "Delhi").unwrap();
        assert_eq!(delhi_gap.failure_reason, None);
        let same = delhi_gap.same_city_rmse.unwrap();
        let loo = delhi_gap.leave_one_out_rmse.unwrap();
        assert!(same < 10.0, "same-city rmse {same} should come from a refit");
        assert_eq!(delhi_gap.generalization_gap, Some(round_metric(loo - same)));
        assert!(delhi_gap.generalization_gap.unwrap() > -10.0);
    }

    #[test]
    fn test_forced_retrain_reuses_holdout_rmse() {
        let mut obs = city("Delhi", 200, 60.0);
        obs.extend(city("Mumbai", 200, 0.0));
        let data = LoadedDataset::from_observations(obs).unwrap();
        let mut config = ValidationConfig::default();
        config.force_retrain = true;
        let validator = MultiCityValidator::new(&config, CancellationToken::new());
        let model: Arc<dyn Model> =
            Arc::new(LinearModel::default().with_pretrained(LinearCoefficients::constant(0.0)));
        let cities = vec!["Delhi".to_string(), "Mumbai".to_string()];

        let outcome = validator
            .validate_all_cities(&[model], &data, &cities)
            .unwrap();
        let holdout = outcome.records.iter().find(|r| r.city == "Mumbai").unwrap();
        let generalization = outcome.generalization.unwrap();
        let gap = generalization.iter().find(|g| g.city == "Mumbai").unwrap();
        assert_eq!(gap.same_city_rmse, holdout.rmse);
    }

    #[test]
    fn test_unknown_city_and_single_city_generalization() {
        let data = LoadedDataset::from_observations(city("Delhi", 120, 0.0)).unwrap();
        let config = ValidationConfig::default();
        let validator = MultiCityValidator::new(&config, CancellationToken::new());
        let outcome = validator
            .validate_all_cities(
                &models(),
                &data,
                &["Delhi".to_string(), "Atlantis".to_string()],
            )
            .unwrap();
        assert!(outcome.generalization.is_err());
        assert_eq!(outcome.skipped_cities[0].city, "Atlantis");
        assert_eq!(outcome.coverage.len(), 1);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut obs = city("Delhi", 200, 40.0);
        obs.extend(city("Mumbai", 200, 0.0));
        obs.extend(city("Chennai", 200, 20.0));
        let data = LoadedDataset::from_observations(obs).unwrap();
        let cities = vec![
            "Delhi".to_string(),
            "Mumbai".to_string(),
            "Chennai".to_string(),
        ];

        let sequential = ValidationConfig::default();
        let mut parallel = ValidationConfig::default();
        parallel.parallel = true;

        let a = MultiCityValidator::new(&sequential, CancellationToken::new())
            .validate_all_cities(&models(), &data, &cities)
            .unwrap();
        let b = MultiCityValidator::new(&parallel, CancellationToken::new())
            .validate_all_cities(&models(), &data, &cities)
            .unwrap();
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn test_cancelled_run() {
        let data = LoadedDataset::from_observations(city("Delhi", 120, 0.0)).unwrap();
        let config = ValidationConfig::default();
        let token = CancellationToken::new();
        token.cancel();
        let result = MultiCityValidator::new(&config, token).validate_all_cities(
            &models(),
            &data,
            &["Delhi".to_string()],
        );
        assert!(matches!(result, Err(ValidationError::Cancelled)));
    }
}
