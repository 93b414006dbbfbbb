//! Orchestration of one validation run.

use crate::benchmark::{BenchmarkComparator, LiveQuery};
use crate::config::ValidationConfig;
use crate::data::source::{LoadedDataset, load_dataset};
use crate::data::validate::assess_city;
use crate::error::ValidationError;
use crate::models::ModelRegistry;
use crate::report::writer::{ArtifactOutcome, ReportWriter, default_writers, write_all};
use crate::report::{DatasetSummary, ReportInputs, RunMetadata, ValidationReport, aggregate};
use crate::validation::forecasting::ForecastingValidator;
use crate::validation::multi_city::MultiCityValidator;
use chrono::Utc;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Rejected rows listed individually in the report metadata.
const ROW_ERROR_SAMPLE: usize = 20;

/// A finished run: the report plus what each writer did with it.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: ValidationReport,
    pub artifacts: Vec<ArtifactOutcome>,
}

impl RunOutcome {
    pub fn summary_line(&self) -> String {
        self.report.summary.line()
    }

    pub fn failed_writers(&self) -> Vec<&ArtifactOutcome> {
        self.artifacts.iter().filter(|a| !a.is_ok()).collect()
    }
}

/// Runs loader, validators, benchmark comparison, aggregation and writers.
pub struct ValidationRunner {
    config: ValidationConfig,
    registry: ModelRegistry,
    comparator: BenchmarkComparator,
    writers: Vec<Box<dyn ReportWriter>>,
    cancel: CancellationToken,
}

impl ValidationRunner {
    pub fn new(config: ValidationConfig, registry: ModelRegistry) -> Self {
        let comparator = BenchmarkComparator::from_config(&config.benchmark);
        let writers = default_writers(&config.report);
        Self {
            config,
            registry,
            comparator,
            writers,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_comparator(mut self, comparator: BenchmarkComparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_writers(mut self, writers: Vec<Box<dyn ReportWriter>>) -> Self {
        self.writers = writers;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Token that cancels the run at the next checkpoint.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn checkpoint(&self) -> Result<(), ValidationError> {
        if self.cancel.is_cancelled() {
            Err(ValidationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Load `path` and run. Loading failures are fatal and returned before
    /// anything is written.
    pub async fn run_path(&self, path: &Path) -> Result<RunOutcome, ValidationError> {
        let dataset = load_dataset(path)?;
        self.run(&dataset, &path.display().to_string()).await
    }

    /// Validate and write every enabled artifact to the output directory.
    pub async fn run(&self, dataset: &LoadedDataset, source: &str) -> Result<RunOutcome, ValidationError> {
        let report = self.validate(dataset, source).await?;
        let artifacts = write_all(&report, &self.config.report.output_dir, &self.writers);
        Ok(RunOutcome { report, artifacts })
    }

    /// Produce the report without writing it.
    pub async fn validate(
        &self,
        dataset: &LoadedDataset,
        source: &str,
    ) -> Result<ValidationReport, ValidationError> {
        self.config.validate()?;
        if self.registry.is_empty() {
            return Err(ValidationError::config("no models selected"));
        }
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let models = self.registry.models();
        let cities = &self.config.cities;
        tracing::info!(
            %run_id,
            source,
            cities = ?cities,
            models = ?self.registry.names(),
            "Starting validation run"
        );

        let data_quality = dataset
            .cities()
            .map(|ds| assess_city(ds, self.config.min_samples))
            .collect();

        self.checkpoint()?;
        let multi_city = MultiCityValidator::new(&self.config, self.cancel.clone())
            .validate_all_cities(models, dataset, cities)?;

        self.checkpoint()?;
        let forecasting = ForecastingValidator::new(&self.config, self.cancel.clone())
            .validate(models, dataset, cities)?;

        self.checkpoint()?;
        let benchmarks = if self.comparator.is_empty() {
            Err("no benchmark sources configured".to_string())
        } else {
            let queries: Vec<LiveQuery> = cities
                .iter()
                .filter_map(|name| dataset.city(name))
                .filter(|ds| ds.len() >= self.config.min_samples)
                .filter_map(|ds| {
                    ds.observations().last().map(|o| LiveQuery {
                        city: ds.city().to_string(),
                        latest_aqi: o.aqi,
                    })
                })
                .collect();
            let section = tokio::select! {
                section = self.comparator.run(&multi_city.records, &forecasting.records, &queries) => section,
                _ = self.cancel.cancelled() => return Err(ValidationError::Cancelled),
            };
            Ok(section)
        };

        let metadata = RunMetadata {
            run_id,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            finished_at: Utc::now(),
            dataset: DatasetSummary {
                source: source.to_string(),
                rows_read: dataset.rows_read(),
                observations: dataset.total_observations(),
                cities: dataset.city_names(),
                row_error_count: dataset.row_errors().len(),
                row_errors: dataset
                    .row_errors()
                    .iter()
                    .take(ROW_ERROR_SAMPLE)
                    .cloned()
                    .collect(),
            },
            validation_cities: cities.clone(),
            horizons: self.config.forecasting.horizons.clone(),
            models: self.registry.names(),
            data_quality,
            config: self.config.clone(),
        };

        let report = aggregate(ReportInputs {
            metadata,
            multi_city: Ok(multi_city),
            forecasting: Ok(forecasting),
            benchmarks,
        });
        tracing::info!(%run_id, summary = %report.summary.line(), "Validation run complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::observation::Observation;
    use crate::report::Section;
    use chrono::{Duration, TimeZone};

    fn dataset() -> LoadedDataset {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let obs = (0..150)
            .map(|i| {
                let aqi = 90.0 + 40.0 * (f64::from(i) / 7.0).sin();
                Observation::new("Delhi", start + Duration::hours(i64::from(i)), aqi)
            })
            .collect();
        LoadedDataset::from_observations(obs).unwrap()
    }

    fn config() -> ValidationConfig {
        let mut config = ValidationConfig::default();
        config.cities = vec!["Delhi".to_string()];
        config.forecasting.horizons = vec![1, 6];
        config.benchmark.include_published = false;
        config
    }

    #[tokio::test]
    async fn test_validate_without_benchmarks() {
        let runner = ValidationRunner::new(config(), ModelRegistry::builtin());
        let report = runner.validate(&dataset(), "memory").await.unwrap();
        assert!(report.multi_city.is_available());
        assert!(report.forecasting.is_available());
        assert!(matches!(report.benchmarks, Section::Unavailable { .. }));
        assert!(!report.generalization.is_available());
        assert_eq!(report.summary.total.succeeded, 4 + 4 * 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let runner = ValidationRunner::new(config(), ModelRegistry::builtin());
        runner.cancellation_token().cancel();
        let result = runner.validate(&dataset(), "memory").await;
        assert!(matches!(result, Err(ValidationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_registry_is_config_error() {
        let runner = ValidationRunner::new(config(), ModelRegistry::new());
        let result = runner.validate(&dataset(), "memory").await;
        assert!(matches!(result, Err(ValidationError::Config(_))));
    }

    #[tokio::test]
    async fn test_repeated_city_is_config_error() {
        let mut config = config();
        config.cities = vec!["Delhi".to_string(), "DELHI".to_string()];
        let runner = ValidationRunner::new(config, ModelRegistry::builtin());
        let result = runner.validate(&dataset(), "memory").await;
        assert!(matches!(result, Err(ValidationError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_path_missing_file_is_fatal() {
        let runner = ValidationRunner::new(config(), ModelRegistry::builtin());
        let err = runner
            .run_path(Path::new("/nonexistent/aqi.csv"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
