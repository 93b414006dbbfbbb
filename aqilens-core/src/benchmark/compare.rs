//! Comparison of computed metrics against reference figures.

use crate::benchmark::live::{BenchmarkProvider, LiveQuery, WaqiProvider, fetch_with_timeout};
use crate::benchmark::{
    BenchmarkMetric, BenchmarkReference, MetricDirection, load_references, published_references,
};
use crate::config::BenchmarkConfig;
use crate::metrics::round_metric;
use crate::validation::record::MetricRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Relative improvement of `model` over `benchmark`, in percent. Positive
/// means the model is better. `None` when the benchmark is zero.
pub fn improvement_pct(metric: BenchmarkMetric, model: f64, benchmark: f64) -> Option<f64> {
    if benchmark == 0.0 || !benchmark.is_finite() || !model.is_finite() {
        return None;
    }
    let pct = match metric.direction() {
        MetricDirection::LowerIsBetter => (benchmark - model) / benchmark * 100.0,
        MetricDirection::HigherIsBetter => (model - benchmark) / benchmark.abs() * 100.0,
    };
    Some(round_metric(pct))
}

fn beats(metric: BenchmarkMetric, model: f64, benchmark: f64) -> bool {
    match metric.direction() {
        MetricDirection::LowerIsBetter => model < benchmark,
        MetricDirection::HigherIsBetter => model > benchmark,
    }
}

/// One (model, source, metric[, city, horizon]) comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub model_name: String,
    pub source_name: String,
    pub city: String,
    pub metric: BenchmarkMetric,
    pub direction: MetricDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizon_hours: Option<u32>,
    pub model_value: f64,
    pub benchmark_value: f64,
    pub improvement_pct: Option<f64>,
    pub beats_benchmark: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceAvailability {
    Available,
    Unavailable,
}

/// Whether a reference source could be used in this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_name: String,
    pub status: SourceAvailability,
    pub references: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SourceStatus {
    fn available(source_name: &str, references: usize) -> Self {
        Self {
            source_name: source_name.to_string(),
            status: SourceAvailability::Available,
            references,
            reason: None,
        }
    }

    fn unavailable(source_name: &str, reason: impl Into<String>) -> Self {
        Self {
            source_name: source_name.to_string(),
            status: SourceAvailability::Unavailable,
            references: 0,
            reason: Some(reason.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == SourceAvailability::Available
    }
}

/// Benchmark part of the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSection {
    pub sources: Vec<SourceStatus>,
    pub comparisons: Vec<ComparisonRow>,
}

/// Compare every model against every applicable reference.
///
/// References with a horizon are matched against forecasting records at that
/// horizon, directional accuracy without a horizon against all forecasting
/// records, and everything else against multi-city records. City references
/// use that city's records; generic references use the model's mean over all
/// cities.
pub fn compare(
    references: &[BenchmarkReference],
    multi_city: &[MetricRecord],
    forecasting: &[MetricRecord],
) -> Vec<ComparisonRow> {
    let mut models: Vec<&str> = Vec::new();
    for record in multi_city.iter().chain(forecasting) {
        if !models.contains(&record.model_name.as_str()) {
            models.push(&record.model_name);
        }
    }

    let mut rows = Vec::new();
    for reference in references {
        let pool: Vec<&MetricRecord> = match reference.horizon_hours {
            Some(h) => forecasting
                .iter()
                .filter(|r| r.horizon_hours == Some(h))
                .collect(),
            None if reference.metric == BenchmarkMetric::DirectionalAccuracy => {
                forecasting.iter().collect()
            }
            None => multi_city.iter().collect(),
        };

        for model in &models {
            let values: Vec<f64> = pool
                .iter()
                .filter(|r| r.model_name == *model && r.is_ok())
                .filter(|r| reference.is_generic() || r.city.eq_ignore_ascii_case(&reference.city))
                .filter_map(|r| r.metric(reference.metric))
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                continue;
            }
            let model_value = round_metric(values.iter().sum::<f64>() / values.len() as f64);
            rows.push(ComparisonRow {
                model_name: model.to_string(),
                source_name: reference.source_name.clone(),
                city: reference.city.clone(),
                metric: reference.metric,
                direction: reference.metric.direction(),
                horizon_hours: reference.horizon_hours,
                model_value,
                benchmark_value: reference.value,
                improvement_pct: improvement_pct(reference.metric, model_value, reference.value),
                beats_benchmark: beats(reference.metric, model_value, reference.value),
            });
        }
    }
    rows
}

/// Static references plus live providers for one run.
pub struct BenchmarkComparator {
    static_sources: Vec<(String, Result<Vec<BenchmarkReference>, String>)>,
    providers: Vec<Arc<dyn BenchmarkProvider>>,
    timeout: Duration,
}

impl BenchmarkComparator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            static_sources: Vec::new(),
            providers: Vec::new(),
            timeout,
        }
    }

    /// Build from configuration. A reference file that fails to load becomes
    /// an unavailable source rather than an error.
    pub fn from_config(config: &BenchmarkConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let mut comparator = Self::new(timeout);
        if config.include_published {
            comparator.add_references(published_references());
        }
        if let Some(path) = &config.reference_file {
            let label = path.display().to_string();
            match load_references(path) {
                Ok(refs) => comparator.static_sources.push((label, Ok(refs))),
                Err(e) => {
                    tracing::warn!(path = %label, error = %e, "Benchmark reference file unavailable");
                    comparator.static_sources.push((label, Err(e.to_string())));
                }
            }
        }
        if let Some(token) = config.waqi_token.as_deref().filter(|t| !t.trim().is_empty()) {
            match WaqiProvider::new(&config.waqi_base_url, token, timeout) {
                Ok(provider) => comparator.add_provider(Arc::new(provider)),
                Err(e) => comparator.static_sources.push((
                    WaqiProvider::SOURCE_NAME.to_string(),
                    Err(format!("client setup failed: {e}")),
                )),
            }
        }
        comparator
    }

    /// Add static references; each distinct `source_name` is one source.
    pub fn add_references(&mut self, references: Vec<BenchmarkReference>) {
        let mut grouped: BTreeMap<String, Vec<BenchmarkReference>> = BTreeMap::new();
        for r in references {
            grouped.entry(r.source_name.clone()).or_default().push(r);
        }
        self.static_sources
            .extend(grouped.into_iter().map(|(name, refs)| (name, Ok(refs))));
    }

    pub fn add_provider(&mut self, provider: Arc<dyn BenchmarkProvider>) {
        self.providers.push(provider);
    }

    /// No static or live source is configured.
    pub fn is_empty(&self) -> bool {
        self.static_sources.is_empty() && self.providers.is_empty()
    }

    /// Collect references from every source and compare against them.
    pub async fn run(
        &self,
        multi_city: &[MetricRecord],
        forecasting: &[MetricRecord],
        queries: &[LiveQuery],
    ) -> BenchmarkSection {
        let mut sources = Vec::new();
        let mut references = Vec::new();

        for (name, refs) in &self.static_sources {
            match refs {
                Ok(refs) => {
                    sources.push(SourceStatus::available(name, refs.len()));
                    references.extend(refs.iter().cloned());
                }
                Err(reason) => sources.push(SourceStatus::unavailable(name, reason.clone())),
            }
        }

        for provider in &self.providers {
            match fetch_with_timeout(provider.as_ref(), queries, self.timeout).await {
                Ok(refs) => {
                    tracing::info!(source = provider.name(), count = refs.len(), "Live benchmark fetched");
                    sources.push(SourceStatus::available(provider.name(), refs.len()));
                    references.extend(refs);
                }
                Err(e) => {
                    tracing::warn!(source = provider.name(), error = %e, "Live benchmark unavailable");
                    sources.push(SourceStatus::unavailable(provider.name(), e.to_string()));
                }
            }
        }

        let comparisons = compare(&references, multi_city, forecasting);
        tracing::info!(
            sources = sources.len(),
            comparisons = comparisons.len(),
            "Benchmark comparison complete"
        );
        BenchmarkSection {
            sources,
            comparisons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchmarkError;
    use crate::metrics::regression_metrics;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn record(model: &str, city: &str, horizon: Option<u32>, rmse: f64, r2: f64) -> MetricRecord {
        let mut r = MetricRecord::from_metrics(
            model,
            city,
            horizon,
            &regression_metrics(&[1.0, 2.0], &[1.0, 2.0]).unwrap(),
        );
        r.rmse = Some(rmse);
        r.r2 = Some(r2);
        r
    }

    #[test]
    fn test_improvement_sign_conventions() {
        assert_eq!(improvement_pct(BenchmarkMetric::Rmse, 20.0, 25.0), Some(20.0));
        assert_eq!(improvement_pct(BenchmarkMetric::Rmse, 30.0, 25.0), Some(-20.0));
        assert_eq!(improvement_pct(BenchmarkMetric::R2, 0.9, 0.8), Some(12.5));
        assert_eq!(improvement_pct(BenchmarkMetric::R2, 0.1, -0.5), Some(120.0));
        assert_eq!(improvement_pct(BenchmarkMetric::Mae, 3.0, 0.0), None);
    }

    #[test]
    fn test_generic_and_city_matching() {
        let multi = vec![
            record("linear", "Delhi", None, 20.0, 0.9),
            record("linear", "Mumbai", None, 10.0, 0.7),
        ];
        let refs = vec![
            BenchmarkReference::new("paper", "generic", BenchmarkMetric::Rmse, 20.0),
            BenchmarkReference::new("delhi_paper", "delhi", BenchmarkMetric::R2, 0.8),
            BenchmarkReference::new("pune_paper", "Pune", BenchmarkMetric::R2, 0.8),
        ];
        let rows = compare(&refs, &multi, &[]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].model_value, 15.0);
        assert_eq!(rows[0].improvement_pct, Some(25.0));
        assert!(rows[0].beats_benchmark);
        assert_eq!(rows[1].model_value, 0.9);
        assert_eq!(rows[1].direction, MetricDirection::HigherIsBetter);
    }

    #[test]
    fn test_horizon_references_use_forecast_records() {
        let forecast = vec![
            record("persistence", "Delhi", Some(1), 5.0, 0.9),
            record("persistence", "Delhi", Some(24), 40.0, 0.1),
        ];
        let refs = vec![BenchmarkReference::new("paper", "generic", BenchmarkMetric::Rmse, 32.0).at_horizon(24)];
        let rows = compare(&refs, &[], &forecast);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].model_value, 40.0);
        assert!(!rows[0].beats_benchmark);
    }

    struct Unreachable;

    #[async_trait]
    impl BenchmarkProvider for Unreachable {
        fn name(&self) -> &str {
            "waqi_live"
        }

        async fn fetch(&self, _queries: &[LiveQuery]) -> Result<Vec<BenchmarkReference>, BenchmarkError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(BenchmarkError::Api("never".into()))
        }
    }

    #[tokio::test]
    async fn test_unreachable_provider_degrades() {
        let mut comparator = BenchmarkComparator::new(Duration::from_millis(20));
        comparator.add_references(published_references());
        comparator.add_provider(Arc::new(Unreachable));
        let multi = vec![record("linear", "Delhi", None, 20.0, 0.9)];

        let section = comparator.run(&multi, &[], &[]).await;
        let live = section
            .sources
            .iter()
            .find(|s| s.source_name == "waqi_live")
            .unwrap();
        assert_eq!(live.status, SourceAvailability::Unavailable);
        assert!(live.reason.as_deref().unwrap().contains("timed out"));
        assert!(section.sources.iter().filter(|s| s.is_available()).count() >= 3);
        assert!(!section.comparisons.is_empty());
    }

    /// Answers every city, taking `per_city` for each one in turn.
    struct SlowPerCity {
        per_city: Duration,
    }

    #[async_trait]
    impl BenchmarkProvider for SlowPerCity {
        fn name(&self) -> &str {
            "slow_live"
        }

        async fn fetch(&self, queries: &[LiveQuery]) -> Result<Vec<BenchmarkReference>, BenchmarkError> {
            let mut refs = Vec::new();
            for q in queries {
                tokio::time::sleep(self.per_city).await;
                refs.push(BenchmarkReference::new("slow_live", &q.city, BenchmarkMetric::Mae, 12.0));
            }
            Ok(refs)
        }
    }

    #[tokio::test]
    async fn test_slow_provider_keeps_its_references() {
        let mut comparator = BenchmarkComparator::new(Duration::from_millis(100));
        comparator.add_provider(Arc::new(SlowPerCity {
            per_city: Duration::from_millis(40),
        }));
        let queries: Vec<LiveQuery> = ["Delhi", "Mumbai", "Bangalore"]
            .iter()
            .map(|c| LiveQuery {
                city: c.to_string(),
                latest_aqi: 100.0,
            })
            .collect();

        let section = comparator.run(&[], &[], &queries).await;
        assert_eq!(section.sources.len(), 1);
        assert_eq!(section.sources[0].status, SourceAvailability::Available);
        assert_eq!(section.sources[0].references, 3);
    }

    #[test]
    fn test_missing_reference_file_is_unavailable_source() {
        let config = BenchmarkConfig {
            include_published: false,
            reference_file: Some("/nonexistent/refs.json".into()),
            ..BenchmarkConfig::default()
        };
        let comparator = BenchmarkComparator::from_config(&config);
        let section = tokio_test::block_on(comparator.run(&[], &[], &[]));
        assert_eq!(section.sources.len(), 1);
        assert_eq!(section.sources[0].status, SourceAvailability::Unavailable);
    }
}
