//! Result records produced by the validators.

use crate::benchmark::BenchmarkMetric;
use crate::metrics::{RegressionMetrics, round_metric};
use serde::{Deserialize, Serialize};

/// Outcome of one (model, city[, horizon]) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Ok,
    Skipped,
    Failed,
}

/// Accuracy of one model on one city, optionally at one forecast horizon.
///
/// Skipped and failed records carry no metrics and a `failure_reason`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub model_name: String,
    pub city: String,
    pub horizon_hours: Option<u32>,
    pub status: RecordStatus,
    pub n_samples: usize,
    pub r2: Option<f64>,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    pub mape: Option<f64>,
    pub max_error: Option<f64>,
    pub median_absolute_error: Option<f64>,
    pub directional_accuracy: Option<f64>,
    pub bias: Option<f64>,
    pub skill_score: Option<f64>,
    pub failure_reason: Option<String>,
}

impl MetricRecord {
    fn empty(
        model_name: &str,
        city: &str,
        horizon_hours: Option<u32>,
        status: RecordStatus,
        failure_reason: Option<String>,
    ) -> Self {
        Self {
            model_name: model_name.to_string(),
            city: city.to_string(),
            horizon_hours,
            status,
            n_samples: 0,
            r2: None,
            rmse: None,
            mae: None,
            mape: None,
            max_error: None,
            median_absolute_error: None,
            directional_accuracy: None,
            bias: None,
            skill_score: None,
            failure_reason,
        }
    }

    /// A successful record; values are rounded to metric precision.
    pub fn from_metrics(
        model_name: &str,
        city: &str,
        horizon_hours: Option<u32>,
        metrics: &RegressionMetrics,
    ) -> Self {
        let mut record = Self::empty(model_name, city, horizon_hours, RecordStatus::Ok, None);
        record.n_samples = metrics.n;
        record.r2 = Some(round_metric(metrics.r2));
        record.rmse = Some(round_metric(metrics.rmse));
        record.mae = Some(round_metric(metrics.mae));
        record.mape = metrics.mape.map(round_metric);
        record.max_error = Some(round_metric(metrics.max_error));
        record.median_absolute_error = Some(round_metric(metrics.median_absolute_error));
        record
    }

    pub fn with_forecast_scores(
        mut self,
        directional_accuracy: Option<f64>,
        bias: f64,
        skill_score: Option<f64>,
    ) -> Self {
        self.directional_accuracy = directional_accuracy.map(round_metric);
        self.bias = Some(round_metric(bias));
        self.skill_score = skill_score.map(round_metric);
        self
    }

    pub fn failed(
        model_name: &str,
        city: &str,
        horizon_hours: Option<u32>,
        reason: impl Into<String>,
    ) -> Self {
        Self::empty(
            model_name,
            city,
            horizon_hours,
            RecordStatus::Failed,
            Some(reason.into()),
        )
    }

    pub fn skipped(
        model_name: &str,
        city: &str,
        horizon_hours: Option<u32>,
        reason: impl Into<String>,
    ) -> Self {
        Self::empty(
            model_name,
            city,
            horizon_hours,
            RecordStatus::Skipped,
            Some(reason.into()),
        )
    }

    pub fn is_ok(&self) -> bool {
        self.status == RecordStatus::Ok
    }

    /// The model does not beat persistence at this horizon.
    pub fn no_skill(&self) -> bool {
        self.skill_score.is_some_and(|s| s <= 0.0)
    }

    pub fn metric(&self, metric: BenchmarkMetric) -> Option<f64> {
        match metric {
            BenchmarkMetric::Rmse => self.rmse,
            BenchmarkMetric::Mae => self.mae,
            BenchmarkMetric::Mape => self.mape,
            BenchmarkMetric::R2 => self.r2,
            BenchmarkMetric::DirectionalAccuracy => self.directional_accuracy,
        }
    }
}

/// A city excluded from validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCity {
    pub city: String,
    pub observations: usize,
    pub reason: String,
}

/// Leave-one-city-out result for one (model, city).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralizationRecord {
    pub model_name: String,
    pub city: String,
    pub same_city_rmse: Option<f64>,
    pub leave_one_out_rmse: Option<f64>,
    /// `leave_one_out_rmse - same_city_rmse`; positive means the model does
    /// worse on a city it never saw.
    pub generalization_gap: Option<f64>,
    pub failure_reason: Option<String>,
}

/// Counts of (model, city, horizon) combinations by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a MetricRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            match record.status {
                RecordStatus::Ok => counts.succeeded += 1,
                RecordStatus::Skipped => counts.skipped += 1,
                RecordStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            succeeded: self.succeeded + other.succeeded,
            skipped: self.skipped + other.skipped,
            failed: self.failed + other.failed,
        }
    }
}
