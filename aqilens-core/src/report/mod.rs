//! The validation report and its serializers.
//!
//! A [`ValidationReport`] is assembled once at the end of a run by
//! [`aggregate`] and is read-only afterwards. Every optional part of it is a
//! [`Section`], so a validator that produced nothing shows up as an explicit
//! `unavailable` entry with a reason instead of disappearing.

pub mod markdown;
pub mod plot;
pub mod ranking;
pub mod tables;
pub mod writer;

pub use markdown::{MarkdownWriter, render_markdown};
pub use plot::PlotWriter;
pub use ranking::{RankingEntry, rank_models};
pub use tables::CsvWriter;
pub use writer::{ArtifactOutcome, JsonWriter, ReportWriter, default_writers, write_all};

use crate::benchmark::BenchmarkSection;
use crate::config::ValidationConfig;
use crate::data::source::RowError;
use crate::data::validate::CityDataQuality;
use crate::validation::forecasting::ForecastingOutcome;
use crate::validation::multi_city::{CityCoverage, MultiCityOutcome};
use crate::validation::record::{GeneralizationRecord, MetricRecord, OutcomeCounts, SkippedCity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A report section that is either present or explicitly absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Section<T> {
    Available { data: T },
    Unavailable { reason: String },
}

impl<T> Section<T> {
    pub fn available(data: T) -> Self {
        Self::Available { data }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Available { data } => Some(data),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Available { .. } => None,
            Self::Unavailable { reason } => Some(reason),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

impl<T> From<Result<T, String>> for Section<T> {
    fn from(result: Result<T, String>) -> Self {
        match result {
            Ok(data) => Self::available(data),
            Err(reason) => Self::unavailable(reason),
        }
    }
}

/// What was loaded from the input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub source: String,
    pub rows_read: usize,
    pub observations: usize,
    pub cities: Vec<String>,
    pub row_error_count: usize,
    /// The first few rejected rows.
    pub row_errors: Vec<RowError>,
}

/// Context of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dataset: DatasetSummary,
    pub validation_cities: Vec<String>,
    pub horizons: Vec<u32>,
    pub models: Vec<String>,
    pub data_quality: Vec<CityDataQuality>,
    pub config: ValidationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiCitySection {
    pub records: Vec<MetricRecord>,
    pub coverage: Vec<CityCoverage>,
}

/// A (model, city, horizon) that does not beat persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoSkillEntry {
    pub model_name: String,
    pub city: String,
    pub horizon_hours: Option<u32>,
    pub skill_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub multi_city: OutcomeCounts,
    pub forecasting: OutcomeCounts,
    pub total: OutcomeCounts,
    pub no_skill: Vec<NoSkillEntry>,
    pub unavailable_sections: Vec<String>,
}

impl RunSummary {
    /// The line printed at the end of a run.
    pub fn line(&self) -> String {
        format!(
            "{} succeeded, {} skipped, {} failed",
            self.total.succeeded, self.total.skipped, self.total.failed
        )
    }
}

/// Full result of one validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub run_metadata: RunMetadata,
    pub multi_city: Section<MultiCitySection>,
    pub generalization: Section<Vec<GeneralizationRecord>>,
    pub forecasting: Section<Vec<MetricRecord>>,
    pub benchmarks: Section<BenchmarkSection>,
    pub rankings: Section<Vec<RankingEntry>>,
    pub skipped_cities: Vec<SkippedCity>,
    pub summary: RunSummary,
}

impl ValidationReport {
    pub fn multi_city_records(&self) -> &[MetricRecord] {
        self.multi_city
            .data()
            .map_or(&[][..], |s| s.records.as_slice())
    }

    pub fn forecasting_records(&self) -> &[MetricRecord] {
        self.forecasting.data().map_or(&[][..], Vec::as_slice)
    }
}

/// Validator outputs handed to [`aggregate`]. `Err` carries the reason a
/// section could not be produced.
pub struct ReportInputs {
    pub metadata: RunMetadata,
    pub multi_city: Result<MultiCityOutcome, String>,
    pub forecasting: Result<ForecastingOutcome, String>,
    pub benchmarks: Result<BenchmarkSection, String>,
}

/// Merge validator outputs into one report.
pub fn aggregate(inputs: ReportInputs) -> ValidationReport {
    let ReportInputs {
        metadata,
        multi_city,
        forecasting,
        benchmarks,
    } = inputs;

    let mut skipped_cities: Vec<SkippedCity> = Vec::new();
    let mut add_skipped = |cities: &[SkippedCity]| {
        for city in cities {
            if !skipped_cities.iter().any(|s| s.city == city.city) {
                skipped_cities.push(city.clone());
            }
        }
    };

    let (multi_city, generalization) = match multi_city {
        Ok(outcome) => {
            add_skipped(&outcome.skipped_cities);
            let section = if outcome.records.is_empty() {
                Section::unavailable("no cities were validated")
            } else {
                Section::available(MultiCitySection {
                    records: outcome.records,
                    coverage: outcome.coverage,
                })
            };
            (section, Section::from(outcome.generalization))
        }
        Err(reason) => (
            Section::unavailable(reason.clone()),
            Section::unavailable(reason),
        ),
    };

    let forecasting = match forecasting {
        Ok(outcome) => {
            add_skipped(&outcome.skipped_cities);
            if outcome.records.is_empty() {
                Section::unavailable("no forecasts were evaluated")
            } else {
                Section::available(outcome.records)
            }
        }
        Err(reason) => Section::unavailable(reason),
    };

    let multi_records = multi_city.data().map_or(&[][..], |s| s.records.as_slice());
    let forecast_records = forecasting.data().map_or(&[][..], Vec::as_slice);

    let rankings = if multi_records.iter().chain(forecast_records).any(MetricRecord::is_ok) {
        Section::available(rank_models(multi_records, forecast_records))
    } else {
        Section::unavailable("no successful evaluations to rank")
    };

    let multi_counts = OutcomeCounts::tally(multi_records);
    let forecast_counts = OutcomeCounts::tally(forecast_records);
    let no_skill = forecast_records
        .iter()
        .filter(|r| r.no_skill())
        .map(|r| NoSkillEntry {
            model_name: r.model_name.clone(),
            city: r.city.clone(),
            horizon_hours: r.horizon_hours,
            skill_score: r.skill_score,
        })
        .collect();

    let benchmarks = Section::from(benchmarks);

    let mut unavailable_sections = Vec::new();
    for (name, available) in [
        ("multi_city", multi_city.is_available()),
        ("generalization", generalization.is_available()),
        ("forecasting", forecasting.is_available()),
        ("benchmarks", benchmarks.is_available()),
        ("rankings", rankings.is_available()),
    ] {
        if !available {
            unavailable_sections.push(name.to_string());
        }
    }

    let summary = RunSummary {
        multi_city: multi_counts,
        forecasting: forecast_counts,
        total: multi_counts.merge(forecast_counts),
        no_skill,
        unavailable_sections,
    };

    ValidationReport {
        run_metadata: metadata,
        multi_city,
        generalization,
        forecasting,
        benchmarks,
        rankings,
        skipped_cities,
        summary,
    }
}

/// Format an optional metric for human-readable output.
pub(crate) fn fmt_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::benchmark::{BenchmarkMetric, BenchmarkReference, compare};
    use crate::metrics::regression_metrics;

    pub fn record(model: &str, city: &str, horizon: Option<u32>, scale: f64) -> MetricRecord {
        let actual = [50.0, 80.0, 120.0, 160.0];
        let predicted: Vec<f64> = actual.iter().map(|a| a + scale).collect();
        let metrics = regression_metrics(&actual, &predicted).unwrap();
        let record = MetricRecord::from_metrics(model, city, horizon, &metrics);
        if horizon.is_some() {
            record.with_forecast_scores(Some(0.75), metrics.bias, Some(1.0 - scale / 20.0))
        } else {
            record
        }
    }

    pub fn metadata() -> RunMetadata {
        let at = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        RunMetadata {
            run_id: Uuid::nil(),
            tool_version: "test".to_string(),
            started_at: at,
            finished_at: at,
            dataset: DatasetSummary {
                source: "memory".to_string(),
                rows_read: 1000,
                observations: 990,
                cities: vec!["Delhi".to_string(), "Mumbai".to_string()],
                row_error_count: 0,
                row_errors: Vec::new(),
            },
            validation_cities: vec!["Delhi".to_string(), "Mumbai".to_string(), "Goa".to_string()],
            horizons: vec![1, 24],
            models: vec!["linear".to_string(), "persistence".to_string()],
            data_quality: Vec::new(),
            config: ValidationConfig::default(),
        }
    }

    /// A report with every section populated except the live benchmark.
    pub fn sample_report() -> ValidationReport {
        let multi = vec![
            record("linear", "Delhi", None, 4.0),
            record("linear", "Mumbai", None, 6.0),
            record("persistence", "Delhi", None, 10.0),
            record("persistence", "Mumbai", None, 12.0),
            MetricRecord::skipped("linear", "Goa", None, "skipped: insufficient data"),
        ];
        let forecast = vec![
            record("linear", "Delhi", Some(1), 3.0),
            record("linear", "Delhi", Some(24), 9.0),
            record("persistence", "Delhi", Some(1), 5.0),
            record("persistence", "Delhi", Some(24), 25.0),
        ];
        let references = vec![BenchmarkReference::new(
            "paper",
            "generic",
            BenchmarkMetric::Rmse,
            8.0,
        )];
        let comparisons = compare(&references, &multi, &forecast);
        aggregate(ReportInputs {
            metadata: metadata(),
            multi_city: Ok(MultiCityOutcome {
                records: multi,
                generalization: Err("leave-one-city-out check disabled".to_string()),
                skipped_cities: vec![SkippedCity {
                    city: "Goa".to_string(),
                    observations: 10,
                    reason: "skipped: insufficient data".to_string(),
                }],
                coverage: Vec::new(),
            }),
            forecasting: Ok(ForecastingOutcome {
                records: forecast,
                skipped_cities: vec![SkippedCity {
                    city: "Goa".to_string(),
                    observations: 10,
                    reason: "skipped: insufficient data".to_string(),
                }],
            }),
            benchmarks: Ok(BenchmarkSection {
                sources: Vec::new(),
                comparisons,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_section_json_shape() {
        let section: Section<Vec<u32>> = Section::unavailable("source timed out");
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["reason"], "source timed out");

        let section = Section::available(vec![1u32]);
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["status"], "available");
        assert_eq!(json["data"][0], 1);
    }

    #[test]
    fn test_aggregate_marks_missing_sections() {
        let report = aggregate(ReportInputs {
            metadata: metadata(),
            multi_city: Err("cancelled before multi-city validation".to_string()),
            forecasting: Ok(ForecastingOutcome::default()),
            benchmarks: Err("no benchmark sources configured".to_string()),
        });
        assert!(!report.multi_city.is_available());
        assert!(!report.generalization.is_available());
        assert!(!report.forecasting.is_available());
        assert!(!report.rankings.is_available());
        assert_eq!(
            report.summary.unavailable_sections,
            vec!["multi_city", "generalization", "forecasting", "benchmarks", "rankings"]
        );
        assert_eq!(report.summary.line(), "0 succeeded, 0 skipped, 0 failed");
    }

    #[test]
    fn test_sample_report_summary() {
        let report = sample_report();
        assert_eq!(report.summary.line(), "8 succeeded, 1 skipped, 0 failed");
        assert_eq!(report.skipped_cities.len(), 1);
        assert_eq!(report.summary.no_skill.len(), 1);
        assert_eq!(report.summary.no_skill[0].horizon_hours, Some(24));
        let rankings = report.rankings.data().unwrap();
        assert_eq!(rankings[0].model_name, "linear");
    }
}
