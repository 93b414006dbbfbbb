//! Flat CSV tables: multi-city summary, forecasting summary, rankings.

use crate::error::ValidationError;
use crate::report::ranking::RankingEntry;
use crate::report::writer::ReportWriter;
use crate::report::ValidationReport;
use crate::validation::record::{MetricRecord, RecordStatus};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const MULTI_CITY_CSV: &str = "multi_city_summary.csv";
pub const FORECASTING_CSV: &str = "forecasting_summary.csv";
pub const RANKINGS_CSV: &str = "model_rankings.csv";

const MULTI_CITY_HEADER: [&str; 11] = [
    "model_name",
    "city",
    "status",
    "n_samples",
    "r2",
    "rmse",
    "mae",
    "mape",
    "max_error",
    "median_absolute_error",
    "failure_reason",
];

const FORECASTING_HEADER: [&str; 16] = [
    "model_name",
    "city",
    "horizon_hours",
    "status",
    "n_samples",
    "r2",
    "rmse",
    "mae",
    "mape",
    "max_error",
    "median_absolute_error",
    "directional_accuracy",
    "bias",
    "skill_score",
    "no_skill",
    "failure_reason",
];

const RANKINGS_HEADER: [&str; 7] = [
    "rank",
    "model_name",
    "combined_score",
    "mean_r2",
    "mean_forecast_rmse",
    "normalized_rmse",
    "notes",
];

#[derive(Serialize)]
struct MultiCityRow<'a> {
    model_name: &'a str,
    city: &'a str,
    status: RecordStatus,
    n_samples: usize,
    r2: Option<f64>,
    rmse: Option<f64>,
    mae: Option<f64>,
    mape: Option<f64>,
    max_error: Option<f64>,
    median_absolute_error: Option<f64>,
    failure_reason: Option<&'a str>,
}

impl<'a> From<&'a MetricRecord> for MultiCityRow<'a> {
    fn from(r: &'a MetricRecord) -> Self {
        Self {
            model_name: &r.model_name,
            city: &r.city,
            status: r.status,
            n_samples: r.n_samples,
            r2: r.r2,
            rmse: r.rmse,
            mae: r.mae,
            mape: r.mape,
            max_error: r.max_error,
            median_absolute_error: r.median_absolute_error,
            failure_reason: r.failure_reason.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct ForecastingRow<'a> {
    model_name: &'a str,
    city: &'a str,
    horizon_hours: Option<u32>,
    status: RecordStatus,
    n_samples: usize,
    r2: Option<f64>,
    rmse: Option<f64>,
    mae: Option<f64>,
    mape: Option<f64>,
    max_error: Option<f64>,
    median_absolute_error: Option<f64>,
    directional_accuracy: Option<f64>,
    bias: Option<f64>,
    skill_score: Option<f64>,
    no_skill: bool,
    failure_reason: Option<&'a str>,
}

impl<'a> From<&'a MetricRecord> for ForecastingRow<'a> {
    fn from(r: &'a MetricRecord) -> Self {
        Self {
            model_name: &r.model_name,
            city: &r.city,
            horizon_hours: r.horizon_hours,
            status: r.status,
            n_samples: r.n_samples,
            r2: r.r2,
            rmse: r.rmse,
            mae: r.mae,
            mape: r.mape,
            max_error: r.max_error,
            median_absolute_error: r.median_absolute_error,
            directional_accuracy: r.directional_accuracy,
            bias: r.bias,
            skill_score: r.skill_score,
            no_skill: r.no_skill(),
            failure_reason: r.failure_reason.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct RankingRow<'a> {
    rank: usize,
    model_name: &'a str,
    combined_score: f64,
    mean_r2: Option<f64>,
    mean_forecast_rmse: Option<f64>,
    normalized_rmse: Option<f64>,
    notes: String,
}

impl<'a> From<&'a RankingEntry> for RankingRow<'a> {
    fn from(e: &'a RankingEntry) -> Self {
        Self {
            rank: e.rank,
            model_name: &e.model_name,
            combined_score: e.combined_score,
            mean_r2: e.mean_r2,
            mean_forecast_rmse: e.mean_forecast_rmse,
            normalized_rmse: e.normalized_rmse,
            notes: e.notes.join("; "),
        }
    }
}

/// Write a header followed by `rows`. The header is written even when there
/// are no rows so consumers always see the schema.
fn write_table<T: Serialize>(path: &Path, header: &[&str], rows: impl IntoIterator<Item = T>) -> Result<(), ValidationError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub struct CsvWriter;

impl ReportWriter for CsvWriter {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn write(&self, report: &ValidationReport, dir: &Path) -> Result<Vec<PathBuf>, ValidationError> {
        std::fs::create_dir_all(dir)?;

        let multi = dir.join(MULTI_CITY_CSV);
        write_table(&multi, &MULTI_CITY_HEADER, report.multi_city_records().iter().map(MultiCityRow::from))?;

        let forecasting = dir.join(FORECASTING_CSV);
        write_table(
            &forecasting,
            &FORECASTING_HEADER,
            report.forecasting_records().iter().map(ForecastingRow::from),
        )?;

        let rankings = dir.join(RANKINGS_CSV);
        let entries = report.rankings.data().map_or(&[][..], Vec::as_slice);
        write_table(&rankings, &RANKINGS_HEADER, entries.iter().map(RankingRow::from))?;

        Ok(vec![multi, forecasting, rankings])
    }
}
