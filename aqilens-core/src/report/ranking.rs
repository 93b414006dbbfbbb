//! Combined model ranking.

use crate::metrics::round_metric;
use crate::validation::record::MetricRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const R2_WEIGHT: f64 = 0.6;
pub const RMSE_WEIGHT: f64 = 0.4;

/// One model's place in the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub model_name: String,
    pub combined_score: f64,
    /// Mean hold-out R² across cities.
    pub mean_r2: Option<f64>,
    /// Mean forecasting RMSE across cities and horizons.
    pub mean_forecast_rmse: Option<f64>,
    /// `mean_forecast_rmse` divided by the largest such mean in the run.
    pub normalized_rmse: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

fn mean_of<'a>(
    records: &'a [MetricRecord],
    model: &str,
    pick: impl Fn(&'a MetricRecord) -> Option<f64>,
) -> Option<f64> {
    let values: Vec<f64> = records
        .iter()
        .filter(|r| r.model_name == model && r.is_ok())
        .filter_map(pick)
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Rank models by `0.6 * mean_r2 + 0.4 * (1 - mean_rmse / max_mean_rmse)`,
/// highest first, ties broken by the lower mean RMSE.
///
/// A model with no successful multi-city record scores 0 for the R² term; one
/// with no successful forecast scores the worst normalized RMSE (1).
pub fn rank_models(multi_city: &[MetricRecord], forecasting: &[MetricRecord]) -> Vec<RankingEntry> {
    let mut models: Vec<&str> = Vec::new();
    for record in multi_city.iter().chain(forecasting) {
        if !models.contains(&record.model_name.as_str()) {
            models.push(&record.model_name);
        }
    }

    let stats: Vec<(&str, Option<f64>, Option<f64>)> = models
        .iter()
        .map(|m| {
            (
                *m,
                mean_of(multi_city, m, |r| r.r2),
                mean_of(forecasting, m, |r| r.rmse),
            )
        })
        .collect();
    let max_rmse = stats
        .iter()
        .filter_map(|(_, _, rmse)| *rmse)
        .fold(0.0_f64, f64::max);

    let mut entries: Vec<RankingEntry> = stats
        .into_iter()
        .map(|(model, mean_r2, mean_rmse)| {
            let mut notes = Vec::new();
            let r2_term = mean_r2.unwrap_or_else(|| {
                notes.push("no multi-city R²; counted as 0".to_string());
                0.0
            });
            let normalized = mean_rmse.map(|rmse| if max_rmse > 0.0 { rmse / max_rmse } else { 0.0 });
            let rmse_term = normalized.unwrap_or_else(|| {
                notes.push("no forecasting RMSE; normalized RMSE counted as 1".to_string());
                1.0
            });
            RankingEntry {
                rank: 0,
                model_name: model.to_string(),
                combined_score: round_metric(R2_WEIGHT * r2_term + RMSE_WEIGHT * (1.0 - rmse_term)),
                mean_r2: mean_r2.map(round_metric),
                mean_forecast_rmse: mean_rmse.map(round_metric),
                normalized_rmse: normalized.map(round_metric),
                notes,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then_with(|| match (a.mean_forecast_rmse, b.mean_forecast_rmse) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.model_name.cmp(&b.model_name))
    });
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::regression_metrics;

    fn with(model: &str, horizon: Option<u32>, r2: f64, rmse: f64) -> MetricRecord {
        let metrics = regression_metrics(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        let mut record = MetricRecord::from_metrics(model, "Delhi", horizon, &metrics);
        record.r2 = Some(r2);
        record.rmse = Some(rmse);
        record
    }

    #[test]
    fn test_known_scores_rank_in_order() {
        let multi = vec![
            with("C", None, 0.7, 1.0),
            with("A", None, 0.9, 1.0),
            with("B", None, 0.8, 1.0),
        ];
        let forecast = vec![
            with("A", Some(1), 0.0, 10.0),
            with("B", Some(1), 0.0, 20.0),
            with("C", Some(1), 0.0, 30.0),
        ];
        let ranking = rank_models(&multi, &forecast);
        let order: Vec<&str> = ranking.iter().map(|e| e.model_name.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert_eq!(ranking[0].rank, 1);
        assert!((ranking[0].combined_score - 0.806667).abs() < 1e-6);
        assert!((ranking[2].combined_score - 0.42).abs() < 1e-9);
        assert_eq!(ranking[2].normalized_rmse, Some(1.0));
    }

    #[test]
    fn test_ties_broken_by_lower_rmse() {
        // 0.6 * 0.5 + 0.4 * (1 - 10/20) == 0.6 * 5/6 + 0.4 * (1 - 20/20)
        let multi = vec![with("zeta", None, 0.5, 1.0), with("alpha", None, 5.0 / 6.0, 1.0)];
        let forecast = vec![
            with("zeta", Some(1), 0.0, 10.0),
            with("alpha", Some(1), 0.0, 20.0),
        ];
        let ranking = rank_models(&multi, &forecast);
        assert_eq!(ranking[0].combined_score, ranking[1].combined_score);
        assert_eq!(ranking[0].model_name, "zeta");
    }

    #[test]
    fn test_missing_components_noted() {
        let multi = vec![with("nowcast_only", None, 0.95, 1.0)];
        let forecast = vec![with("forecast_only", Some(6), 0.0, 15.0)];
        let ranking = rank_models(&multi, &forecast);
        let nowcast = ranking.iter().find(|e| e.model_name == "nowcast_only").unwrap();
        assert!((nowcast.combined_score - 0.57).abs() < 1e-9);
        assert_eq!(nowcast.notes.len(), 1);
        let forecast_only = ranking.iter().find(|e| e.model_name == "forecast_only").unwrap();
        assert_eq!(forecast_only.combined_score, 0.0);
        assert_eq!(forecast_only.notes.len(), 1);
    }
}
