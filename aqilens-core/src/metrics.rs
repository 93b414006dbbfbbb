//! Regression and forecast accuracy metrics.

use serde::{Deserialize, Serialize};

/// Decimal places kept in reported metrics.
pub const METRIC_PRECISION: i32 = 6;

/// Accuracy of a set of predictions against observed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub n: usize,
    pub r2: f64,
    pub rmse: f64,
    pub mae: f64,
    /// Mean absolute percentage error; `None` when any actual value is zero.
    pub mape: Option<f64>,
    pub max_error: f64,
    pub median_absolute_error: f64,
    /// Mean of (predicted - actual).
    pub bias: f64,
}

/// Compute all regression metrics, or `None` for empty or mismatched inputs.
pub fn regression_metrics(actual: &[f64], predicted: &[f64]) -> Option<RegressionMetrics> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    Some(RegressionMetrics {
        n: actual.len(),
        r2: r2(actual, predicted),
        rmse: rmse(actual, predicted),
        mae: mae(actual, predicted),
        mape: mape(actual, predicted),
        max_error: max_error(actual, predicted),
        median_absolute_error: median_absolute_error(actual, predicted),
        bias: bias(actual, predicted),
    })
}

fn errors<'a>(actual: &'a [f64], predicted: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
    actual.iter().zip(predicted).map(|(a, p)| p - a)
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    (errors(actual, predicted).map(|e| e * e).sum::<f64>() / actual.len() as f64).sqrt()
}

pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    errors(actual, predicted).map(f64::abs).sum::<f64>() / actual.len() as f64
}

pub fn bias(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    errors(actual, predicted).sum::<f64>() / actual.len() as f64
}

/// Percentage error in [0, inf); undefined when an actual value is zero.
pub fn mape(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.iter().any(|a| *a == 0.0) {
        return None;
    }
    let total: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| ((a - p) / a).abs())
        .sum();
    Some(total / actual.len() as f64 * 100.0)
}

/// Coefficient of determination. At most 1.0, unbounded below.
///
/// A constant actual series scores 1.0 when predicted exactly and 0.0
/// otherwise.
pub fn r2(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = errors(actual, predicted).map(|e| e * e).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - ss_res / ss_tot).min(1.0)
}

pub fn max_error(actual: &[f64], predicted: &[f64]) -> f64 {
    errors(actual, predicted).map(f64::abs).fold(0.0, f64::max)
}

pub fn median_absolute_error(actual: &[f64], predicted: &[f64]) -> f64 {
    let mut abs: Vec<f64> = errors(actual, predicted).map(f64::abs).collect();
    if abs.is_empty() {
        return 0.0;
    }
    abs.sort_by(f64::total_cmp);
    let mid = abs.len() / 2;
    if abs.len() % 2 == 0 {
        (abs[mid - 1] + abs[mid]) / 2.0
    } else {
        abs[mid]
    }
}

/// Fraction of forecasts whose direction of change from the origin value
/// matches the observed direction. Changes within `1e-9` count as flat.
pub fn directional_accuracy(origin: &[f64], actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if origin.is_empty() || origin.len() != actual.len() || actual.len() != predicted.len() {
        return None;
    }
    let direction = |from: f64, to: f64| {
        let delta = to - from;
        if delta.abs() <= 1e-9 { 0 } else { delta.signum() as i8 }
    };
    let hits = origin
        .iter()
        .zip(actual.iter().zip(predicted))
        .filter(|(o, (a, p))| direction(**o, **a) == direction(**o, **p))
        .count();
    Some(hits as f64 / origin.len() as f64)
}

/// `1 - rmse_model / rmse_baseline`; positive means the model beats the
/// baseline. Undefined when the baseline is perfect.
pub fn skill_score(rmse_model: f64, rmse_baseline: f64) -> Option<f64> {
    if rmse_baseline <= 0.0 || !rmse_baseline.is_finite() || !rmse_model.is_finite() {
        return None;
    }
    Some(1.0 - rmse_model / rmse_baseline)
}

/// Round to [`METRIC_PRECISION`] decimal places.
pub fn round_metric(value: f64) -> f64 {
    let scale = 10f64.powi(METRIC_PRECISION);
    (value * scale).round() / scale
}
