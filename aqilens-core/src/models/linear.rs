//! Ridge-regularized linear regression over standardized features.

use crate::error::{ModelError, ValidationError};
use crate::features::{FEATURE_NAMES, FeatureRow, TrainingSample};
use crate::models::{Model, Predictor};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

const DEFAULT_LAMBDA: f64 = 1.0;
const PIVOT_EPSILON: f64 = 1e-12;

/// Fitted (or externally supplied) linear model.
///
/// Missing features are imputed with `means`; each feature is standardized
/// as `(x - mean) / scale` before weighting. Empty `weights` means the model
/// predicts `intercept` for every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearCoefficients {
    #[serde(default)]
    pub name: Option<String>,
    pub intercept: f64,
    #[serde(default)]
    pub means: Vec<f64>,
    #[serde(default)]
    pub scales: Vec<f64>,
    #[serde(default)]
    pub weights: Vec<f64>,
}

impl LinearCoefficients {
    pub fn constant(value: f64) -> Self {
        Self {
            name: None,
            intercept: value,
            means: Vec::new(),
            scales: Vec::new(),
            weights: Vec::new(),
        }
    }

    /// Load coefficients from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path)?;
        let coefficients: Self = serde_json::from_str(&content)?;
        coefficients.check_shape().map_err(|e| {
            ValidationError::config(format!("{}: {e}", path.display()))
        })?;
        Ok(coefficients)
    }

    fn check_shape(&self) -> Result<(), ModelError> {
        if self.weights.is_empty() {
            return Ok(());
        }
        let p = FEATURE_NAMES.len();
        if self.weights.len() != p || self.means.len() != p || self.scales.len() != p {
            return Err(ModelError::Prediction(format!(
                "expected {p} weights, means and scales, got {}/{}/{}",
                self.weights.len(),
                self.means.len(),
                self.scales.len()
            )));
        }
        Ok(())
    }
}

impl Predictor for LinearCoefficients {
    fn predict(&self, features: &FeatureRow) -> Result<f64, ModelError> {
        self.check_shape()?;
        let x = features.vector();
        let mut value = self.intercept;
        for (i, w) in self.weights.iter().enumerate() {
            let raw = if x[i].is_finite() { x[i] } else { self.means[i] };
            value += w * (raw - self.means[i]) / self.scales[i];
        }
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ModelError::Numerical("non-finite prediction".to_string()))
        }
    }
}

/// Ridge regression model; refits from scratch on every call to `fit`.
#[derive(Debug, Clone)]
pub struct LinearModel {
    name: String,
    lambda: f64,
    pretrained: Option<Arc<LinearCoefficients>>,
}

impl Default for LinearModel {
    fn default() -> Self {
        Self::new("linear", DEFAULT_LAMBDA)
    }
}

impl LinearModel {
    pub fn new(name: impl Into<String>, lambda: f64) -> Self {
        Self {
            name: name.into(),
            lambda: lambda.max(0.0),
            pretrained: None,
        }
    }

    pub fn with_pretrained(mut self, coefficients: LinearCoefficients) -> Self {
        self.pretrained = Some(Arc::new(coefficients));
        self
    }

    /// A linear model carrying coefficients from `path`; named after the
    /// coefficients' `name` or the file stem.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let coefficients = LinearCoefficients::from_file(path)?;
        let name = coefficients.name.clone().unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("pretrained")
                .to_string()
        });
        Ok(Self::new(name, DEFAULT_LAMBDA).with_pretrained(coefficients))
    }

    /// Solve the ridge normal equations for `samples`.
    pub fn solve(&self, samples: &[TrainingSample]) -> Result<LinearCoefficients, ModelError> {
        let n = samples.len();
        if n < 2 {
            return Err(ModelError::InsufficientData(format!(
                "{} needs at least 2 samples, got {n}",
                self.name
            )));
        }
        if let Some(bad) = samples.iter().find(|s| !s.target.is_finite()) {
            return Err(ModelError::Numerical(format!(
                "non-finite target {}",
                bad.target
            )));
        }

        let p = FEATURE_NAMES.len();
        let mut rows: Vec<Vec<f64>> = samples.iter().map(|s| s.features.vector()).collect();

        let mut means = vec![0.0; p];
        for (j, mean) in means.iter_mut().enumerate() {
            let (sum, count) = rows
                .iter()
                .map(|r| r[j])
                .filter(|v| v.is_finite())
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count > 0 {
                *mean = sum / count as f64;
            }
        }
        for row in &mut rows {
            for (v, mean) in row.iter_mut().zip(&means) {
                if !v.is_finite() {
                    *v = *mean;
                }
            }
        }

        let mut scales = vec![1.0; p];
        for (j, scale) in scales.iter_mut().enumerate() {
            let var = rows.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n as f64;
            let sd = var.sqrt();
            if sd > PIVOT_EPSILON {
                *scale = sd;
            }
        }

        let y_mean = samples.iter().map(|s| s.target).sum::<f64>() / n as f64;

        // A = Z'Z + lambda*I, b = Z'(y - mean)
        let mut a = vec![vec![0.0; p]; p];
        let mut b = vec![0.0; p];
        for (row, sample) in rows.iter().zip(samples) {
            let z: Vec<f64> = (0..p).map(|j| (row[j] - means[j]) / scales[j]).collect();
            let y = sample.target - y_mean;
            for i in 0..p {
                b[i] += z[i] * y;
                for j in i..p {
                    a[i][j] += z[i] * z[j];
                }
            }
        }
        for i in 0..p {
            a[i][i] += self.lambda;
            for j in 0..i {
                a[i][j] = a[j][i];
            }
        }

        let weights = solve_linear_system(a, b)?;
        Ok(LinearCoefficients {
            name: Some(self.name.clone()),
            intercept: y_mean,
            means,
            scales,
            weights,
        })
    }
}

impl Model for LinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&self, samples: &[TrainingSample]) -> Result<Arc<dyn Predictor>, ModelError> {
        Ok(Arc::new(self.solve(samples)?))
    }

    fn pretrained(&self) -> Option<Arc<dyn Predictor>> {
        self.pretrained
            .clone()
            .map(|c| c as Arc<dyn Predictor>)
    }
}

/// Gaussian elimination with partial pivoting.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, ModelError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < PIVOT_EPSILON {
            return Err(ModelError::Numerical(
                "singular system in ridge solve".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(ModelError::Numerical("non-finite ridge weights".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pm25: f64, temperature: Option<f64>, target: f64) -> TrainingSample {
        TrainingSample {
            features: FeatureRow {
                horizon_hours: 0,
                target_hour: 12,
                current_aqi: 50.0,
                mean_aqi_window: 50.0,
                seasonal_aqi: None,
                pm25: Some(pm25),
                pm10: None,
                no2: None,
                so2: None,
                co: None,
                o3: None,
                temperature,
                humidity: None,
                wind_speed: None,
            },
            target,
        }
    }

    #[test]
    fn test_solve_small_system() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let x = solve_linear_system(a, vec![3.0, 5.0]).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_linear_recovers_trend() {
        let samples: Vec<_> = (0..200)
            .map(|i| {
                let pm = i as f64;
                sample(pm, Some(20.0 + (i % 7) as f64), 2.0 * pm + 10.0)
            })
            .collect();
        let model = LinearModel::new("ridge", 1e-6);
        let predictor = model.fit(&samples).unwrap();
        let predicted = predictor.predict(&sample(50.0, Some(22.0), 0.0).features).unwrap();
        assert!((predicted - 110.0).abs() < 1e-3, "got {predicted}");
    }

    #[test]
    fn test_missing_feature_imputed_with_mean() {
        let samples: Vec<_> = (0..20)
            .map(|i| sample(i as f64, Some(i as f64), i as f64))
            .collect();
        let coefficients = LinearModel::default().solve(&samples).unwrap();
        let with_mean = coefficients
            .predict(&sample(9.5, Some(9.5), 0.0).features)
            .unwrap();
        let imputed = coefficients.predict(&sample(9.5, None, 0.0).features).unwrap();
        assert!((with_mean - imputed).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_samples() {
        let err = LinearModel::default().solve(&[sample(1.0, None, 1.0)]).unwrap_err();
        assert!(matches!(err, ModelError::InsufficientData(_)));
    }

    #[test]
    fn test_coefficients_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("city_gbm.json");
        std::fs::write(&path, r#"{"intercept": 88.5}"#).unwrap();
        let model = LinearModel::from_file(&path).unwrap();
        assert_eq!(model.name(), "city_gbm");
        let predictor = model.pretrained().unwrap();
        assert_eq!(predictor.predict(&sample(1.0, None, 0.0).features), Ok(88.5));

        std::fs::write(&path, r#"{"intercept": 1.0, "weights": [1.0]}"#).unwrap();
        assert!(LinearModel::from_file(&path).is_err());
    }
}
