//! Reference models that need no training.

use crate::error::ModelError;
use crate::features::{FeatureRow, TrainingSample};
use crate::models::{Model, Predictor};
use std::sync::Arc;

fn finite(value: f64, what: &str) -> Result<f64, ModelError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ModelError::Prediction(format!("{what} is not available")))
    }
}

/// Predicts that the AQI stays at its latest known value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistenceModel;

impl Model for PersistenceModel {
    fn name(&self) -> &str {
        "persistence"
    }

    fn fit(&self, _samples: &[TrainingSample]) -> Result<Arc<dyn Predictor>, ModelError> {
        Ok(Arc::new(|f: &FeatureRow| finite(f.current_aqi, "current AQI")))
    }
}

/// Predicts the mean AQI of the history window.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovingAverageModel;

impl Model for MovingAverageModel {
    fn name(&self) -> &str {
        "moving_average"
    }

    fn fit(&self, _samples: &[TrainingSample]) -> Result<Arc<dyn Predictor>, ModelError> {
        Ok(Arc::new(|f: &FeatureRow| {
            finite(f.mean_aqi_window, "window mean AQI")
        }))
    }
}

/// Predicts the AQI observed at the same hour on the latest known day,
/// falling back to persistence when that hour was not recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeasonalNaiveModel;

impl Model for SeasonalNaiveModel {
    fn name(&self) -> &str {
        "seasonal_naive"
    }

    fn fit(&self, _samples: &[TrainingSample]) -> Result<Arc<dyn Predictor>, ModelError> {
        Ok(Arc::new(|f: &FeatureRow| match f.seasonal_aqi {
            Some(v) => finite(v, "seasonal AQI"),
            None => finite(f.current_aqi, "current AQI"),
        }))
    }
}
