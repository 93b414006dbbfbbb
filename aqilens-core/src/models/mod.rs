//! Model adapters.
//!
//! The validators treat a model as two capabilities: a [`Predictor`] maps one
//! feature row to an AQI value, and a [`Model`] produces predictors by fitting
//! on training samples (or hands out a pre-trained one). Any closure
//! `Fn(&FeatureRow) -> Result<f64, ModelError>` is a predictor.

pub mod baseline;
pub mod linear;

use crate::error::{ModelError, ValidationError};
use crate::features::{FeatureRow, TrainingSample};
use std::sync::Arc;

pub use baseline::{MovingAverageModel, PersistenceModel, SeasonalNaiveModel};
pub use linear::{LinearCoefficients, LinearModel};

/// Anything that can predict an AQI value from a feature row.
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &FeatureRow) -> Result<f64, ModelError>;
}

impl<F> Predictor for F
where
    F: Fn(&FeatureRow) -> Result<f64, ModelError> + Send + Sync,
{
    fn predict(&self, features: &FeatureRow) -> Result<f64, ModelError> {
        self(features)
    }
}

/// A named model the validators can fit and evaluate.
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    /// Fit on `samples` and return a predictor. Must not retain state between
    /// calls; validators call this many times with different training sets.
    fn fit(&self, samples: &[TrainingSample]) -> Result<Arc<dyn Predictor>, ModelError>;

    /// A predictor trained outside this run, if any.
    fn pretrained(&self) -> Option<Arc<dyn Predictor>> {
        None
    }

    /// Whether [`Model::fit`] can produce a predictor.
    fn trainable(&self) -> bool {
        true
    }
}

/// Wraps an opaque, externally trained predictor.
pub struct PretrainedModel {
    name: String,
    predictor: Arc<dyn Predictor>,
}

impl PretrainedModel {
    pub fn new(name: impl Into<String>, predictor: Arc<dyn Predictor>) -> Self {
        Self {
            name: name.into(),
            predictor,
        }
    }
}

impl Model for PretrainedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&self, _samples: &[TrainingSample]) -> Result<Arc<dyn Predictor>, ModelError> {
        Err(ModelError::NotTrainable(self.name.clone()))
    }

    fn pretrained(&self) -> Option<Arc<dyn Predictor>> {
        Some(self.predictor.clone())
    }

    fn trainable(&self) -> bool {
        false
    }
}

/// Pick the predictor for a training set: the pre-trained one unless
/// `force_retrain` is set (or the model cannot be trained), otherwise a fresh fit.
pub fn resolve_predictor(
    model: &dyn Model,
    samples: &[TrainingSample],
    force_retrain: bool,
) -> Result<Arc<dyn Predictor>, ModelError> {
    match model.pretrained() {
        Some(predictor) if !force_retrain || !model.trainable() => Ok(predictor),
        _ => model.fit(samples),
    }
}

/// Ordered collection of models evaluated in a run.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: Vec<Arc<dyn Model>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persistence, moving average, seasonal naive and ridge regression.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PersistenceModel));
        registry.register(Arc::new(MovingAverageModel));
        registry.register(Arc::new(SeasonalNaiveModel));
        registry.register(Arc::new(LinearModel::default()));
        registry
    }

    /// Add a model, replacing any model with the same name in place.
    pub fn register(&mut self, model: Arc<dyn Model>) {
        if let Some(slot) = self.models.iter_mut().find(|m| m.name() == model.name()) {
            *slot = model;
        } else {
            self.models.push(model);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Model>> {
        self.models.iter().find(|m| m.name() == name).cloned()
    }

    /// Keep only the named models, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Self, ValidationError> {
        let mut selected = Self::new();
        for name in names {
            let model = self
                .get(name)
                .ok_or_else(|| ValidationError::config(format!("unknown model '{name}'")))?;
            selected.register(model);
        }
        Ok(selected)
    }

    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn models(&self) -> &[Arc<dyn Model>] {
        &self.models
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }
}
