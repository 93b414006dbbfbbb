//! Error types for the aqilens-core crate.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for a validation run.
///
/// Only the fatal variants (`EmptyDataset`, `MissingColumns`, `Io` while opening
/// the dataset) abort a run. Everything else that goes wrong inside a run is
/// captured as data in the report instead of being returned.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("Dataset is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Validation run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ValidationError {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn report(msg: impl Into<String>) -> Self {
        Self::Report(msg.into())
    }

    /// Whether nothing downstream can proceed after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EmptyDataset(_) | Self::MissingColumns(_) | Self::Io(_) | Self::Csv(_)
        )
    }
}

/// Errors raised by a model adapter during fit or predict.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("model '{0}' has not been fitted")]
    NotFitted(String),

    #[error("insufficient training data: {0}")]
    InsufficientData(String),

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("model '{0}' cannot be refit")]
    NotTrainable(String),
}

/// Errors from live benchmark providers. These degrade a benchmark source to
/// "unavailable" and never abort a run.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error: {0}")]
    Api(String),

    #[error("unexpected response: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_names_columns() {
        let err = ValidationError::MissingColumns(vec!["city".into(), "aqi".into()]);
        assert_eq!(
            err.to_string(),
            "Dataset is missing required columns: city, aqi"
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_non_fatal_errors() {
        assert!(!ValidationError::config("bad horizon").is_fatal());
        assert!(!ValidationError::Cancelled.is_fatal());
    }

    #[test]
    fn test_sub_second_timeout_message() {
        let err = BenchmarkError::Timeout(Duration::from_millis(50));
        assert_eq!(err.to_string(), "request timed out after 50ms");
        let err = BenchmarkError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "request timed out after 10s");
    }
}
