//! External reference figures and the comparison of computed metrics
//! against them.
//!
//! References come from three places: a built-in table of published
//! figures, an optional user file (JSON or TOML), and live providers such as
//! the WAQI API. Live sources that fail are reported as unavailable; the
//! static references are always compared.

pub mod compare;
pub mod live;

pub use compare::{
    BenchmarkComparator, BenchmarkSection, ComparisonRow, SourceAvailability, SourceStatus,
    compare, improvement_pct,
};
pub use live::{BenchmarkProvider, LiveQuery, WaqiProvider};

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// City value of a reference that applies to every city.
pub const GENERIC_CITY: &str = "generic";

/// Which way a metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    LowerIsBetter,
    HigherIsBetter,
}

/// A metric that can be compared against a reference figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkMetric {
    Rmse,
    Mae,
    Mape,
    R2,
    DirectionalAccuracy,
}

impl BenchmarkMetric {
    pub const ALL: [BenchmarkMetric; 5] = [
        BenchmarkMetric::Rmse,
        BenchmarkMetric::Mae,
        BenchmarkMetric::Mape,
        BenchmarkMetric::R2,
        BenchmarkMetric::DirectionalAccuracy,
    ];

    pub fn direction(self) -> MetricDirection {
        match self {
            Self::Rmse | Self::Mae | Self::Mape => MetricDirection::LowerIsBetter,
            Self::R2 | Self::DirectionalAccuracy => MetricDirection::HigherIsBetter,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rmse => "rmse",
            Self::Mae => "mae",
            Self::Mape => "mape",
            Self::R2 => "r2",
            Self::DirectionalAccuracy => "directional_accuracy",
        }
    }
}

impl fmt::Display for BenchmarkMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BenchmarkMetric {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s.trim().to_ascii_lowercase().as_str() {
            "r²" | "r_squared" => "r2".to_string(),
            "accuracy" => "directional_accuracy".to_string(),
            other => other.to_string(),
        };
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == key)
            .ok_or_else(|| ValidationError::config(format!("unknown benchmark metric '{key}'")))
    }
}

/// One external reference figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReference {
    pub source_name: String,
    /// City the figure was measured on, or [`GENERIC_CITY`].
    #[serde(default = "default_city")]
    pub city: String,
    pub metric: BenchmarkMetric,
    pub value: f64,
    /// Forecast horizon the figure refers to; `None` for same-time accuracy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon_hours: Option<u32>,
}

fn default_city() -> String {
    GENERIC_CITY.to_string()
}

impl BenchmarkReference {
    pub fn new(source_name: &str, city: &str, metric: BenchmarkMetric, value: f64) -> Self {
        Self {
            source_name: source_name.to_string(),
            city: city.to_string(),
            metric,
            value,
            horizon_hours: None,
        }
    }

    pub fn at_horizon(mut self, hours: u32) -> Self {
        self.horizon_hours = Some(hours);
        self
    }

    pub fn is_generic(&self) -> bool {
        self.city.eq_ignore_ascii_case(GENERIC_CITY)
    }
}

/// Built-in reference figures typical of published AQI forecasting studies
/// and commercial forecast products.
pub fn published_references() -> Vec<BenchmarkReference> {
    use BenchmarkMetric::*;
    vec![
        BenchmarkReference::new("published_lstm_study", GENERIC_CITY, Rmse, 28.5),
        BenchmarkReference::new("published_lstm_study", GENERIC_CITY, R2, 0.82),
        BenchmarkReference::new("published_lstm_study", GENERIC_CITY, Rmse, 32.0).at_horizon(24),
        BenchmarkReference::new("published_xgboost_study", GENERIC_CITY, Mae, 19.4),
        BenchmarkReference::new("published_xgboost_study", GENERIC_CITY, R2, 0.87),
        BenchmarkReference::new("commercial_api_reported", GENERIC_CITY, Mae, 22.0),
        BenchmarkReference::new("commercial_api_reported", GENERIC_CITY, Mape, 18.0),
        BenchmarkReference::new("commercial_api_reported", GENERIC_CITY, DirectionalAccuracy, 0.62)
            .at_horizon(24),
        BenchmarkReference::new("published_delhi_study", "Delhi", Rmse, 41.3),
        BenchmarkReference::new("published_delhi_study", "Delhi", R2, 0.78),
    ]
}

#[derive(Deserialize)]
struct ReferenceFile {
    #[serde(default)]
    references: Vec<BenchmarkReference>,
}

/// Load references from a JSON or TOML file.
///
/// JSON may be a bare array or `{"references": [...]}`; TOML uses
/// `[[references]]` tables.
pub fn load_references(path: &Path) -> Result<Vec<BenchmarkReference>, ValidationError> {
    let content = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

    let references = if is_toml {
        toml::from_str::<ReferenceFile>(&content)
            .map_err(|e| ValidationError::config(format!("{}: {e}", path.display())))?
            .references
    } else if content.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<BenchmarkReference>>(&content)?
    } else {
        serde_json::from_str::<ReferenceFile>(&content)?.references
    };

    if let Some(bad) = references.iter().find(|r| !r.value.is_finite()) {
        return Err(ValidationError::config(format!(
            "{}: non-finite value for {} {}",
            path.display(),
            bad.source_name,
            bad.metric
        )));
    }
    tracing::info!(path = %path.display(), count = references.len(), "Loaded benchmark references");
    Ok(references)
}
