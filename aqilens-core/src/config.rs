//! Configuration for a validation run.
//!
//! Every validator takes the relevant part of [`ValidationConfig`] explicitly;
//! nothing reads global state. [`load_config`] layers defaults, config files and
//! `AQILENS_` environment variables with figment.

use crate::error::ValidationError;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration of one validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Cities evaluated by both validators.
    #[serde(default = "default_cities")]
    pub cities: Vec<String>,
    /// Minimum observations a city needs before it is validated at all.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Seed for the stratified hold-out sampler.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Refit models even when a pre-trained predictor is available.
    #[serde(default)]
    pub force_retrain: bool,
    /// Validate cities on scoped worker threads.
    #[serde(default)]
    pub parallel: bool,
    /// Multi-city hold-out settings.
    #[serde(default)]
    pub multi_city: MultiCityConfig,
    /// Walk-forward forecasting settings.
    #[serde(default)]
    pub forecasting: ForecastingConfig,
    /// Benchmark comparison settings.
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    /// Report output settings.
    #[serde(default)]
    pub report: ReportConfig,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            cities: default_cities(),
            min_samples: default_min_samples(),
            seed: default_seed(),
            force_retrain: false,
            parallel: false,
            multi_city: MultiCityConfig::default(),
            forecasting: ForecastingConfig::default(),
            benchmark: BenchmarkConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl ValidationConfig {
    /// Reject settings no validator can work with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cities.is_empty() {
            return Err(ValidationError::config("at least one city is required"));
        }
        for (i, city) in self.cities.iter().enumerate() {
            if let Some(earlier) = self.cities[..i].iter().find(|c| c.eq_ignore_ascii_case(city)) {
                return Err(ValidationError::config(format!(
                    "city '{city}' is listed more than once (also as '{earlier}')"
                )));
            }
        }
        if self.min_samples < 2 {
            return Err(ValidationError::config("min_samples must be at least 2"));
        }
        let fraction = self.multi_city.holdout_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(ValidationError::config(format!(
                "holdout_fraction must be in (0, 1), got {fraction}"
            )));
        }
        if self.forecasting.horizons.is_empty() {
            return Err(ValidationError::config("at least one horizon is required"));
        }
        if self.forecasting.horizons.contains(&0) {
            return Err(ValidationError::config("horizons must be positive"));
        }
        let horizons = &self.forecasting.horizons;
        for (i, h) in horizons.iter().enumerate() {
            if horizons[..i].contains(h) {
                return Err(ValidationError::config(format!(
                    "horizon {h} is listed more than once"
                )));
            }
        }
        if self.forecasting.stride == 0 || self.forecasting.refit_every == 0 {
            return Err(ValidationError::config(
                "stride and refit_every must be positive",
            ));
        }
        Ok(())
    }
}

/// Multi-city hold-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiCityConfig {
    /// Fraction of each city's observations held out for testing.
    #[serde(default = "default_holdout_fraction")]
    pub holdout_fraction: f64,
    /// Run the leave-one-city-out generalization check.
    #[serde(default = "default_true")]
    pub leave_one_city_out: bool,
}

impl Default for MultiCityConfig {
    fn default() -> Self {
        Self {
            holdout_fraction: default_holdout_fraction(),
            leave_one_city_out: true,
        }
    }
}

fn default_holdout_fraction() -> f64 {
    0.2
}

/// Walk-forward forecasting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastingConfig {
    /// Forecast horizons in hours.
    #[serde(default = "default_horizons")]
    pub horizons: Vec<u32>,
    /// Observations between consecutive evaluation origins.
    #[serde(default = "default_stride")]
    pub stride: usize,
    /// Evaluation origins between model refits.
    #[serde(default = "default_refit_every")]
    pub refit_every: usize,
    /// Most recent origins evaluated per city (0 = unlimited).
    #[serde(default = "default_max_origins")]
    pub max_origins: usize,
    /// Observations that must precede the first origin (defaults to `min_samples`).
    #[serde(default)]
    pub min_train_samples: Option<usize>,
}

impl Default for ForecastingConfig {
    fn default() -> Self {
        Self {
            horizons: default_horizons(),
            stride: default_stride(),
            refit_every: default_refit_every(),
            max_origins: default_max_origins(),
            min_train_samples: None,
        }
    }
}

fn default_horizons() -> Vec<u32> {
    vec![1, 6, 12, 24, 48]
}

fn default_stride() -> usize {
    1
}

fn default_refit_every() -> usize {
    24
}

fn default_max_origins() -> usize {
    500
}

/// Benchmark comparison configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Include the built-in published reference figures.
    #[serde(default = "default_true")]
    pub include_published: bool,
    /// Extra reference figures (JSON or TOML).
    #[serde(default)]
    pub reference_file: Option<PathBuf>,
    /// WAQI API token; live comparison is skipped when unset.
    #[serde(default)]
    pub waqi_token: Option<String>,
    /// WAQI API base URL.
    #[serde(default = "default_waqi_base_url")]
    pub waqi_base_url: String,
    /// Timeout for each live benchmark request (seconds).
    #[serde(default = "default_benchmark_timeout")]
    pub timeout_secs: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            include_published: true,
            reference_file: None,
            waqi_token: None,
            waqi_base_url: default_waqi_base_url(),
            timeout_secs: default_benchmark_timeout(),
        }
    }
}

fn default_waqi_base_url() -> String {
    "https://api.waqi.info".to_string()
}

fn default_benchmark_timeout() -> u64 {
    10
}

/// Report output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Directory receiving all report artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub json: bool,
    #[serde(default = "default_true")]
    pub markdown: bool,
    #[serde(default = "default_true")]
    pub csv: bool,
    #[serde(default = "default_true")]
    pub plot: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            json: true,
            markdown: true,
            csv: true,
            plot: true,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("validation_results")
}

fn default_cities() -> Vec<String> {
    vec![
        "Delhi".to_string(),
        "Mumbai".to_string(),
        "Bangalore".to_string(),
    ]
}

fn default_min_samples() -> usize {
    50
}

fn default_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

/// Load configuration with layered sources.
///
/// Precedence, lowest first: defaults, `~/.config/aqilens/config.toml`,
/// `<workspace>/.aqilens/config.toml`, the explicit file, then `AQILENS_`
/// environment variables (`AQILENS_FORECASTING__STRIDE=6`).
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<ValidationConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ValidationConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "aqilens", "aqilens") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".aqilens").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("AQILENS_").split("__"));

    figment.extract().map_err(Box::new)
}
