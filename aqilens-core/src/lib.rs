//! # aqilens-core - AQI model validation and forecast evaluation
//!
//! Measures how well air-quality models generalize across cities and how
//! accurately they forecast AQI at several horizons, then puts the numbers
//! next to external reference figures and writes one consistent report.
//!
//! ## Pipeline
//!
//! 1. **Load** a flat per-city time series ([`data`])
//! 2. **Multi-city validation**: stratified hold-out per city plus a
//!    leave-one-city-out check ([`validation::multi_city`])
//! 3. **Forecasting validation**: walk-forward evaluation without lookahead
//!    ([`validation::forecasting`])
//! 4. **Benchmark comparison** against static and live references ([`benchmark`])
//! 5. **Report** aggregation, ranking and serialization ([`report`])
//!
//! [`ValidationRunner`] drives all of it for a single run.

// Foundation
pub mod config;
pub mod error;

// Data and models
pub mod data;
pub mod features;
pub mod metrics;
pub mod models;

// Validators
pub mod benchmark;
pub mod validation;

// Output
pub mod report;
pub mod runner;

// Re-exports
pub use config::{ValidationConfig, load_config};
pub use error::{BenchmarkError, ModelError, ValidationError};
pub use models::{Model, ModelRegistry, Predictor};
pub use report::{Section, ValidationReport};
pub use runner::{RunOutcome, ValidationRunner};
