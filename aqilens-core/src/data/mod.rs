//! Observation data: typed records, per-city datasets, loaders, quality summaries.

pub mod observation;
pub mod source;
pub mod validate;

pub use observation::{AqiCategory, CityDataset, Observation};
pub use source::{DatasetFormat, LoadedDataset, REQUIRED_COLUMNS, RowError, load_dataset};
pub use validate::{CityDataQuality, assess_city};
