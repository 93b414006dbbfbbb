//! Model validation: multi-city hold-out, leave-one-city-out and walk-forward
//! forecasting.

pub mod forecasting;
pub mod multi_city;
pub mod record;
pub mod split;

pub use forecasting::{ForecastingOutcome, ForecastingValidator};
pub use multi_city::{CityCoverage, MultiCityOutcome, MultiCityValidator};
pub use record::{GeneralizationRecord, MetricRecord, OutcomeCounts, RecordStatus, SkippedCity};
pub use split::{
    BucketCoverage, StratifiedSplit, ValidationSplit, WalkForwardSplit, stratified_holdout,
    walk_forward_origins, walk_forward_splits,
};
