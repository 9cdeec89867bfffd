pub mod cache;
mod columns;
pub mod config;
pub mod cutoffs;
pub mod diagnostics;
pub mod error;
pub mod fetch;
pub mod flatten;
pub mod meteorology;
pub mod outliers;
pub mod pipelines;
pub mod timestamps;
pub mod types;

pub use cache::{CacheStore, StoredEntry};
pub use columns::SkipReason;
pub use config::Settings;
pub use error::{PipelineError, Result};
pub use fetch::{load_local_export, MeteorologySource, RetryPolicy, SensorSource};
#[cfg(feature = "runtime")]
pub use fetch::{IemClient, QuantAqClient};
pub use pipelines::{CleaningOutcome, CleaningPipeline, CleaningRequest, RawInput, RunReport};
pub use types::{CacheKey, CleanedDataset, DateRange, SensorFamily, WindCoverage};
