#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parcel and fire zone fetch pipeline.
//!
//! Reads listing coordinates, skips every coordinate already in the parcel
//! cache, and fetches the rest from the LA County `ArcGIS` services with a
//! bounded number of concurrent workers. The cache is checkpointed while
//! the run progresses, so an interrupted run loses at most one checkpoint
//! interval of work and the next run picks up where it left off.

pub mod config;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod summary;

use la_parcels_arcgis::QueryError;
use la_parcels_cache::CacheError;
use la_parcels_listings::ListingsError;

pub use config::{ConfigError, FetchConfig};
pub use pipeline::{PipelineReport, RunOptions, run_pipeline};

/// Errors that abort a fetch run.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The listings CSV is missing or unreadable.
    #[error(transparent)]
    Listings(#[from] ListingsError),

    /// The parcel cache could not be loaded or saved.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The HTTP client could not be built.
    #[error("Query client error: {0}")]
    Query(#[from] QueryError),

    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
