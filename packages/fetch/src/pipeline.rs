//! One full fetch run: read listings, load the cache, fetch what is
//! missing, save, summarize.

use std::path::PathBuf;
use std::sync::Arc;

use la_parcels_arcgis::{ArcGisClient, GeoQuery};
use la_parcels_cache::ParcelCache;
use la_parcels_listings::read_coordinates;

use crate::FetchError;
use crate::config::FetchConfig;
use crate::progress::ProgressCallback;
use crate::scheduler::{self, RunReport, pending_work};
use crate::summary::CacheSummary;

/// Per-invocation switches that are not part of [`FetchConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Only fetch the first `test_limit` pending coordinates.
    pub test_mode: bool,
}

/// What happened during [`run_pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Accepted listing rows in the input CSV.
    pub listings: u64,
    /// Cache entries present before the run.
    pub already_cached: usize,
    /// Coordinates scheduled for fetching.
    pub to_process: usize,
    /// Counts and timing from the scheduler.
    pub run: RunReport,
    /// Statistics over the cache after the run.
    pub summary: CacheSummary,
    /// Where the cache was saved.
    pub output_path: PathBuf,
}

/// Rough run time in minutes, assuming two half-second requests per
/// coordinate spread over every worker.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimated_minutes(to_process: usize, workers: usize) -> f64 {
    to_process as f64 * 2.0 / workers as f64 * 0.5 / 60.0
}

/// Runs the pipeline against the live LA County services.
///
/// # Errors
///
/// Returns [`FetchError`] if the HTTP client cannot be built, the listings
/// file is missing or unreadable, the existing cache is corrupt, or the
/// final cache save fails.
pub async fn run_pipeline(
    config: &FetchConfig,
    options: RunOptions,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<PipelineReport, FetchError> {
    let client: Arc<dyn GeoQuery> = Arc::new(ArcGisClient::new(
        config.arcgis.clone(),
        config.request_timeout(),
    )?);
    run_with_service(config, options, &client, progress).await
}

/// Runs the pipeline against any [`GeoQuery`] implementation.
///
/// # Errors
///
/// See [`run_pipeline`].
pub async fn run_with_service(
    config: &FetchConfig,
    options: RunOptions,
    service: &Arc<dyn GeoQuery>,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<PipelineReport, FetchError> {
    let listings = read_coordinates(&config.input_path, &config.bounding_box)?;

    let mut cache = ParcelCache::load(config.output_path.clone())?;
    let already_cached = cache.len();

    let limit = options.test_mode.then_some(config.test_limit);
    let work = pending_work(&listings.coordinates, &cache, limit);
    let to_process = work.len();

    if options.test_mode {
        log::info!("TEST MODE: limited to {} listings", config.test_limit);
    }
    log::info!("Listings from CSV: {}", listings.rows_accepted);
    log::info!("Already cached: {already_cached}");
    log::info!("To process: {to_process}");
    log::info!("Workers: {}", config.workers);
    log::info!(
        "Est. time: {:.1} minutes",
        estimated_minutes(to_process, config.workers)
    );

    let run = scheduler::run(service, config, &mut cache, work, progress).await?;

    Ok(PipelineReport {
        listings: listings.rows_accepted,
        already_cached,
        to_process,
        run,
        summary: CacheSummary::from_cache(&cache),
        output_path: config.output_path.clone(),
    })
}
