//! Bounded-concurrency fetch loop with periodic checkpoints.
//!
//! Each pending coordinate is fetched in its own spawned task, with at most
//! `workers` tasks alive at once. Results are collected here, in completion
//! order, by the only code that touches the [`ParcelCache`]: workers never
//! see the cache or the file it is saved to.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt as _};
use la_parcels_arcgis::GeoQuery;
use la_parcels_cache::ParcelCache;
use la_parcels_models::Coordinate;

use crate::FetchError;
use crate::config::FetchConfig;
use crate::orchestrator::fetch_coordinate;
use crate::progress::ProgressCallback;

/// Counts for one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Coordinates dispatched.
    pub attempted: u64,
    /// Coordinates that produced a cached record.
    pub succeeded: u64,
    /// Coordinates that produced nothing (both lookups failed, or the
    /// worker panicked). These are retried on the next run.
    pub errors: u64,
    /// Checkpoint saves that succeeded, not counting the final save.
    pub checkpoints: u64,
    /// Wall-clock time spent fetching.
    pub elapsed: Duration,
}

/// Coordinates that still need fetching: not already cached, one per key,
/// in input order, truncated to `limit` when given.
#[must_use]
pub fn pending_work(
    coordinates: &[Coordinate],
    cache: &ParcelCache,
    limit: Option<usize>,
) -> Vec<Coordinate> {
    let mut seen = BTreeSet::new();
    let pending = coordinates.iter().copied().filter(|c| {
        let key = c.key();
        !cache.contains(&key) && seen.insert(key)
    });

    match limit {
        Some(limit) => pending.take(limit).collect(),
        None => pending.collect(),
    }
}

/// Fetches every coordinate in `work` and adds the results to `cache`.
///
/// The cache is saved every `checkpoint_interval` completions and once
/// more at the end. A failed checkpoint is logged and the run carries on;
/// the final save must succeed. An empty `work` list returns immediately
/// without touching the cache file.
///
/// # Errors
///
/// Returns [`FetchError::Cache`] if the final save fails.
#[allow(clippy::cast_precision_loss)]
pub async fn run(
    service: &Arc<dyn GeoQuery>,
    config: &FetchConfig,
    cache: &mut ParcelCache,
    work: Vec<Coordinate>,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<RunReport, FetchError> {
    let total = work.len() as u64;
    let mut report = RunReport {
        attempted: total,
        ..RunReport::default()
    };

    if work.is_empty() {
        progress.finish("nothing to fetch".to_string());
        return Ok(report);
    }

    progress.set_total(total);
    let start = Instant::now();
    let policy = config.retry;

    let mut results = stream::iter(work)
        .map(|coordinate| {
            let service = Arc::clone(service);
            let handle = tokio::spawn(async move {
                fetch_coordinate(service.as_ref(), &policy, coordinate).await
            });
            async move { (coordinate, handle.await) }
        })
        .buffer_unordered(config.workers);

    let mut completed: u64 = 0;

    while let Some((coordinate, outcome)) = results.next().await {
        completed += 1;

        match outcome {
            Ok(Some(record)) => {
                cache.insert(coordinate.key(), record);
                report.succeeded += 1;
            }
            Ok(None) => {
                log::debug!("{coordinate}: no result, will retry next run");
                report.errors += 1;
            }
            Err(e) => {
                log::error!("{coordinate}: worker failed: {e}");
                report.errors += 1;
            }
        }
        progress.inc(1);

        if completed % config.progress_interval == 0 || completed == total {
            let elapsed = start.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                completed as f64 / elapsed
            } else {
                0.0
            };
            let eta_min = if rate > 0.0 {
                (total - completed) as f64 / rate / 60.0
            } else {
                0.0
            };
            let status = format!("{rate:.1}/s | {} err | ETA {eta_min:.1}m", report.errors);
            log::info!("[{completed:>5}/{total}] {status}");
            progress.set_message(status);
        }

        if completed % config.checkpoint_interval == 0 {
            match cache.save() {
                Ok(()) => {
                    report.checkpoints += 1;
                    log::info!(
                        "Checkpoint: {} parcels saved to {}",
                        cache.len(),
                        cache.path().display()
                    );
                }
                Err(e) => log::error!("Checkpoint failed: {e}"),
            }
        }
    }

    cache.save()?;
    report.elapsed = start.elapsed();
    progress.finish(format!(
        "{} fetched, {} errors",
        report.succeeded, report.errors
    ));

    Ok(report)
}
