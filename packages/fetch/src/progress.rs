//! Progress reporting for the fetch run.
//!
//! [`scheduler::run`](crate::scheduler::run) calls [`ProgressCallback`]
//! once per finished coordinate, next to its periodic progress log line.
//! The binary passes an `indicatif` bar; tests and library callers pass
//! [`null_progress`].

use std::sync::Arc;

/// Receives fetch progress from the scheduler's collector loop.
///
/// Called from a single task, but shared as `Arc<dyn ProgressCallback>`
/// across the pipeline, hence `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Number of coordinates in this run's work list. Called once, before
    /// any [`inc`](Self::inc); not called at all when there is no work.
    fn set_total(&self, total: u64);

    /// One more coordinate finished, cached or not.
    fn inc(&self, delta: u64);

    /// Latest `"<rate>/s | <errors> err | ETA <minutes>m"` status.
    fn set_message(&self, msg: String);

    /// The run is over; `msg` carries the fetched and error counts.
    fn finish(&self, msg: String);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// A shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use la_parcels_arcgis::{GeoQuery, QueryError};
    use la_parcels_cache::ParcelCache;
    use la_parcels_models::{Coordinate, ParcelAttributes};

    use super::*;
    use crate::config::FetchConfig;
    use crate::scheduler;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl ProgressCallback for Recorder {
        fn set_total(&self, total: u64) {
            self.push(format!("total {total}"));
        }
        fn inc(&self, delta: u64) {
            self.push(format!("inc {delta}"));
        }
        fn set_message(&self, _msg: String) {}
        fn finish(&self, msg: String) {
            self.push(format!("finish {msg}"));
        }
    }

    struct EmptyService;

    #[async_trait]
    impl GeoQuery for EmptyService {
        async fn query_parcel(
            &self,
            _coordinate: Coordinate,
        ) -> Result<Option<ParcelAttributes>, QueryError> {
            Ok(None)
        }

        async fn query_hazard(&self, _coordinate: Coordinate) -> Result<bool, QueryError> {
            Ok(false)
        }
    }

    async fn events_for(work: Vec<Coordinate>) -> Vec<String> {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let progress: Arc<dyn ProgressCallback> = Arc::clone(&recorder) as _;
        let service: Arc<dyn GeoQuery> = Arc::new(EmptyService);
        let mut cache = ParcelCache::empty(dir.path().join("parcels.json"));

        scheduler::run(
            &service,
            &FetchConfig::embedded().unwrap(),
            &mut cache,
            work,
            &progress,
        )
        .await
        .unwrap();

        recorder.events.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn reports_total_then_each_coordinate() {
        let work = vec![
            Coordinate::rounded(34.05, -118.25),
            Coordinate::rounded(34.2, -118.5),
        ];
        assert_eq!(
            events_for(work).await,
            vec!["total 2", "inc 1", "inc 1", "finish 2 fetched, 0 errors"]
        );
    }

    #[tokio::test]
    async fn empty_run_only_finishes() {
        assert_eq!(events_for(Vec::new()).await, vec!["finish nothing to fetch"]);
    }
}
