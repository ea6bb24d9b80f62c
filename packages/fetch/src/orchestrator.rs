//! Fetches and merges both lookups for a single coordinate.

use la_parcels_arcgis::{GeoQuery, QueryError, RetryPolicy, retry};
use la_parcels_models::{Coordinate, HazardStatus, ParcelAttributes, ParcelRecord};

/// Outcome of the parcel lookup after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParcelLookup {
    /// A parcel contains the coordinate.
    Found(ParcelAttributes),
    /// The service answered and no parcel contains the coordinate.
    NotFound,
    /// Every attempt failed.
    Failed,
}

impl ParcelLookup {
    /// Parcel attributes, if any were found.
    #[must_use]
    pub fn into_attributes(self) -> Option<ParcelAttributes> {
        match self {
            Self::Found(parcel) => Some(parcel),
            Self::NotFound | Self::Failed => None,
        }
    }
}

impl From<Result<Option<ParcelAttributes>, QueryError>> for ParcelLookup {
    fn from(result: Result<Option<ParcelAttributes>, QueryError>) -> Self {
        match result {
            Ok(Some(parcel)) => Self::Found(parcel),
            Ok(None) => Self::NotFound,
            Err(_) => Self::Failed,
        }
    }
}

/// Runs the parcel and hazard lookups for `coordinate`, each with its own
/// retry budget, and merges the results.
///
/// Both lookups are always attempted. Returns `None` when there is nothing
/// to cache, in which case the coordinate is retried on the next run.
pub async fn fetch_coordinate(
    service: &dyn GeoQuery,
    policy: &RetryPolicy,
    coordinate: Coordinate,
) -> Option<ParcelRecord> {
    let parcel = retry::with_retry(policy, &format!("parcel {coordinate}"), || {
        service.query_parcel(coordinate)
    })
    .await;

    let hazard = retry::with_retry(policy, &format!("hazard {coordinate}"), || {
        service.query_hazard(coordinate)
    })
    .await;

    let hazard = hazard.map_or(HazardStatus::Unknown, HazardStatus::from);

    merge(ParcelLookup::from(parcel), hazard)
}

/// Combines the two lookup outcomes into a cacheable record.
///
/// `None` when both lookups failed, or when nothing usable came back
/// (no parcel and an unknown hazard status).
#[must_use]
pub fn merge(parcel: ParcelLookup, hazard: HazardStatus) -> Option<ParcelRecord> {
    if parcel == ParcelLookup::Failed && hazard == HazardStatus::Unknown {
        return None;
    }
    ParcelRecord::merge(parcel.into_attributes(), hazard)
}
