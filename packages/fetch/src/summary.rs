//! End-of-run statistics over the parcel cache.

use la_parcels_cache::ParcelCache;

/// Lot size distribution, in square feet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotSizeStats {
    /// Upper median (`sorted[len / 2]`).
    pub median: i64,
    /// Smallest non-zero lot.
    pub min: i64,
    /// Largest lot.
    pub max: i64,
}

/// Counts over every record in the cache, not just this run's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSummary {
    /// Records in the cache.
    pub total: usize,
    /// Records with a non-zero lot size.
    pub with_lot_size: usize,
    /// Records known to be in a Very High Fire Hazard Severity Zone.
    pub in_fire_zone: usize,
    /// `None` when no record has a lot size.
    pub lot_sf: Option<LotSizeStats>,
}

impl CacheSummary {
    /// Tallies every record currently held by `cache`.
    #[must_use]
    pub fn from_cache(cache: &ParcelCache) -> Self {
        let mut lots: Vec<i64> = cache
            .records()
            .filter_map(la_parcels_models::ParcelRecord::lot_sf)
            .filter(|&sf| sf != 0)
            .collect();
        lots.sort_unstable();

        let lot_sf = match (lots.first(), lots.last()) {
            (Some(&min), Some(&max)) => Some(LotSizeStats {
                median: lots[lots.len() / 2],
                min,
                max,
            }),
            _ => None,
        };

        Self {
            total: cache.len(),
            with_lot_size: lots.len(),
            in_fire_zone: cache.records().filter(|r| r.in_fire_zone()).count(),
            lot_sf,
        }
    }
}
