#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! LA County `ArcGIS` query clients.
//!
//! Two `MapServer` layers are queried per listing coordinate:
//!
//! 1. **Parcels** (`LACounty_Parcel/MapServer/0`): an envelope query
//!    returning lot area (`Shape.STArea()`), AIN, assessed values and
//!    situs address of the containing parcel.
//! 2. **Hazards** (`Hazards/MapServer/2`): a point query returning the
//!    fire hazard severity class (`HAZ_CLASS`).
//!
//! Each call issues exactly one request. An empty `features` array is a
//! successful "nothing here" answer; anything else that goes wrong is a
//! [`QueryError`], which [`retry::with_retry`] may retry.

pub mod client;
pub mod retry;

use async_trait::async_trait;
use la_parcels_models::{Coordinate, ParcelAttributes};

pub use client::{ArcGisClient, ArcGisEndpoints};
pub use retry::RetryPolicy;

/// Errors from a single `ArcGIS` query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Connection, timeout or body read failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP 429 or 503: the service wants us to back off.
    #[error("HTTP {status} (rate limited)")]
    RateLimited {
        /// Response status code.
        status: u16,
    },

    /// Any other non-2xx status.
    #[error("HTTP {status}")]
    Status {
        /// Response status code.
        status: u16,
    },

    /// The response body was not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The body is JSON but not shaped like a query response.
    #[error("Malformed response: {message}")]
    Malformed {
        /// Which part of the body was unexpected.
        message: String,
    },

    /// The service answered 2xx with an `error` object in the body.
    #[error("ArcGIS error: {message}")]
    Service {
        /// Error message reported by the service.
        message: String,
    },
}

impl QueryError {
    /// Returns `true` for errors that call for the longer, growing backoff.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// The two lookups performed for every coordinate.
///
/// Implemented by [`ArcGisClient`]; the fetch pipeline only depends on this
/// trait so it can run against in-memory fakes.
#[async_trait]
pub trait GeoQuery: Send + Sync {
    /// Looks up the parcel containing `coordinate`. `Ok(None)` means the
    /// service found no parcel there.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if the request fails.
    async fn query_parcel(
        &self,
        coordinate: Coordinate,
    ) -> Result<Option<ParcelAttributes>, QueryError>;

    /// Returns whether `coordinate` is in a Very High Fire Hazard Severity
    /// Zone. No hazard feature at the point means `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if the request fails.
    async fn query_hazard(&self, coordinate: Coordinate) -> Result<bool, QueryError>;
}
