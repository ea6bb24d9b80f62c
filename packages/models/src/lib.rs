#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core types for the LA parcel enrichment pipeline.
//!
//! A listing location is reduced to a [`Coordinate`] (rounded to
//! [`COORDINATE_PRECISION`] decimal places), which in turn yields a stable
//! [`CacheKey`]. The persisted `parcels.json` maps each key to a
//! [`ParcelRecord`] built from the parcel and hazard lookups.

use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeMap as _, Serializer};
use serde::{Deserialize, Serialize};

/// Number of decimal places coordinates are rounded to before keying.
pub const COORDINATE_PRECISION: usize = 6;

/// A WGS84 latitude/longitude bounding box (inclusive on all edges).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern edge.
    pub lat_min: f64,
    /// Northern edge.
    pub lat_max: f64,
    /// Western edge.
    pub lng_min: f64,
    /// Eastern edge.
    pub lng_max: f64,
}

impl BoundingBox {
    /// Los Angeles County, matching the box used by `listings_build`.
    pub const LA_COUNTY: Self = Self {
        lat_min: 33.70,
        lat_max: 34.85,
        lng_min: -118.95,
        lng_max: -117.55,
    };

    /// Returns `true` if the point lies inside the box. `NaN` never does.
    #[must_use]
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.lat_min..=self.lat_max).contains(&latitude)
            && (self.lng_min..=self.lng_max).contains(&longitude)
    }
}

/// A listing location rounded to [`COORDINATE_PRECISION`] decimal places.
///
/// Two raw points that round to the same value are the same unit of work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    /// Rounds a raw latitude/longitude pair into a coordinate.
    #[must_use]
    pub fn rounded(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: round_to_precision(latitude),
            longitude: round_to_precision(longitude),
        }
    }

    /// Rounded latitude.
    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Rounded longitude.
    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Returns the `"<lat>,<lng>"` key this coordinate is cached under.
    #[must_use]
    pub fn key(&self) -> CacheKey {
        CacheKey(format!(
            "{},{}",
            format_component(self.latitude),
            format_component(self.longitude)
        ))
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}",
            format_component(self.latitude),
            format_component(self.longitude)
        )
    }
}

/// Rounds to [`COORDINATE_PRECISION`] places through the decimal
/// representation, so `34.0500004` becomes exactly the double nearest
/// `34.05`.
fn round_to_precision(value: f64) -> f64 {
    format!("{:.*}", COORDINATE_PRECISION, value)
        .parse()
        .unwrap_or(value)
}

/// Shortest round-trip decimal, keeping a trailing `.0` on whole numbers
/// (`34` is written `34.0`) so keys match files produced before this tool.
fn format_component(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains('.') {
        format!("{s}.0")
    } else {
        s
    }
}

/// Key of an entry in the parcel cache, e.g. `"34.05,-118.25"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Attributes of the parcel containing a coordinate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParcelAttributes {
    /// Lot area in square feet, rounded. `None` when the service reports no
    /// (or a zero) area.
    pub lot_sf: Option<i64>,
    /// Assessor identification number. `None` when the service reports it
    /// as `null`, which is written back as `null`.
    pub ain: Option<String>,
    /// Assessed land value.
    pub land_value: Option<serde_json::Number>,
    /// Assessed improvement value.
    pub imp_value: Option<serde_json::Number>,
    /// Situs (street) address. Never `Some("")`.
    pub situs_address: Option<String>,
}

/// Whether a coordinate sits inside a Very High Fire Hazard Severity Zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HazardStatus {
    /// Inside a VHFHSZ.
    InZone,
    /// Queried successfully and not inside a VHFHSZ.
    NotInZone,
    /// The hazard query failed after all retries.
    Unknown,
}

impl HazardStatus {
    /// The value written as `fireZone`, or `None` when the status is
    /// unknown and the field must be omitted.
    #[must_use]
    pub const fn as_fire_zone(self) -> Option<bool> {
        match self {
            Self::InZone => Some(true),
            Self::NotInZone => Some(false),
            Self::Unknown => None,
        }
    }
}

impl From<bool> for HazardStatus {
    fn from(in_zone: bool) -> Self {
        if in_zone { Self::InZone } else { Self::NotInZone }
    }
}

/// One cached entry of `parcels.json`.
///
/// When `parcel` is present its `lotSf`, `ain`, `landValue` and `impValue`
/// keys are always written (`null` for missing numbers) and `situsAddress`
/// only when non-empty. When `parcel` is absent none of those keys appear.
/// `fireZone` appears only when the hazard status is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParcelRecord {
    /// Parcel attributes, if a parcel was found.
    pub parcel: Option<ParcelAttributes>,
    /// Fire zone flag, if the hazard lookup succeeded.
    pub fire_zone: Option<bool>,
}

impl ParcelRecord {
    /// Builds a record from a parcel lookup and a hazard status. Returns
    /// `None` when neither contributes a field.
    #[must_use]
    pub fn merge(parcel: Option<ParcelAttributes>, hazard: HazardStatus) -> Option<Self> {
        let record = Self {
            parcel,
            fire_zone: hazard.as_fire_zone(),
        };
        if record.is_empty() { None } else { Some(record) }
    }

    /// Returns `true` if the record has no fields to persist.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.parcel.is_none() && self.fire_zone.is_none()
    }

    /// Lot area, if known.
    #[must_use]
    pub fn lot_sf(&self) -> Option<i64> {
        self.parcel.as_ref().and_then(|p| p.lot_sf)
    }

    /// Returns `true` only for a confirmed VHFHSZ location.
    #[must_use]
    pub fn in_fire_zone(&self) -> bool {
        self.fire_zone == Some(true)
    }
}

impl Serialize for ParcelRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut len = usize::from(self.fire_zone.is_some());
        if let Some(parcel) = &self.parcel {
            len += 4 + usize::from(parcel.situs_address.is_some());
        }

        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(parcel) = &self.parcel {
            map.serialize_entry("lotSf", &parcel.lot_sf)?;
            map.serialize_entry("ain", &parcel.ain)?;
            map.serialize_entry("landValue", &parcel.land_value)?;
            map.serialize_entry("impValue", &parcel.imp_value)?;
            if let Some(address) = &parcel.situs_address {
                map.serialize_entry("situsAddress", address)?;
            }
        }
        if let Some(fire_zone) = self.fire_zone {
            map.serialize_entry("fireZone", &fire_zone)?;
        }
        map.end()
    }
}

/// Wire shape of a record. The outer `Option` of the parcel fields tells
/// "key absent" apart from "key present with `null`".
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    #[serde(default, deserialize_with = "present")]
    lot_sf: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    ain: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    land_value: Option<Option<serde_json::Number>>,
    #[serde(default, deserialize_with = "present")]
    imp_value: Option<Option<serde_json::Number>>,
    #[serde(default)]
    situs_address: Option<String>,
    #[serde(default)]
    fire_zone: Option<bool>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl<'de> Deserialize<'de> for ParcelRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawRecord::deserialize(deserializer)?;

        let has_parcel = raw.lot_sf.is_some()
            || raw.ain.is_some()
            || raw.land_value.is_some()
            || raw.imp_value.is_some()
            || raw.situs_address.is_some();

        let parcel = has_parcel.then(|| ParcelAttributes {
            lot_sf: raw.lot_sf.flatten(),
            ain: raw.ain.flatten(),
            land_value: raw.land_value.flatten(),
            imp_value: raw.imp_value.flatten(),
            situs_address: raw.situs_address.filter(|s| !s.is_empty()),
        });

        Ok(Self {
            parcel,
            fire_zone: raw.fire_zone,
        })
    }
}
