#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Listing coordinate reader.
//!
//! Reads the Redfin CSV export and yields the rounded, deduplicated
//! coordinates of active, positively priced listings inside a bounding box.
//! Individual bad rows are skipped; only a missing or unreadable file is an
//! error.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use la_parcels_models::{BoundingBox, Coordinate};
use regex::Regex;

/// Column holding the listing latitude.
pub const LATITUDE_COLUMN: &str = "LATITUDE";
/// Column holding the listing longitude.
pub const LONGITUDE_COLUMN: &str = "LONGITUDE";
/// Column holding the listing status (e.g. `"Active"`).
pub const STATUS_COLUMN: &str = "STATUS";
/// Column holding the human-formatted price (e.g. `"$500,000"`).
pub const PRICE_COLUMN: &str = "PRICE";

static NON_NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9.]").expect("valid regex"));

/// Errors from reading the listings file.
#[derive(Debug, thiserror::Error)]
pub enum ListingsError {
    /// The listings file does not exist.
    #[error("No {} found.", path.display())]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The file could not be opened or read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The header row could not be read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Coordinates read from a listings file, plus row counts for reporting.
#[derive(Debug, Clone, Default)]
pub struct ListingCoordinates {
    /// Unique coordinates in first-seen order.
    pub coordinates: Vec<Coordinate>,
    /// Data rows read (excluding the header).
    pub rows_read: u64,
    /// Rows that passed every filter, duplicates included.
    pub rows_accepted: u64,
    /// Accepted rows dropped because their key was already seen.
    pub duplicates: u64,
}

/// Reads listing coordinates from the CSV file at `path`.
///
/// # Errors
///
/// Returns [`ListingsError::NotFound`] if the file does not exist, or
/// another [`ListingsError`] if it cannot be opened or has no readable
/// header row.
pub fn read_coordinates(
    path: &Path,
    bbox: &BoundingBox,
) -> Result<ListingCoordinates, ListingsError> {
    if !path.exists() {
        return Err(ListingsError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let file = std::fs::File::open(path)?;
    let listings = parse_coordinates(file, bbox)?;

    log::info!(
        "Read {} rows from {}: {} accepted, {} unique coordinates",
        listings.rows_read,
        path.display(),
        listings.rows_accepted,
        listings.coordinates.len(),
    );

    Ok(listings)
}

/// Parses listing coordinates from any CSV source with a header row.
///
/// Field bytes are decoded lossily, so invalid UTF-8 never fails a row.
///
/// # Errors
///
/// Returns [`ListingsError::Csv`] if the header row cannot be read.
pub fn parse_coordinates<R: Read>(
    reader: R,
    bbox: &BoundingBox,
) -> Result<ListingCoordinates, ListingsError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_owned())
        .collect();

    let column = |name: &str| headers.iter().position(|h| h == name);
    let columns = Columns {
        latitude: column(LATITUDE_COLUMN),
        longitude: column(LONGITUDE_COLUMN),
        status: column(STATUS_COLUMN),
        price: column(PRICE_COLUMN),
    };

    if !columns.is_complete() {
        log::warn!(
            "Listings header is missing one of {LATITUDE_COLUMN}, {LONGITUDE_COLUMN}, \
             {STATUS_COLUMN}, {PRICE_COLUMN}; no rows will be accepted"
        );
    }

    let mut listings = ListingCoordinates::default();
    let mut seen = BTreeSet::new();

    for result in reader.byte_records() {
        listings.rows_read += 1;

        let Ok(record) = result else {
            continue;
        };

        let Some(coordinate) = accept_row(
            &field(&record, columns.latitude),
            &field(&record, columns.longitude),
            &field(&record, columns.status),
            &field(&record, columns.price),
            bbox,
        ) else {
            continue;
        };

        listings.rows_accepted += 1;
        if seen.insert(coordinate.key()) {
            listings.coordinates.push(coordinate);
        } else {
            listings.duplicates += 1;
        }
    }

    Ok(listings)
}

struct Columns {
    latitude: Option<usize>,
    longitude: Option<usize>,
    status: Option<usize>,
    price: Option<usize>,
}

impl Columns {
    const fn is_complete(&self) -> bool {
        self.latitude.is_some()
            && self.longitude.is_some()
            && self.status.is_some()
            && self.price.is_some()
    }
}

/// Lossily decodes a field, treating a missing column or short row as
/// empty.
fn field(record: &csv::ByteRecord, idx: Option<usize>) -> Cow<'_, str> {
    idx.and_then(|i| record.get(i))
        .map_or(Cow::Borrowed(""), String::from_utf8_lossy)
}

/// Applies the row filters, returning the rounded coordinate of a row that
/// passes all of them.
fn accept_row(
    latitude: &str,
    longitude: &str,
    status: &str,
    price: &str,
    bbox: &BoundingBox,
) -> Option<Coordinate> {
    let latitude = parse_number(latitude)?;
    let longitude = parse_number(longitude)?;
    if !bbox.contains(latitude, longitude) {
        return None;
    }

    if !status.trim().eq_ignore_ascii_case("active") {
        return None;
    }

    if parse_price(price)? <= 0.0 {
        return None;
    }

    Some(Coordinate::rounded(latitude, longitude))
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

/// Parses a human-formatted price by dropping everything but digits and
/// `.`. An empty remainder is zero; a malformed one (`"1.2.3"`) is `None`.
fn parse_price(s: &str) -> Option<f64> {
    let digits = NON_NUMERIC_RE.replace_all(s, "");
    if digits.is_empty() {
        return Some(0.0);
    }
    digits.parse::<f64>().ok()
}
