//! HTTP client for the parcel and hazard `MapServer` query endpoints.
//!
//! See <https://developers.arcgis.com/rest/services-reference/enterprise/query-map-service-layer/>

use std::time::Duration;

use async_trait::async_trait;
use la_parcels_models::{Coordinate, ParcelAttributes};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{GeoQuery, QueryError};

/// Fields requested from the parcel layer.
pub const PARCEL_OUT_FIELDS: &str = "AIN,Roll_LandValue,Roll_ImpValue,SitusAddress,Shape.STArea()";

/// Field requested from the hazard layer.
pub const HAZARD_OUT_FIELDS: &str = "HAZ_CLASS";

/// `HAZ_CLASS` value marking a Very High Fire Hazard Severity Zone.
pub const VERY_HIGH_HAZARD_CLASS: &str = "Very High";

/// WGS84 spatial reference id.
const WGS84_WKID: u32 = 4326;

/// Where and how to query the two layers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArcGisEndpoints {
    /// Parcel layer query URL (ending in `/query`).
    pub parcel_url: String,
    /// Hazard layer query URL (ending in `/query`).
    pub hazard_url: String,
    /// Half-width in degrees of the envelope drawn around each point for
    /// the parcel query (`0.00002` is roughly 2 meters).
    pub envelope_offset: f64,
}

/// `ArcGIS` client shared by all workers.
#[derive(Debug, Clone)]
pub struct ArcGisClient {
    client: reqwest::Client,
    endpoints: ArcGisEndpoints,
}

impl ArcGisClient {
    /// Builds a client whose every request times out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Http`] if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(endpoints: ArcGisEndpoints, timeout: Duration) -> Result<Self, QueryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoints })
    }

    /// Sends one GET and returns the decoded JSON body.
    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value, QueryError> {
        let resp = self.client.get(url).query(params).send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        {
            return Err(QueryError::RateLimited {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            return Err(QueryError::Status {
                status: status.as_u16(),
            });
        }

        let text = resp.text().await?;
        let body: Value = serde_json::from_str(&text)?;
        check_service_error(&body)?;
        Ok(body)
    }
}

#[async_trait]
impl GeoQuery for ArcGisClient {
    async fn query_parcel(
        &self,
        coordinate: Coordinate,
    ) -> Result<Option<ParcelAttributes>, QueryError> {
        let params = parcel_query_params(coordinate, self.endpoints.envelope_offset);
        let body = self.get_json(&self.endpoints.parcel_url, &params).await?;
        parse_parcel_response(&body)
    }

    async fn query_hazard(&self, coordinate: Coordinate) -> Result<bool, QueryError> {
        let params = hazard_query_params(coordinate);
        let body = self.get_json(&self.endpoints.hazard_url, &params).await?;
        parse_hazard_response(&body)
    }
}

/// Query string for the parcel layer: every parcel intersecting a small
/// envelope centred on the point.
#[must_use]
pub fn parcel_query_params(coordinate: Coordinate, offset: f64) -> Vec<(&'static str, String)> {
    let lat = coordinate.latitude();
    let lng = coordinate.longitude();
    let envelope = serde_json::json!({
        "xmin": lng - offset,
        "ymin": lat - offset,
        "xmax": lng + offset,
        "ymax": lat + offset,
        "spatialReference": { "wkid": WGS84_WKID },
    });

    vec![
        ("geometry", envelope.to_string()),
        ("geometryType", "esriGeometryEnvelope".to_string()),
        ("spatialRel", "esriSpatialRelIntersects".to_string()),
        ("outFields", PARCEL_OUT_FIELDS.to_string()),
        ("returnGeometry", "false".to_string()),
        ("f", "json".to_string()),
    ]
}

/// Query string for the hazard layer: features intersecting the point.
#[must_use]
pub fn hazard_query_params(coordinate: Coordinate) -> Vec<(&'static str, String)> {
    vec![
        (
            "geometry",
            format!("{},{}", coordinate.longitude(), coordinate.latitude()),
        ),
        ("geometryType", "esriGeometryPoint".to_string()),
        ("inSR", WGS84_WKID.to_string()),
        ("spatialRel", "esriSpatialRelIntersects".to_string()),
        ("outFields", HAZARD_OUT_FIELDS.to_string()),
        ("returnGeometry", "false".to_string()),
        ("f", "json".to_string()),
    ]
}

/// `ArcGIS` reports some failures as HTTP 200 with an `error` object.
fn check_service_error(body: &Value) -> Result<(), QueryError> {
    match body.get("error") {
        Some(error) => Err(QueryError::Service {
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
        None => Ok(()),
    }
}

fn malformed(message: &str) -> QueryError {
    QueryError::Malformed {
        message: message.to_string(),
    }
}

/// Returns the first feature, if any. A missing or `null` `features` key
/// counts as no features; any other unexpected shape is an error.
fn first_feature(body: &Value) -> Result<Option<&Map<String, Value>>, QueryError> {
    let body = body
        .as_object()
        .ok_or_else(|| malformed("body is not an object"))?;

    let features = match body.get("features") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(features)) => features,
        Some(_) => return Err(malformed("`features` is not an array")),
    };

    match features.first() {
        None => Ok(None),
        Some(Value::Object(feature)) => Ok(Some(feature)),
        Some(_) => Err(malformed("feature is not an object")),
    }
}

/// A feature's `attributes` object. A feature without one has no
/// attributes.
struct Attributes<'a>(Option<&'a Map<String, Value>>);

impl<'a> Attributes<'a> {
    fn of(feature: &'a Map<String, Value>) -> Result<Self, QueryError> {
        match feature.get("attributes") {
            None => Ok(Self(None)),
            Some(Value::Object(attrs)) => Ok(Self(Some(attrs))),
            Some(_) => Err(malformed("`attributes` is not an object")),
        }
    }

    fn raw(&self, name: &str) -> Option<&'a Value> {
        self.0.and_then(|attrs| attrs.get(name))
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.raw(name).filter(|v| !v.is_null())
    }
}

/// Extracts parcel attributes from the first feature of a parcel query
/// response. `Ok(None)` when no parcel intersects the envelope.
///
/// # Errors
///
/// Returns [`QueryError::Malformed`] if the body is not shaped like a
/// query response.
pub fn parse_parcel_response(body: &Value) -> Result<Option<ParcelAttributes>, QueryError> {
    let Some(feature) = first_feature(body)? else {
        return Ok(None);
    };
    let attrs = Attributes::of(feature)?;

    // Zero area is treated the same as a missing one.
    #[allow(clippy::cast_possible_truncation)]
    let lot_sf = attrs
        .get("Shape.STArea()")
        .and_then(Value::as_f64)
        .filter(|area| *area != 0.0)
        .map(|area| area.round_ties_even() as i64);

    // Absent reads as empty, `null` stays `null`.
    let ain = match attrs.raw("AIN") {
        None => Some(String::new()),
        Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    let number = |name: &str| match attrs.get(name) {
        Some(Value::Number(n)) => Some(n.clone()),
        _ => None,
    };

    let situs_address = attrs
        .get("SitusAddress")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from);

    Ok(Some(ParcelAttributes {
        lot_sf,
        ain,
        land_value: number("Roll_LandValue"),
        imp_value: number("Roll_ImpValue"),
        situs_address,
    }))
}

/// Returns `true` if the first hazard feature is classed "Very High".
/// No feature at the point means the point is outside every zone.
///
/// # Errors
///
/// Returns [`QueryError::Malformed`] if the body is not shaped like a
/// query response.
pub fn parse_hazard_response(body: &Value) -> Result<bool, QueryError> {
    let Some(feature) = first_feature(body)? else {
        return Ok(false);
    };
    Ok(Attributes::of(feature)?
        .get("HAZ_CLASS")
        .and_then(Value::as_str)
        .is_some_and(|class| class == VERY_HIGH_HAZARD_CLASS))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    use super::*;
    use crate::RetryPolicy;
    use crate::retry::with_retry;

    #[test]
    fn parses_parcel_feature() {
        let body = json!({
            "features": [{
                "attributes": {
                    "AIN": "5173012034",
                    "Roll_LandValue": 412_000,
                    "Roll_ImpValue": 188_500,
                    "SitusAddress": "123 MAIN ST LOS ANGELES CA 90012",
                    "Shape.STArea()": 5000.4
                }
            }]
        });
        let parcel = parse_parcel_response(&body).unwrap().unwrap();
        assert_eq!(parcel.lot_sf, Some(5000));
        assert_eq!(parcel.ain.as_deref(), Some("5173012034"));
        assert_eq!(parcel.land_value, Some(serde_json::Number::from(412_000)));
        assert_eq!(parcel.imp_value, Some(serde_json::Number::from(188_500)));
        assert_eq!(
            parcel.situs_address.as_deref(),
            Some("123 MAIN ST LOS ANGELES CA 90012")
        );
    }

    #[test]
    fn lot_area_rounds_half_to_even() {
        let body = json!({ "features": [{ "attributes": { "Shape.STArea()": 6200.5 } }] });
        let parcel = parse_parcel_response(&body).unwrap().unwrap();
        assert_eq!(parcel.lot_sf, Some(6200));
        let body = json!({ "features": [{ "attributes": { "Shape.STArea()": 6201.5 } }] });
        let parcel = parse_parcel_response(&body).unwrap().unwrap();
        assert_eq!(parcel.lot_sf, Some(6202));
    }

    #[test]
    fn parcel_with_missing_fields() {
        let body = json!({
            "features": [{
                "attributes": {
                    "AIN": null,
                    "Roll_LandValue": null,
                    "SitusAddress": "",
                    "Shape.STArea()": 0
                }
            }]
        });
        let parcel = parse_parcel_response(&body).unwrap().unwrap();
        assert_eq!(parcel.lot_sf, None);
        assert_eq!(parcel.ain, None);
        assert_eq!(parcel.land_value, None);
        assert_eq!(parcel.imp_value, None);
        assert_eq!(parcel.situs_address, None);
    }

    #[test]
    fn feature_without_attributes_is_still_a_parcel() {
        let body = json!({ "features": [{}] });
        let parcel = parse_parcel_response(&body).unwrap().unwrap();
        assert_eq!(parcel.ain.as_deref(), Some(""));
        assert_eq!(parcel.lot_sf, None);
    }

    #[test]
    fn no_parcel_features() {
        assert!(parse_parcel_response(&json!({ "features": [] })).unwrap().is_none());
        assert!(parse_parcel_response(&json!({})).unwrap().is_none());
        assert!(parse_parcel_response(&json!({ "features": null })).unwrap().is_none());
    }

    #[test]
    fn unexpected_body_shapes_are_errors() {
        let bodies = [
            json!(null),
            json!([]),
            json!("oops"),
            json!({ "features": "oops" }),
            json!({ "features": {} }),
            json!({ "features": ["x"] }),
            json!({ "features": [{ "attributes": "x" }] }),
        ];
        for body in &bodies {
            assert!(
                matches!(parse_parcel_response(body), Err(QueryError::Malformed { .. })),
                "parcel: {body}"
            );
            assert!(
                matches!(parse_hazard_response(body), Err(QueryError::Malformed { .. })),
                "hazard: {body}"
            );
        }
    }

    #[test]
    fn very_high_hazard_is_in_zone() {
        let body = json!({ "features": [{ "attributes": { "HAZ_CLASS": "Very High" } }] });
        assert!(parse_hazard_response(&body).unwrap());
    }

    #[test]
    fn other_hazard_classes_are_not_in_zone() {
        let body = json!({ "features": [{ "attributes": { "HAZ_CLASS": "High" } }] });
        assert!(!parse_hazard_response(&body).unwrap());
        let body = json!({ "features": [{ "attributes": {} }] });
        assert!(!parse_hazard_response(&body).unwrap());
    }

    #[test]
    fn no_hazard_features_is_not_in_zone() {
        assert!(!parse_hazard_response(&json!({ "features": [] })).unwrap());
    }

    #[test]
    fn error_body_is_a_failure() {
        let body = json!({ "error": { "code": 500, "message": "Unable to complete operation." } });
        let err = check_service_error(&body).unwrap_err();
        assert!(
            matches!(err, QueryError::Service { ref message } if message == "Unable to complete operation.")
        );
        assert!(!err.is_rate_limited());
        assert!(check_service_error(&json!({ "features": [] })).is_ok());
    }

    #[test]
    fn builds_envelope_around_point() {
        let params = parcel_query_params(Coordinate::rounded(34.05, -118.25), 0.00002);
        let geometry = &params.iter().find(|(k, _)| *k == "geometry").unwrap().1;
        let envelope: Value = serde_json::from_str(geometry).unwrap();
        assert!((envelope["xmin"].as_f64().unwrap() - -118.250_02).abs() < 1e-9);
        assert!((envelope["ymax"].as_f64().unwrap() - 34.050_02).abs() < 1e-9);
        assert_eq!(envelope["spatialReference"]["wkid"], 4326);
        assert!(params.contains(&("outFields", PARCEL_OUT_FIELDS.to_string())));
    }

    #[test]
    fn hazard_query_uses_lng_lat_point() {
        let params = hazard_query_params(Coordinate::rounded(34.05, -118.25));
        assert!(params.contains(&("geometry", "-118.25,34.05".to_string())));
        assert!(params.contains(&("geometryType", "esriGeometryPoint".to_string())));
        assert!(params.contains(&("inSR", "4326".to_string())));
    }

    /// Local HTTP server answering every request with the same response.
    struct FixedServer {
        url: String,
        requests: Arc<AtomicU32>,
    }

    impl FixedServer {
        async fn start(status_line: &'static str, body: &'static str) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&requests);

            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let mut request = Vec::new();
                        let mut buf = [0_u8; 1024];
                        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => request.extend_from_slice(&buf[..n]),
                            }
                        }
                        let response = format!(
                            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\n\
                             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len()
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
            });

            Self {
                url: format!("http://{addr}/query"),
                requests,
            }
        }

        fn endpoints(&self) -> ArcGisEndpoints {
            ArcGisEndpoints {
                parcel_url: self.url.clone(),
                hazard_url: self.url.clone(),
                envelope_offset: 0.00002,
            }
        }

        fn client(&self) -> ArcGisClient {
            ArcGisClient::new(self.endpoints(), Duration::from_secs(10)).unwrap()
        }

        fn requests(&self) -> u32 {
            self.requests.load(Ordering::SeqCst)
        }
    }

    fn point() -> Coordinate {
        Coordinate::rounded(34.05, -118.25)
    }

    #[tokio::test]
    async fn unavailable_and_too_many_requests_are_rate_limited() {
        for (status_line, code) in [("503 Service Unavailable", 503), ("429 Too Many Requests", 429)] {
            let server = FixedServer::start(status_line, "").await;
            let err = server.client().query_parcel(point()).await.unwrap_err();
            assert!(
                matches!(err, QueryError::RateLimited { status } if status == code),
                "{status_line}: {err}"
            );
            assert!(err.is_rate_limited());
        }
    }

    #[tokio::test]
    async fn other_error_statuses_are_status_errors() {
        let server = FixedServer::start("500 Internal Server Error", "{}").await;
        let err = server.client().query_hazard(point()).await.unwrap_err();
        assert!(matches!(err, QueryError::Status { status: 500 }), "{err}");
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn non_json_body_is_a_json_error() {
        let server = FixedServer::start("200 OK", "<html>maintenance</html>").await;
        let err = server.client().query_parcel(point()).await.unwrap_err();
        assert!(matches!(err, QueryError::Json(_)), "{err}");
    }

    #[tokio::test]
    async fn error_object_in_ok_body_is_a_service_error() {
        let server =
            FixedServer::start("200 OK", r#"{"error":{"code":400,"message":"Invalid query"}}"#)
                .await;
        let err = server.client().query_hazard(point()).await.unwrap_err();
        assert!(matches!(err, QueryError::Service { .. }), "{err}");
    }

    #[tokio::test]
    async fn null_body_is_malformed_not_empty() {
        let server = FixedServer::start("200 OK", "null").await;
        let client = server.client();
        let err = client.query_hazard(point()).await.unwrap_err();
        assert!(matches!(err, QueryError::Malformed { .. }), "{err}");
        let err = client.query_parcel(point()).await.unwrap_err();
        assert!(matches!(err, QueryError::Malformed { .. }), "{err}");
    }

    #[tokio::test]
    async fn answers_parcel_and_hazard_queries() {
        let server = FixedServer::start(
            "200 OK",
            r#"{"features":[{"attributes":{"AIN":"5173012034","Shape.STArea()":5000.4,"HAZ_CLASS":"Very High"}}]}"#,
        )
        .await;
        let client = server.client();

        let parcel = client.query_parcel(point()).await.unwrap().unwrap();
        assert_eq!(parcel.lot_sf, Some(5000));
        assert!(client.query_hazard(point()).await.unwrap());
        assert_eq!(server.requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_service_is_retried_with_backoff() {
        let server = FixedServer::start("503 Service Unavailable", "").await;
        // No request timeout: with the clock paused it would fire while
        // the client waits on the socket.
        let client = ArcGisClient {
            client: reqwest::Client::new(),
            endpoints: server.endpoints(),
        };
        let start = tokio::time::Instant::now();

        let result = with_retry(&RetryPolicy::default(), "parcel", || {
            client.query_parcel(point())
        })
        .await;

        assert!(matches!(result, Err(QueryError::RateLimited { status: 503 })));
        assert_eq!(server.requests(), 3);
        assert!(start.elapsed() >= Duration::from_secs(9));
    }
}
