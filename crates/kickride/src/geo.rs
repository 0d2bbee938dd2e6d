//! Geographic helpers: great-circle distance and point encoding.
//!
//! Points travel as `(lat, lng)` pairs and are stored as WKT
//! `POINT(lng lat)` text, matching the axis order of geometry stores.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mean earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    #[serde(alias = "latitude")]
    pub lat: f64,
    /// Longitude in degrees.
    #[serde(alias = "longitude")]
    pub lng: f64,
}

impl GeoPoint {
    /// Create a point without validation.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Reject non-finite or out-of-range coordinates.
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the offending coordinate.
    pub fn validate(&self) -> Result<()> {
        if !(self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat)) {
            return Err(Error::validation(format!("latitude out of range: {}", self.lat)));
        }
        if !(self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng)) {
            return Err(Error::validation(format!("longitude out of range: {}", self.lng)));
        }
        Ok(())
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

/// Parses `"lat,lng"` and checks the range.
impl FromStr for GeoPoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (lat, lng) = s
            .split_once(',')
            .ok_or_else(|| Error::validation(format!("expected 'lat,lng', got '{s}'")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| Error::validation(format!("invalid coordinate '{}'", part.trim())))
        };
        let point = Self::new(parse(lat)?, parse(lng)?);
        point.validate()?;
        Ok(point)
    }
}

/// Great-circle distance between two points in kilometres.
#[must_use]
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    let c = 2.0 * h.min(1.0).sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Encode a point as the stored geometry value.
#[must_use]
pub fn to_point(p: GeoPoint) -> String {
    // `{}` on f64 prints the shortest representation that parses back exactly.
    format!("POINT({} {})", p.lng, p.lat)
}

/// Decode a stored geometry value back into a point.
///
/// # Errors
///
/// Returns an internal error if the text is not a `POINT(lng lat)` value.
pub fn from_point(wkt: &str) -> Result<GeoPoint> {
    let inner = wkt
        .trim()
        .strip_prefix("POINT(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| Error::internal(format!("malformed point geometry: {wkt}")))?;

    let mut parts = inner.split_whitespace();
    let (Some(lng), Some(lat), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::internal(format!("malformed point geometry: {wkt}")));
    };

    let parse = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| Error::internal(format!("malformed coordinate '{s}' in {wkt}")))
    };
    Ok(GeoPoint::new(parse(lat)?, parse(lng)?))
}
