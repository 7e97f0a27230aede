//! Origin descriptors and great-circle math for the travel heuristic.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Fastest plausible ground coverage between two sightings (long-haul flight).
const MAX_TRAVEL_SPEED_KMH: f64 = 900.0;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Coarse location descriptor resolved by the boundary layer.
///
/// Coordinates are optional: the resolver may only know city/region/country,
/// or nothing at all. The travel heuristic treats missing coordinates as
/// insufficient information, never as suspicion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub city: String,
    pub region: String,
    pub country: String,
    pub coordinates: Option<Coordinates>,
}

impl Origin {
    #[must_use]
    pub fn new(city: &str, region: &str, country: &str) -> Self {
        Self {
            city: city.to_string(),
            region: region.to_string(),
            country: country.to_string(),
            coordinates: None,
        }
    }

    #[must_use]
    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.coordinates = Some(Coordinates {
            latitude,
            longitude,
        });
        self
    }

    /// Descriptor for a network address the resolver could not place.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN, UNKNOWN)
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.coordinates.is_none()
            && self.city == UNKNOWN
            && self.region == UNKNOWN
            && self.country == UNKNOWN
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.city, self.region, self.country)
    }
}

/// Great-circle distance between two points, in kilometers (haversine).
pub(crate) fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Minimum wall-clock time needed to cover `distance_km`.
pub(crate) fn minimum_travel_time(distance_km: f64) -> Duration {
    let seconds = distance_km / MAX_TRAVEL_SPEED_KMH * 3600.0;
    Duration::seconds(seconds as i64)
}
