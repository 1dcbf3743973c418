use serde::{Deserialize, Serialize};

/// Meters-per-second to miles-per-hour (1 mph = 0.44704 m/s exactly).
pub const MPH_PER_MPS: f64 = 1.0 / 0.44704;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A bare coordinate pair. Also the serialized form of the persisted home
/// location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in meters (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_M * c
    }
}

/// Converts an instantaneous speed in m/s to mph. Negative speeds mean
/// "no valid reading" upstream, so the magnitude is used.
pub fn mps_to_mph(speed_mps: f64) -> f64 {
    speed_mps.abs() * MPH_PER_MPS
}
