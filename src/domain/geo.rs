//! Great-circle distance and bearing on a spherical earth

use crate::domain::types::Coordinates;

/// Mean earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

pub const METERS_PER_MILE: f64 = 1609.34;
pub const METERS_PER_KM: f64 = 1000.0;

/// Calculate the great-circle distance between two positions in meters.
///
/// Uses the haversine formula for accuracy over short distances.
///
/// # Example
///
/// ```
/// use person_location::domain::geo::distance_m;
/// use person_location::domain::Coordinates;
///
/// let a = Coordinates { latitude: 0.0, longitude: 0.0 };
/// let b = Coordinates { latitude: 0.0, longitude: 1.0 };
/// let d = distance_m(a, b);
/// assert!((d - 111_195.0).abs() < 10.0);
/// ```
pub fn distance_m(from: Coordinates, to: Coordinates) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlat = (to.latitude - from.latitude).to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial compass bearing from `from` to `to`, in degrees 0..360.
pub fn compass_bearing(from: Coordinates, to: Coordinates) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();

    let x = dlon.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (x.atan2(y).to_degrees() + 360.0) % 360.0
}

#[inline]
pub fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

/// Round miles for display: whole miles from 100, tenths from 10, else hundredths
pub fn round_miles(miles: f64) -> f64 {
    let factor = if miles >= 100.0 {
        1.0
    } else if miles >= 10.0 {
        10.0
    } else {
        100.0
    };
    (miles * factor).round() / factor
}
