//! # Geographic Utilities
//!
//! Distance and extent helpers used when presenting routes on a map.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two fixes |
//! | [`polyline_length`] | Total length of a recorded track in meters |
//! | [`average_speed_mps`] | Average speed over a distance and duration |
//!
//! All functions expect WGS84 coordinates in degrees. Invalid fixes (see
//! [`Location::is_valid`]) are skipped by the track functions.
//!
//! ## Example
//!
//! ```rust
//! use ride_tracker::{Location, geo_utils};
//!
//! let track = vec![
//!     Location::new(51.5074, -0.1278, 0),
//!     Location::new(51.5080, -0.1290, 10_000),
//!     Location::new(51.5090, -0.1300, 20_000),
//! ];
//!
//! let length = geo_utils::polyline_length(&track);
//! assert!(length > 100.0 && length < 300.0);
//! ```

use geo::{Distance, Haversine, Point};

use crate::Location;

/// Calculate the great-circle distance between two fixes in meters.
///
/// ```rust
/// use ride_tracker::{Location, geo_utils};
///
/// let london = Location::new(51.5074, -0.1278, 0);
/// let paris = Location::new(48.8566, 2.3522, 0);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 5000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(a: &Location, b: &Location) -> f64 {
    let point1 = Point::new(a.longitude, a.latitude);
    let point2 = Point::new(b.longitude, b.latitude);
    Haversine::distance(point1, point2)
}

/// Total length of a track in meters, summing consecutive valid fixes.
///
/// Order matters: pass the fixes in the order they were recorded (either
/// direction gives the same length). Fewer than two valid fixes yield 0.0.
pub fn polyline_length(track: &[Location]) -> f64 {
    let valid: Vec<&Location> = track.iter().filter(|l| l.is_valid()).collect();
    if valid.len() < 2 {
        return 0.0;
    }

    valid
        .windows(2)
        .map(|w| haversine_distance(w[0], w[1]))
        .sum()
}

/// Average speed in meters per second. `None` for non-positive durations.
#[inline]
pub fn average_speed_mps(distance_meters: f64, duration_ms: i64) -> Option<f64> {
    if duration_ms <= 0 {
        return None;
    }
    Some(distance_meters / (duration_ms as f64 / 1000.0))
}

// =============================================================================
// Unit Tests
// =============================================================================
