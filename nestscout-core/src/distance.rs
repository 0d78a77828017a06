//! Great-circle distance helpers.
//!
//! Coordinates are WGS84 with `x = longitude` and `y = latitude`, in degrees.
//! Distances are metres.

use geo::{Coord, Distance, Haversine, Point};
use thiserror::Error;

/// Walking speed used for walk-time estimates.
pub const WALKING_SPEED_KMH: f64 = 5.0;

/// Approximate length of one degree of latitude.
const METRES_PER_DEGREE: f64 = 111_320.0;

/// Smallest cosine used when widening a longitude window near the poles.
const MIN_COS_LATITUDE: f64 = 1e-6;

/// Errors raised when a coordinate cannot be placed on the globe.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum LocationError {
    /// A component was NaN or infinite.
    #[error("coordinate ({x}, {y}) is not finite")]
    NonFinite {
        /// Longitude as supplied.
        x: f64,
        /// Latitude as supplied.
        y: f64,
    },
    /// Latitude or longitude fell outside the WGS84 range.
    #[error("coordinate ({x}, {y}) is outside the WGS84 range")]
    OutOfRange {
        /// Longitude as supplied.
        x: f64,
        /// Latitude as supplied.
        y: f64,
    },
}

/// Check that `location` is a usable WGS84 coordinate.
///
/// # Errors
/// Returns [`LocationError`] for non-finite or out-of-range components.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use nestscout_core::distance::validate_location;
///
/// assert!(validate_location(Coord { x: 2.35, y: 48.85 }).is_ok());
/// assert!(validate_location(Coord { x: 2.35, y: 91.0 }).is_err());
/// ```
pub fn validate_location(location: Coord<f64>) -> Result<(), LocationError> {
    let Coord { x, y } = location;
    if !x.is_finite() || !y.is_finite() {
        return Err(LocationError::NonFinite { x, y });
    }
    if !(-180.0..=180.0).contains(&x) || !(-90.0..=90.0).contains(&y) {
        return Err(LocationError::OutOfRange { x, y });
    }
    Ok(())
}

/// Haversine distance between two coordinates in metres.
#[must_use]
pub fn haversine_m(from: Coord<f64>, to: Coord<f64>) -> f64 {
    Haversine.distance(Point::from(from), Point::from(to))
}

/// Estimated walking time in minutes for `distance_m` at [`WALKING_SPEED_KMH`].
///
/// # Examples
/// ```
/// use nestscout_core::distance::walk_minutes;
///
/// assert!((walk_minutes(1_000.0) - 12.0).abs() < 1e-9);
/// ```
#[expect(
    clippy::float_arithmetic,
    reason = "walk time is a linear function of distance"
)]
#[must_use]
pub fn walk_minutes(distance_m: f64) -> f64 {
    let metres_per_minute = WALKING_SPEED_KMH * 1_000.0 / 60.0;
    distance_m / metres_per_minute
}

/// Lon/lat windows that together contain every point within `radius_m` of
/// `centre`.
///
/// The windows over-approximate the circle; callers refine candidates with
/// [`haversine_m`]. Each window is a `(min, max)` pair of corners. A circle
/// crossing the antimeridian yields one window on each side of it, and a
/// circle reaching a pole spans every longitude.
#[expect(
    clippy::float_arithmetic,
    reason = "degree deltas are derived from metric radii"
)]
#[must_use]
pub fn search_windows(centre: Coord<f64>, radius_m: f64) -> Vec<(Coord<f64>, Coord<f64>)> {
    // Pad by a fraction so the spherical/ellipsoidal mismatch never clips.
    let padded = radius_m.max(0.0) * 1.01;
    let delta_lat = padded / METRES_PER_DEGREE;
    let cos_lat = centre.y.to_radians().cos().abs().max(MIN_COS_LATITUDE);
    let delta_lon = padded / (METRES_PER_DEGREE * cos_lat);
    let south = centre.y - delta_lat;
    let north = centre.y + delta_lat;
    let band = |west: f64, east: f64| {
        (
            Coord {
                x: west,
                y: south.max(-90.0),
            },
            Coord {
                x: east,
                y: north.min(90.0),
            },
        )
    };
    let west = centre.x - delta_lon;
    let east = centre.x + delta_lon;
    if delta_lon >= 180.0 || south <= -90.0 || north >= 90.0 {
        vec![band(-180.0, 180.0)]
    } else if west < -180.0 {
        vec![band(-180.0, east), band(west + 360.0, 180.0)]
    } else if east > 180.0 {
        vec![band(west, 180.0), band(-180.0, east - 360.0)]
    } else {
        vec![band(west, east)]
    }
}

/// Move `origin` by the given metric offsets (east, north).
///
/// Uses an equirectangular approximation, which is accurate to well under a
/// metre for the neighbourhood-scale offsets the engine deals with.
#[expect(
    clippy::float_arithmetic,
    reason = "metric offsets are converted into degree deltas"
)]
#[must_use]
pub fn offset_m(origin: Coord<f64>, east_m: f64, north_m: f64) -> Coord<f64> {
    let earth_radius = 6_371_008.8_f64;
    let delta_lat = (north_m / earth_radius).to_degrees();
    let cos_lat = origin.y.to_radians().cos().max(MIN_COS_LATITUDE);
    let delta_lon = (east_m / (earth_radius * cos_lat)).to_degrees();
    Coord {
        x: origin.x + delta_lon,
        y: origin.y + delta_lat,
    }
}
