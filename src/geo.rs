//! Great-circle geometry used by the beacon geometry pass.
//!
//! Distances are short (a listener walking toward a destination), so simple
//! spherical formulas are plenty accurate.

/// Earth radius in meters (WGS-84 equatorial).
pub const EARTH_RADIUS_METERS: f64 = 6_378_137.0;

/// Normalize an angle in degrees into `[-180, 180]`.
pub fn normalize_degrees(mut degrees: f64) -> f64 {
    while degrees > 180.0 {
        degrees -= 360.0;
    }
    while degrees < -180.0 {
        degrees += 360.0;
    }
    degrees
}

/// Initial great-circle bearing from point 1 toward point 2, in degrees in
/// `[-180, 180]` (0 = north, positive = clockwise/east).
pub fn bearing_from_two_points(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let y = delta_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

/// Haversine distance between two coordinates, in meters.
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (delta_lambda / 2.0).sin().powi(2);

    EARTH_RADIUS_METERS * 2.0 * a.sqrt().asin()
}

/// Coordinate reached by travelling `distance` meters from (`lat`, `lon`)
/// along `bearing` degrees. Used to synthesize the distant fixed point that
/// stands in for a compass direction.
pub fn destination_coordinate(lat: f64, lon: f64, bearing: f64, distance: f64) -> (f64, f64) {
    let phi1 = lat.to_radians();
    let lambda1 = lon.to_radians();
    let theta = bearing.to_radians();
    let delta = distance / EARTH_RADIUS_METERS;

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    (phi2.to_degrees(), lambda2.to_degrees())
}
