use crate::ingest::PingRecord;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two lat/lng pairs (degrees).
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    // Rounding can push `a` just past 1 for antipodal points.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Distance between two pings, or `+inf` when either lacks a fix.
pub fn ping_distance(a: &PingRecord, b: &PingRecord) -> f64 {
    match (a.coords(), b.coords()) {
        (Some((lat1, lng1)), Some((lat2, lng2))) => haversine_distance(lat1, lng1, lat2, lng2),
        _ => f64::INFINITY,
    }
}
