use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

fn to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

fn to_degrees(radians: f64) -> f64 {
    radians * 180.0 / std::f64::consts::PI
}

/// A WGS-84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

pub fn calculate_bounding_box(
    lat: f64,
    lon: f64,
    radius_km: f64,
) -> ((f64, f64), (f64, f64)) {
    // Convert latitude and longitude from degrees to radians
    let lat_rad = to_radians(lat);
    let lon_rad = to_radians(lon);

    // Latitude bounds
    let min_lat = lat_rad - radius_km / EARTH_RADIUS_KM;
    let max_lat = lat_rad + radius_km / EARTH_RADIUS_KM;

    // Longitude bounds (adjusted by latitude)
    let min_lon = lon_rad - radius_km / (EARTH_RADIUS_KM * lat_rad.cos());
    let max_lon = lon_rad + radius_km / (EARTH_RADIUS_KM * lat_rad.cos());

    // Convert bounds back to degrees
    let min_lat_deg = to_degrees(min_lat);
    let max_lat_deg = to_degrees(max_lat);
    let min_lon_deg = to_degrees(min_lon);
    let max_lon_deg = to_degrees(max_lon);

    ((min_lat_deg, min_lon_deg), (max_lat_deg, max_lon_deg))
}

pub fn haversine_distance(
    latitude_1: f64,
    longitude_1: f64,
    latitude_2: f64,
    longitude_2: f64,
) -> f64 {
    let lat1_rad = to_radians(latitude_1);
    let lon1_rad = to_radians(longitude_1);
    let lat2_rad = to_radians(latitude_2);
    let lon2_rad = to_radians(longitude_2);

    let dlat = lat2_rad - lat1_rad;
    let dlon = lon2_rad - lon1_rad;

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

pub fn haversine_between(a: LatLng, b: LatLng) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Initial great-circle bearing from point 1 to point 2, in degrees [0, 360).
pub fn initial_bearing(
    latitude_1: f64,
    longitude_1: f64,
    latitude_2: f64,
    longitude_2: f64,
) -> f64 {
    let lat1_rad = to_radians(latitude_1);
    let lat2_rad = to_radians(latitude_2);
    let dlon = to_radians(longitude_2 - longitude_1);

    let y = dlon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin()
        - lat1_rad.sin() * lat2_rad.cos() * dlon.cos();

    (to_degrees(y.atan2(x)) + 360.0) % 360.0
}

/// Linear interpolation between two coordinates. `fraction` is clamped to
/// [0, 1]. Good enough for the short segments the simulation moves over;
/// great-circle interpolation is not worth it below a few kilometers.
pub fn interpolate(from: LatLng, to: LatLng, fraction: f64) -> LatLng {
    let f = fraction.clamp(0.0, 1.0);
    LatLng::new(
        from.latitude + (to.latitude - from.latitude) * f,
        from.longitude + (to.longitude - from.longitude) * f,
    )
}

/// Subdivides a polyline until no segment is longer than `max_segment_km`.
/// Vertices are kept; long segments get evenly spaced intermediate points.
pub fn subdivide_polyline(points: &[LatLng], max_segment_km: f64) -> Vec<LatLng> {
    if points.len() < 2 || max_segment_km <= 0.0 {
        return points.to_vec();
    }
    let mut result = Vec::with_capacity(points.len());
    for pair in points.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        result.push(from);
        let distance = haversine_between(from, to);
        if distance > max_segment_km {
            let pieces = (distance / max_segment_km).ceil() as usize;
            for i in 1..pieces {
                result.push(interpolate(from, to, i as f64 / pieces as f64));
            }
        }
    }
    if let Some(last) = points.last() {
        result.push(*last);
    }
    result
}

/// Index of the polyline vertex closest to `point`. Returns 0 for an empty
/// polyline so callers can use the result as a start index unconditionally.
pub fn nearest_vertex(points: &[LatLng], point: LatLng) -> usize {
    let mut best = 0;
    let mut best_distance = f64::MAX;
    for (i, vertex) in points.iter().enumerate() {
        let distance = haversine_between(*vertex, point);
        if distance < best_distance {
            best_distance = distance;
            best = i;
        }
    }
    best
}
