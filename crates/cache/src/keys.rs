//! Builders for the shared keyspace. Key shapes are part of the external
//! contract (other processes subscribe to the channels and read the keys),
//! so changes here are wire-format changes.

use utility::time::time_bucket_base36;

/// ~150 m at the equator; coarse enough that nearby requests share keys.
pub const PLAN_GRID_DEG: f64 = 0.001_35;
/// Route-plan results bucket into 5-minute windows.
pub const PLAN_BUCKET_MS: i64 = 300_000;

pub const SPEED_SAMPLE_TTL_SECS: i64 = 900;
pub const RELIABILITY_TTL_SECS: i64 = 3600;
pub const PLAN_TTL_SECS: u64 = 45;
pub const PUSH_RATE_LIMIT_TTL_SECS: u64 = 600;
pub const HEARTBEAT_TTL_SECS: u64 = 300;

pub const CHANNEL_BUS_LOCATION: &str = "bus:location";

pub fn route_speed(route_id: &str) -> String {
    format!("route_speed:{route_id}")
}

pub fn route_reliability(route_id: &str) -> String {
    format!("route_reliability:{route_id}")
}

fn grid(coordinate: f64) -> i64 {
    (coordinate / PLAN_GRID_DEG).round() as i64
}

/// Smart route-plan key: spatial grid quantization of both endpoints plus a
/// base-36 5-minute time bucket.
pub fn route_plan(
    from_lat: f64,
    from_lng: f64,
    to_lat: f64,
    to_lng: f64,
    now_ms: i64,
) -> String {
    format!(
        "route:{}:{}:{}:{}:{}",
        grid(from_lat),
        grid(from_lng),
        grid(to_lat),
        grid(to_lng),
        time_bucket_base36(now_ms, PLAN_BUCKET_MS),
    )
}

pub fn push_rate_limit(user_id: &str, bus_id: &str, kind: &str) -> String {
    format!("push:ratelimit:{user_id}:{bus_id}:{kind}")
}

pub fn driver_socket(user_id: &str) -> String {
    format!("driver:socket:{user_id}")
}

pub fn bus_driver(bus_id: &str) -> String {
    format!("bus:driver:{bus_id}")
}

pub fn notifications_channel(audience: &str) -> String {
    format!("notifications:{audience}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_key_stable_within_cell_and_bucket() {
        let a = route_plan(17.38501, 78.48601, 17.44, 78.50, 1_000_000);
        let b = route_plan(17.38503, 78.48603, 17.44, 78.50, 1_100_000);
        assert_eq!(a, b);
    }

    #[test]
    fn plan_key_changes_across_buckets() {
        let a = route_plan(17.385, 78.486, 17.44, 78.50, 0);
        let b = route_plan(17.385, 78.486, 17.44, 78.50, PLAN_BUCKET_MS);
        assert_ne!(a, b);
    }

    #[test]
    fn key_shapes() {
        assert_eq!(route_speed("r1"), "route_speed:r1");
        assert_eq!(route_reliability("r1"), "route_reliability:r1");
        assert_eq!(push_rate_limit("u", "b", "occupancy"), "push:ratelimit:u:b:occupancy");
    }
}
