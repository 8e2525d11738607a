use std::{collections::HashMap, sync::Mutex};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const MIN_TRAFFIC_FACTOR: f64 = 1.0;
pub const MAX_TRAFFIC_FACTOR: f64 = 1.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficLevel {
    Low,
    Moderate,
    High,
}

impl TrafficLevel {
    pub fn from_factor(factor: f64) -> Self {
        if factor >= 1.20 {
            Self::High
        } else if factor >= 1.10 {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CongestionLevel {
    None,
    Light,
    Moderate,
    Heavy,
}

impl CongestionLevel {
    pub fn penalty_minutes(&self) -> f64 {
        match self {
            Self::Heavy => 3.0,
            Self::Moderate => 2.0,
            Self::Light => 1.0,
            Self::None => 0.0,
        }
    }

    /// Congestion classification from bus clustering and route occupancy.
    pub fn evaluate(nearby_same_route: u32, route_occupancy_avg: f64) -> Self {
        let bus_congestion = nearby_same_route >= 3;
        let heavy_cluster = nearby_same_route >= 5;
        let occupancy_congestion = route_occupancy_avg > 70.0;
        if heavy_cluster || (bus_congestion && occupancy_congestion) {
            Self::Heavy
        } else if bus_congestion || occupancy_congestion {
            Self::Moderate
        } else if nearby_same_route >= 2 || route_occupancy_avg > 50.0 {
            Self::Light
        } else {
            Self::None
        }
    }
}

/// Time-of-day baseline factor. Off-peak is free flow; the two commute
/// peaks ramp up and back down.
pub fn time_of_day_factor(hour: u32) -> f64 {
    match hour {
        8 => 1.15,
        9 => 1.25,
        10 => 1.20,
        12 | 13 => 1.05,
        17 => 1.20,
        18 => 1.30,
        19 => 1.25,
        _ => 1.00,
    }
}

/// Per-route traffic factor with exponential smoothing. Re-computing the
/// factor for every request would make ETAs oscillate with single GPS
/// readings; jumps above 0.05 blend 70/30 with the previous value.
pub struct TrafficModel {
    smoothing: Mutex<HashMap<String, f64>>,
}

impl Default for TrafficModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficModel {
    pub fn new() -> Self {
        Self {
            smoothing: Mutex::new(HashMap::new()),
        }
    }

    pub fn factor(
        &self,
        route_id: Option<&str>,
        hour: u32,
        current_speed_kmh: f64,
        route_avg_speed_kmh: f64,
        nearby_same_route: u32,
    ) -> f64 {
        let mut factor = time_of_day_factor(hour);
        if route_avg_speed_kmh > 0.0 && current_speed_kmh < 0.75 * route_avg_speed_kmh {
            factor += 0.10;
        }
        if nearby_same_route > 5 {
            factor += 0.05;
        }
        factor = factor.clamp(MIN_TRAFFIC_FACTOR, MAX_TRAFFIC_FACTOR);

        let Some(route_id) = route_id else {
            return factor;
        };
        let mut smoothing = match self.smoothing.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = smoothing.get(route_id).copied() {
            if (factor - previous).abs() > 0.05 {
                factor = (0.7 * previous + 0.3 * factor)
                    .clamp(MIN_TRAFFIC_FACTOR, MAX_TRAFFIC_FACTOR);
            }
        }
        smoothing.insert(route_id.to_owned(), factor);
        factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_has_two_peaks() {
        assert_eq!(time_of_day_factor(3), 1.00);
        assert_eq!(time_of_day_factor(9), 1.25);
        assert_eq!(time_of_day_factor(13), 1.05);
        assert_eq!(time_of_day_factor(18), 1.30);
        assert_eq!(time_of_day_factor(22), 1.00);
    }

    #[test]
    fn factor_always_in_bounds() {
        let model = TrafficModel::new();
        for hour in 0..24 {
            let factor = model.factor(None, hour, 5.0, 40.0, 9);
            assert!((MIN_TRAFFIC_FACTOR..=MAX_TRAFFIC_FACTOR).contains(&factor));
        }
    }

    #[test]
    fn slow_bus_raises_factor() {
        let model = TrafficModel::new();
        let free = model.factor(None, 3, 30.0, 30.0, 0);
        let slow = model.factor(None, 3, 15.0, 30.0, 0);
        assert_eq!(free, 1.00);
        assert!((slow - 1.10).abs() < 1e-9);
    }

    #[test]
    fn smoothing_damps_jumps() {
        let model = TrafficModel::new();
        let first = model.factor(Some("r1"), 3, 30.0, 30.0, 0);
        assert_eq!(first, 1.00);
        // next reading wants 1.15 (slow + crowded); the jump is damped
        let second = model.factor(Some("r1"), 3, 10.0, 30.0, 6);
        assert!((second - (0.7 * 1.00 + 0.3 * 1.15)).abs() < 1e-9);
    }

    #[test]
    fn congestion_cluster_levels() {
        assert_eq!(CongestionLevel::evaluate(0, 15.0), CongestionLevel::None);
        assert_eq!(CongestionLevel::evaluate(2, 15.0), CongestionLevel::Light);
        assert_eq!(CongestionLevel::evaluate(3, 15.0), CongestionLevel::Moderate);
        assert_eq!(CongestionLevel::evaluate(5, 15.0), CongestionLevel::Heavy);
        assert_eq!(CongestionLevel::evaluate(3, 80.0), CongestionLevel::Heavy);
        assert_eq!(CongestionLevel::evaluate(0, 60.0), CongestionLevel::Light);
    }

    #[test]
    fn traffic_levels() {
        assert_eq!(TrafficLevel::from_factor(1.05), TrafficLevel::Low);
        assert_eq!(TrafficLevel::from_factor(1.10), TrafficLevel::Moderate);
        assert_eq!(TrafficLevel::from_factor(1.25), TrafficLevel::High);
    }
}
