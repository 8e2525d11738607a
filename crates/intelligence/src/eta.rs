use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::geo;

use crate::{
    speed_memory::SpeedMemory,
    traffic::{CongestionLevel, TrafficLevel, TrafficModel},
    MIN_SPEED_KMH,
};
use cache::Cache;

#[derive(Debug, Clone)]
pub struct EtaRequest {
    pub bus_latitude: f64,
    pub bus_longitude: f64,
    pub target_latitude: f64,
    pub target_longitude: f64,
    pub current_speed_kmh: f64,
    pub route_avg_speed_kmh: f64,
    pub route_id: Option<String>,
    /// Local hour of day, drives the traffic baseline.
    pub hour: u32,
    pub upcoming_stops: u32,
    pub occupancy_percent: f64,
    /// Other buses on the same route within ~300 m.
    pub nearby_same_route: u32,
    pub route_occupancy_avg: f64,
}

impl Default for EtaRequest {
    fn default() -> Self {
        Self {
            bus_latitude: 0.0,
            bus_longitude: 0.0,
            target_latitude: 0.0,
            target_longitude: 0.0,
            current_speed_kmh: 0.0,
            route_avg_speed_kmh: 0.0,
            route_id: None,
            hour: 3,
            upcoming_stops: 0,
            occupancy_percent: 0.0,
            nearby_same_route: 0,
            route_occupancy_avg: 0.0,
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtaEstimate {
    pub estimated_minutes: u32,
    pub formatted: String,
    pub distance_km: f64,
    pub weighted_speed_kmh: f64,
    pub traffic_factor: f64,
    pub traffic_level: TrafficLevel,
    pub congestion_level: CongestionLevel,
    pub congestion_penalty_min: f64,
    pub stop_delay_min: f64,
    /// Samples behind the historical component; feeds the confidence score.
    pub historical_samples: usize,
}

/// Predictive ETA. Blends the live speed, the declared route average and
/// the recent per-route history, then applies traffic, dwell and congestion
/// adjustments.
pub struct EtaEngine<C> {
    speed_memory: SpeedMemory<C>,
    traffic: TrafficModel,
}

impl<C: Cache> EtaEngine<C> {
    pub fn new(speed_memory: SpeedMemory<C>) -> Self {
        Self {
            speed_memory,
            traffic: TrafficModel::new(),
        }
    }

    pub async fn estimate(&self, request: &EtaRequest, now_ms: i64) -> EtaEstimate {
        let historical = match &request.route_id {
            Some(route_id) => {
                self.speed_memory
                    .windowed_average(route_id, SpeedMemory::<C>::ETA_WINDOW_MS, now_ms)
                    .await
            }
            None => None,
        };
        self.estimate_with_historical(request, historical)
    }

    /// Pure core; `historical` is the 5-minute windowed route average with
    /// its sample count, when one exists.
    pub fn estimate_with_historical(
        &self,
        request: &EtaRequest,
        historical: Option<(f64, usize)>,
    ) -> EtaEstimate {
        let distance_km = geo::haversine_distance(
            request.bus_latitude,
            request.bus_longitude,
            request.target_latitude,
            request.target_longitude,
        );

        let (historical_speed, historical_samples) =
            historical.unwrap_or((request.route_avg_speed_kmh, 0));
        let weighted_speed_kmh = (0.4 * request.current_speed_kmh.max(MIN_SPEED_KMH)
            + 0.4 * request.route_avg_speed_kmh.max(MIN_SPEED_KMH)
            + 0.2 * historical_speed.max(MIN_SPEED_KMH))
        .max(MIN_SPEED_KMH);

        let traffic_factor = self.traffic.factor(
            request.route_id.as_deref(),
            request.hour,
            request.current_speed_kmh,
            request.route_avg_speed_kmh,
            request.nearby_same_route,
        );
        let traffic_level = TrafficLevel::from_factor(traffic_factor);

        let dwell_secs: f64 = if request.occupancy_percent > 70.0 {
            20.0_f64
        } else if request.occupancy_percent > 40.0 {
            12.0_f64
        } else {
            6.0_f64
        }
        .min(25.0);
        let stop_delay_min = request.upcoming_stops as f64 * dwell_secs / 60.0;

        let congestion_level = CongestionLevel::evaluate(
            request.nearby_same_route,
            request.route_occupancy_avg,
        );
        let congestion_penalty_min = congestion_level.penalty_minutes();

        let raw_minutes = (distance_km / weighted_speed_kmh) * 60.0 * traffic_factor
            + stop_delay_min
            + congestion_penalty_min;
        let estimated_minutes = if raw_minutes.is_finite() {
            raw_minutes.max(0.0).round() as u32
        } else {
            0
        };

        EtaEstimate {
            estimated_minutes,
            formatted: format_minutes(estimated_minutes),
            distance_km,
            weighted_speed_kmh,
            traffic_factor,
            traffic_level,
            congestion_level,
            congestion_penalty_min,
            stop_delay_min,
            historical_samples,
        }
    }
}

fn format_minutes(minutes: u32) -> String {
    if minutes < 1 {
        "Arriving now".to_owned()
    } else if minutes < 60 {
        format!("{minutes} min")
    } else {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cache::MemoryCache;

    use super::*;

    fn engine() -> EtaEngine<MemoryCache> {
        EtaEngine::new(SpeedMemory::new(Arc::new(MemoryCache::new())))
    }

    fn stable_request() -> EtaRequest {
        EtaRequest {
            bus_latitude: 17.385,
            bus_longitude: 78.486,
            target_latitude: 17.440,
            target_longitude: 78.500,
            current_speed_kmh: 30.0,
            route_avg_speed_kmh: 30.0,
            hour: 3,
            occupancy_percent: 20.0,
            route_occupancy_avg: 15.0,
            ..Default::default()
        }
    }

    #[test]
    fn stable_eta() {
        let engine = engine();
        let estimate = engine.estimate_with_historical(&stable_request(), None);
        assert_eq!(estimate.traffic_level, TrafficLevel::Low);
        assert_eq!(estimate.congestion_level, CongestionLevel::None);
        assert!(
            (13..=15).contains(&estimate.estimated_minutes),
            "got {}",
            estimate.estimated_minutes
        );
    }

    #[test]
    fn eta_stable_under_speed_oscillation() {
        let engine = engine();
        let base = engine
            .estimate_with_historical(&stable_request(), None)
            .estimated_minutes as f64;
        for speed in [25.0, 35.0] {
            let request = EtaRequest {
                current_speed_kmh: speed,
                ..stable_request()
            };
            let estimate = engine.estimate_with_historical(&request, None);
            let delta = (estimate.estimated_minutes as f64 - base).abs();
            assert!(delta / base <= 0.15, "delta {delta} base {base}");
        }
    }

    #[test]
    fn traffic_spike_raises_eta_without_doubling() {
        let engine = engine();
        let stable = engine.estimate_with_historical(&stable_request(), None);
        let spike = engine.estimate_with_historical(
            &EtaRequest {
                current_speed_kmh: 21.0,
                nearby_same_route: 4,
                route_occupancy_avg: 75.0,
                ..stable_request()
            },
            None,
        );
        assert!(spike.traffic_factor > 1.0 && spike.traffic_factor <= 1.30);
        assert!(spike.estimated_minutes > stable.estimated_minutes);
        let ratio = spike.estimated_minutes as f64 / stable.estimated_minutes as f64;
        assert!(ratio < 2.0, "ratio {ratio}");
    }

    #[test]
    fn dwell_clamp() {
        let engine = engine();
        let estimate = engine.estimate_with_historical(
            &EtaRequest {
                occupancy_percent: 85.0,
                upcoming_stops: 4,
                ..stable_request()
            },
            None,
        );
        assert!(estimate.stop_delay_min <= 4.0 * 25.0 / 60.0);
    }

    #[test]
    fn zero_speeds_fall_back_to_min_speed() {
        let engine = engine();
        let estimate = engine.estimate_with_historical(
            &EtaRequest {
                current_speed_kmh: 0.0,
                route_avg_speed_kmh: 0.0,
                ..stable_request()
            },
            None,
        );
        assert!(estimate.estimated_minutes > 0);
        assert_eq!(estimate.weighted_speed_kmh, MIN_SPEED_KMH);
    }

    #[test]
    fn same_point_is_arriving_now() {
        let engine = engine();
        let estimate = engine.estimate_with_historical(
            &EtaRequest {
                target_latitude: 17.385,
                target_longitude: 78.486,
                ..stable_request()
            },
            None,
        );
        assert_eq!(estimate.estimated_minutes, 0);
        assert_eq!(estimate.formatted, "Arriving now");
    }

    #[test]
    fn negative_speed_still_non_negative_eta() {
        let engine = engine();
        let estimate = engine.estimate_with_historical(
            &EtaRequest {
                current_speed_kmh: -10.0,
                ..stable_request()
            },
            None,
        );
        assert!(estimate.estimated_minutes > 0);
    }

    #[test]
    fn nan_input_yields_zero_eta() {
        let engine = engine();
        let estimate = engine.estimate_with_historical(
            &EtaRequest {
                bus_latitude: f64::NAN,
                ..stable_request()
            },
            None,
        );
        assert_eq!(estimate.estimated_minutes, 0);
    }

    #[test]
    fn invariants_hold_across_input_grid() {
        let engine = engine();
        for stops in [0, 2, 6] {
            for occupancy in [10.0, 55.0, 90.0] {
                for nearby in [0, 3, 7] {
                    let estimate = engine.estimate_with_historical(
                        &EtaRequest {
                            upcoming_stops: stops,
                            occupancy_percent: occupancy,
                            nearby_same_route: nearby,
                            hour: 18,
                            ..stable_request()
                        },
                        Some((28.0, 12)),
                    );
                    assert!((1.0..=1.3).contains(&estimate.traffic_factor));
                    assert!(estimate.stop_delay_min <= stops as f64 * 25.0 / 60.0);
                }
            }
        }
    }

    #[test]
    fn formats() {
        assert_eq!(format_minutes(0), "Arriving now");
        assert_eq!(format_minutes(42), "42 min");
        assert_eq!(format_minutes(75), "1h 15m");
    }
}
