use model::{route::RouteKind, stop::Stop};
use rand::Rng;
use std::sync::Arc;
use utility::geo::{self, LatLng};

/// Per-tick simulated travel time.
pub(crate) const TICK_SECS: f64 = 3.0;
/// Speed envelope for free driving.
pub(crate) const MIN_SPEED_KMH: f64 = 20.0;
pub(crate) const MAX_SPEED_KMH: f64 = 40.0;
/// Smoothed speed is allowed to dip below the free-driving floor near stops.
const SPEED_FLOOR_KMH: f64 = 5.0;
const NEAR_STOP_SPEED_KMH: f64 = 8.0;
const COOLDOWN_SPEED_KMH: f64 = 13.0;
const NEAR_STOP_KM: f64 = 0.1;
const COOLDOWN_TICKS: u32 = 3;
/// Degenerate (duplicate-vertex) segments still consume this much distance.
const MIN_SEGMENT_KM: f64 = 0.005;
/// Hard guard on segment consumption per tick.
const MAX_SEGMENTS_PER_TICK: u32 = 20;
/// A vertex this close to a stop counts as serving it.
const STOP_HIT_KM: f64 = 0.05;
/// Share of riders leaving at a terminal.
const TERMINAL_ALIGHT_RATIO: f64 = 0.7;

pub(crate) struct SimBus {
    pub bus_id: String,
    pub route_id: String,
    pub route_number: String,
    pub route_kind: RouteKind,
    pub capacity: u32,
    pub passenger_count: u32,
    pub polyline: Arc<Vec<LatLng>>,
    pub stops: Arc<Vec<Stop>>,
    pub index: usize,
    /// +1 forward along the polyline, -1 backward.
    pub direction: i64,
    pub segment_progress: f64,
    pub speed_kmh: f64,
    pub traffic_factor: f64,
    pub near_stop_cooldown: u32,
    pub was_controlled: bool,
}

/// Public view of one simulated bus's internals, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct SimBusSnapshot {
    pub bus_id: String,
    pub route_id: String,
    pub index: usize,
    pub direction: i64,
    pub segment_progress: f64,
    pub speed_kmh: f64,
    pub traffic_factor: f64,
    pub passenger_count: u32,
    pub position: LatLng,
}

impl SimBus {
    pub fn position(&self) -> LatLng {
        let current = self.polyline[self.index.min(self.polyline.len() - 1)];
        match self.next_index() {
            Some(next) => geo::interpolate(
                current,
                self.polyline[next],
                self.segment_progress,
            ),
            None => current,
        }
    }

    pub fn heading(&self) -> f64 {
        let current = self.polyline[self.index.min(self.polyline.len() - 1)];
        match self.next_index() {
            Some(next) => {
                let next = self.polyline[next];
                geo::initial_bearing(
                    current.latitude,
                    current.longitude,
                    next.latitude,
                    next.longitude,
                )
            }
            None => 0.0,
        }
    }

    fn next_index(&self) -> Option<usize> {
        let candidate = self.index as i64 + self.direction;
        if candidate < 0 || candidate as usize >= self.polyline.len() {
            None
        } else {
            Some(candidate as usize)
        }
    }

    fn at_terminal(&self) -> bool {
        self.next_index().is_none()
    }

    fn distance_to_nearest_stop(&self) -> f64 {
        let position = self.position();
        self.stops
            .iter()
            .map(|stop| stop.distance_km_to(position.latitude, position.longitude))
            .fold(f64::MAX, f64::min)
    }

    /// Snaps onto the polyline vertex closest to the driver's last reported
    /// position and restarts at the minimum speed. No visible jump back to
    /// wherever the simulation left the bus.
    pub fn resume_from(&mut self, last_driver_position: Option<(f64, f64)>) {
        if let Some((latitude, longitude)) = last_driver_position {
            self.index = geo::nearest_vertex(
                &self.polyline,
                LatLng::new(latitude, longitude),
            );
        }
        self.segment_progress = 0.0;
        self.speed_kmh = MIN_SPEED_KMH;
        self.was_controlled = false;
    }

    /// One 3-second step. Pure state math; persistence happens in the
    /// engine afterwards.
    pub fn advance<R: Rng>(&mut self, rng: &mut R) {
        if self.polyline.len() < 2 {
            return;
        }

        let near_stop = self.distance_to_nearest_stop() < NEAR_STOP_KM;

        // traffic drifts a little every tick
        self.traffic_factor =
            (self.traffic_factor + rng.gen_range(-0.01..=0.01)).clamp(1.0, 1.3);

        let target_speed = if near_stop {
            self.near_stop_cooldown = COOLDOWN_TICKS;
            NEAR_STOP_SPEED_KMH
        } else if self.near_stop_cooldown > 0 {
            self.near_stop_cooldown -= 1;
            COOLDOWN_SPEED_KMH
        } else {
            rng.gen_range(MIN_SPEED_KMH..=MAX_SPEED_KMH) / self.traffic_factor
        };
        self.speed_kmh = (self.speed_kmh + 0.3 * (target_speed - self.speed_kmh))
            .clamp(SPEED_FLOOR_KMH, MAX_SPEED_KMH);

        let Some(next) = self.next_index() else {
            // parked exactly on a terminal vertex: turn around
            self.reverse_at_terminal(rng);
            return;
        };
        let segment_km = geo::haversine_between(self.polyline[self.index], self.polyline[next])
            .max(MIN_SEGMENT_KM);
        let distance_per_tick = self.speed_kmh / 3600.0 * TICK_SECS;
        self.segment_progress += distance_per_tick / segment_km;

        let mut consumed = 0;
        while self.segment_progress >= 1.0 && consumed < MAX_SEGMENTS_PER_TICK {
            consumed += 1;
            self.segment_progress -= 1.0;
            let Some(next) = self.next_index() else {
                break;
            };
            self.index = next;

            if self.at_terminal() {
                self.reverse_at_terminal(rng);
                break;
            }
            if self.vertex_serves_stop() {
                self.exchange_passengers(rng);
            }
        }
    }

    fn reverse_at_terminal<R: Rng>(&mut self, rng: &mut R) {
        self.direction = -self.direction;
        self.segment_progress = 0.0;
        let alighting = (self.passenger_count as f64 * TERMINAL_ALIGHT_RATIO) as u32;
        self.passenger_count -= alighting.min(self.passenger_count);
        // terminals always pick up a few waiting riders
        self.exchange_passengers(rng);
    }

    fn vertex_serves_stop(&self) -> bool {
        let vertex = self.polyline[self.index];
        self.stops
            .iter()
            .any(|stop| stop.distance_km_to(vertex.latitude, vertex.longitude) < STOP_HIT_KM)
    }

    fn exchange_passengers<R: Rng>(&mut self, rng: &mut R) {
        let (board_max, alight_max) = match self.route_kind {
            RouteKind::Major => (12, 8),
            RouteKind::Minor => (5, 3),
        };
        let alighting = rng.gen_range(0..=alight_max).min(self.passenger_count);
        self.passenger_count -= alighting;
        let boarding =
            rng.gen_range(0..=board_max).min(self.capacity - self.passenger_count);
        self.passenger_count += boarding;
    }

    pub fn snapshot(&self) -> SimBusSnapshot {
        SimBusSnapshot {
            bus_id: self.bus_id.clone(),
            route_id: self.route_id.clone(),
            index: self.index,
            direction: self.direction,
            segment_progress: self.segment_progress,
            speed_kmh: self.speed_kmh,
            traffic_factor: self.traffic_factor,
            passenger_count: self.passenger_count,
            position: self.position(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;

    fn straight_line(points: usize) -> Arc<Vec<LatLng>> {
        Arc::new(
            (0..points)
                .map(|i| LatLng::new(17.0 + i as f64 * 0.0002, 78.0))
                .collect(),
        )
    }

    fn bus() -> SimBus {
        SimBus {
            bus_id: "sim-1".to_owned(),
            route_id: "r1".to_owned(),
            route_number: "10".to_owned(),
            route_kind: RouteKind::Major,
            capacity: 40,
            passenger_count: 10,
            polyline: straight_line(50),
            stops: Arc::new(vec![]),
            index: 0,
            direction: 1,
            segment_progress: 0.0,
            speed_kmh: 30.0,
            traffic_factor: 1.1,
            near_stop_cooldown: 0,
            was_controlled: false,
        }
    }

    #[test]
    fn advance_moves_forward_with_bounded_speed() {
        let mut bus = bus();
        let mut rng = SmallRng::seed_from_u64(7);
        let start = bus.position();
        for _ in 0..10 {
            bus.advance(&mut rng);
            assert!((5.0..=40.0).contains(&bus.speed_kmh));
            assert!((1.0..=1.3).contains(&bus.traffic_factor));
            assert!(bus.passenger_count <= bus.capacity);
        }
        let end = bus.position();
        assert!(geo::haversine_between(start, end) > 0.0);
        assert!(bus.index > 0 || bus.segment_progress > 0.0);
    }

    #[test]
    fn reverses_at_the_terminal() {
        let mut bus = bus();
        bus.polyline = straight_line(3);
        bus.index = 1;
        bus.segment_progress = 0.99;
        bus.speed_kmh = 40.0;
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..200 {
            bus.advance(&mut rng);
            if bus.direction == -1 {
                break;
            }
        }
        assert_eq!(bus.direction, -1);
        assert_eq!(bus.segment_progress, 0.0);
    }

    #[test]
    fn terminal_alights_most_passengers() {
        let mut bus = bus();
        bus.polyline = straight_line(2);
        bus.index = 1;
        bus.passenger_count = 30;
        // next_index is None at the last vertex going forward
        let mut rng = SmallRng::seed_from_u64(1);
        bus.advance(&mut rng);
        assert_eq!(bus.direction, -1);
        // 70% alight leaves at most 9 before terminal boarding
        assert!(bus.passenger_count <= 9 + 12);
    }

    #[test]
    fn near_stop_slows_down() {
        let mut bus = bus();
        bus.stops = Arc::new(vec![Stop {
            name: "Here".to_owned(),
            latitude: 17.0,
            longitude: 78.0,
            stop_order: 0,
        }]);
        bus.speed_kmh = 40.0;
        let mut rng = SmallRng::seed_from_u64(3);
        bus.advance(&mut rng);
        // pulled toward 8 km/h by smoothing
        assert!(bus.speed_kmh < 40.0);
        assert_eq!(bus.near_stop_cooldown, 3);
    }

    #[test]
    fn resume_snaps_to_nearest_vertex() {
        let mut bus = bus();
        bus.index = 40;
        bus.segment_progress = 0.7;
        bus.speed_kmh = 33.0;
        bus.was_controlled = true;
        // driver last reported near vertex 5
        bus.resume_from(Some((17.0 + 5.0 * 0.0002, 78.0)));
        assert_eq!(bus.index, 5);
        assert_eq!(bus.segment_progress, 0.0);
        assert_eq!(bus.speed_kmh, MIN_SPEED_KMH);
        assert!(!bus.was_controlled);
    }

    #[test]
    fn resume_without_position_keeps_index() {
        let mut bus = bus();
        bus.index = 12;
        bus.was_controlled = true;
        bus.resume_from(None);
        assert_eq!(bus.index, 12);
        assert_eq!(bus.speed_kmh, MIN_SPEED_KMH);
    }
}
