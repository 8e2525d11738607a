use std::{collections::HashMap, sync::Arc, time::Duration};

use database::{Result, Store};
use model::{
    bus::{Bus, BusPosition, BusStatus, BusView},
    WithId,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use realtime::{channel::Hub, events::ServerEvent, HybridManager};
use tokio::sync::Mutex;
use utility::{geo, id::Id, time::epoch_ms};

use crate::bus::{SimBus, SimBusSnapshot, MIN_SPEED_KMH};

pub const TICK_INTERVAL: Duration = Duration::from_secs(3);
/// Coverage watchdog cadence.
pub const COVERAGE_INTERVAL_SECS: u64 = 300;
/// A route with no active buses and no driver for this long gets flagged.
const COVERAGE_STALE_MS: i64 = 30 * 60 * 1000;
/// Polyline segments are subdivided down to this length.
const SEGMENT_MAX_KM: f64 = 0.03;
const DEFAULT_CAPACITY: u32 = 40;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Fleet size target across all routes.
    pub target_buses: usize,
    /// Fixed seed for reproducible runs; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            target_buses: 20,
            seed: None,
        }
    }
}

/// Advances the virtual fleet. One instance, one ticker task; the hybrid
/// manager decides per tick which buses the simulation may touch.
pub struct SimulationEngine<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    hub: Arc<Hub>,
    hybrid: Arc<HybridManager<S>>,
    config: SimulationConfig,
    buses: Mutex<HashMap<String, SimBus>>,
    rng: Mutex<SmallRng>,
}

impl<S: Store, C: cache::Cache> SimulationEngine<S, C> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<C>,
        hub: Arc<Hub>,
        hybrid: Arc<HybridManager<S>>,
        config: SimulationConfig,
    ) -> Arc<Self> {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Arc::new(Self {
            store,
            cache,
            hub,
            hybrid,
            config,
            buses: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        })
    }

    /// Builds the fleet: clears previous simulated rows, spreads
    /// `target_buses` across the routes, randomizes each bus along its
    /// subdivided polyline and persists the rows.
    pub async fn spawn_fleet(&self) -> Result<usize> {
        let routes = self.store.routes_with_stops().await?;
        self.store.delete_simulated_buses().await?;

        if routes.is_empty() {
            log::warn!("no routes available, simulation fleet not spawned");
            return Ok(0);
        }
        let per_route = self.config.target_buses.div_ceil(routes.len());

        let mut fleet = self.buses.lock().await;
        let mut rng = self.rng.lock().await;
        fleet.clear();

        for route in &routes {
            let polyline = Arc::new(geo::subdivide_polyline(
                &route.content.effective_polyline(),
                SEGMENT_MAX_KM,
            ));
            if polyline.len() < 2 {
                log::warn!("route {} has no usable geometry, skipped", route.id);
                continue;
            }
            let stops = Arc::new(route.content.stops.clone());

            for ordinal in 0..per_route {
                let bus_id = format!("sim-{}-{ordinal}", route.id);
                let index = rng.gen_range(0..polyline.len() - 1);
                let direction = if rng.gen_bool(0.5) { 1 } else { -1 };
                let occupancy = rng.gen_range(0.05..=0.50);
                let passenger_count =
                    (DEFAULT_CAPACITY as f64 * occupancy).round() as u32;
                let speed_kmh = rng.gen_range(MIN_SPEED_KMH..=40.0);

                let sim = SimBus {
                    bus_id: bus_id.clone(),
                    route_id: route.id.raw(),
                    route_number: route.content.number.clone(),
                    route_kind: route.content.kind,
                    capacity: DEFAULT_CAPACITY,
                    passenger_count,
                    polyline: Arc::clone(&polyline),
                    stops: Arc::clone(&stops),
                    index,
                    direction,
                    segment_progress: 0.0,
                    speed_kmh,
                    traffic_factor: 1.0,
                    near_stop_cooldown: 0,
                    was_controlled: false,
                };
                let position = sim.position();
                let row = Bus {
                    registration_no: bus_id.to_uppercase(),
                    capacity: DEFAULT_CAPACITY,
                    position: BusPosition {
                        latitude: position.latitude,
                        longitude: position.longitude,
                        heading: sim.heading(),
                        speed_kmh,
                    },
                    passenger_count,
                    status: BusStatus::Active,
                    route_id: Some(route.id.clone()),
                    simulated: true,
                    updated_at: epoch_ms(),
                };
                self.store
                    .put_bus(WithId::new(Id::new(bus_id.clone()), row))
                    .await?;
                fleet.insert(bus_id, sim);
            }
        }

        log::info!(
            "simulation fleet spawned: {} buses over {} routes",
            fleet.len(),
            routes.len()
        );
        Ok(fleet.len())
    }

    /// One tick: advance every bus the simulation owns right now, persist
    /// the updates write-through, then broadcast a single snapshot list.
    pub async fn tick(&self) {
        let now = epoch_ms();
        let mut views: Vec<BusView> = Vec::new();

        {
            let mut fleet = self.buses.lock().await;
            let mut rng = self.rng.lock().await;

            for sim in fleet.values_mut() {
                // ownership is re-read per bus; a bus never advances while
                // a driver (or their grace window) holds it
                if self.hybrid.is_controlled(&sim.bus_id)
                    || self.hybrid.is_in_grace(&sim.bus_id)
                {
                    sim.was_controlled = true;
                    continue;
                }
                if sim.was_controlled {
                    sim.resume_from(self.hybrid.last_position(&sim.bus_id));
                }

                sim.advance(&mut *rng);

                let position = sim.position();
                views.push(BusView {
                    bus_id: sim.bus_id.clone(),
                    registration_no: sim.bus_id.to_uppercase(),
                    route_id: Some(sim.route_id.clone()),
                    route_number: Some(sim.route_number.clone()),
                    latitude: position.latitude,
                    longitude: position.longitude,
                    heading: sim.heading(),
                    speed_kmh: sim.speed_kmh,
                    passenger_count: sim.passenger_count,
                    capacity: sim.capacity,
                    occupancy_percent: if sim.capacity > 0 {
                        sim.passenger_count as f64 / sim.capacity as f64 * 100.0
                    } else {
                        0.0
                    },
                    status: BusStatus::Active,
                    simulated: true,
                    timestamp: now,
                });
            }
        }

        for view in &views {
            let id = Id::new(view.bus_id.clone());
            let position = BusPosition {
                latitude: view.latitude,
                longitude: view.longitude,
                heading: view.heading,
                speed_kmh: view.speed_kmh,
            };
            if let Err(why) = self
                .store
                .update_bus_position(&id, position, Some(view.passenger_count), now)
                .await
            {
                // per-bus failures skip that bus for the tick
                log::warn!("simulated position write failed for {}: {why}", view.bus_id);
            }
        }

        if !views.is_empty() {
            self.hub
                .broadcast_passenger(&ServerEvent::BusesSnapshot(views.clone()));
            self.publish_snapshot(&views).await;
            self.hub.broadcast_admin(&ServerEvent::BusesUpdate(views));
        }
    }

    /// Flags routes with neither simulated coverage nor recent drivers.
    pub async fn coverage_sweep(&self) {
        let routes = match self.store.routes_with_stops().await {
            Ok(routes) => routes,
            Err(why) => {
                log::warn!("coverage sweep route query failed: {why}");
                return;
            }
        };
        let now = epoch_ms();
        for route in routes {
            let active = match self.store.active_buses_on_route(&route.id).await {
                Ok(buses) => buses.len(),
                Err(why) => {
                    log::warn!("coverage query failed for route {}: {why}", route.id);
                    continue;
                }
            };
            if active > 0 {
                continue;
            }
            let stale = self
                .hybrid
                .last_driver_seen(&route.id.raw())
                .map_or(true, |seen| now - seen > COVERAGE_STALE_MS);
            if stale {
                log::warn!(
                    "route {} ({}) has no active coverage",
                    route.id,
                    route.content.number
                );
            }
        }
    }

    pub async fn fleet_size(&self) -> usize {
        self.buses.lock().await.len()
    }

    pub async fn snapshots(&self) -> Vec<SimBusSnapshot> {
        self.buses
            .lock()
            .await
            .values()
            .map(SimBus::snapshot)
            .collect()
    }

    /// `true` while the cache connection is healthy enough to publish; the
    /// tick loop itself never depends on the cache.
    pub async fn publish_snapshot(&self, views: &[BusView]) {
        if let Ok(payload) = serde_json::to_string(views) {
            if let Err(why) = self
                .cache
                .publish(cache::keys::CHANNEL_BUS_LOCATION, &payload)
                .await
            {
                log::debug!("snapshot publish failed: {why}");
            }
        }
    }
}
