use std::collections::HashMap;

use async_trait::async_trait;
use model::{
    bus::{Bus, BusPosition, BusStatus},
    driver::{Driver, DriverState, DriverStateLog},
    graph::{GraphEdge, StopNode},
    route::Route,
    trip::{Trip, TripStatus},
    WithDistance, WithId,
};
use tokio::sync::RwLock;
use utility::{geo, id::Id};

use crate::store::{Result, Store, StoreError};

#[derive(Default)]
struct Inner {
    buses: HashMap<String, Bus>,
    drivers: HashMap<String, Driver>,
    routes: HashMap<String, Route>,
    trips: HashMap<String, Trip>,
    nodes: Vec<WithId<StopNode>>,
    edges: Vec<GraphEdge>,
    state_logs: Vec<DriverStateLog>,
}

/// In-process store over the same trait as [`crate::PgStore`]. Used by the
/// test suites and as the bootstrap fallback when no `DATABASE_*`
/// environment is configured. The nearby query is the plain haversine
/// filter over the full active set.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: std::sync::Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of state-log rows written so far; test helper.
    pub async fn state_log_len(&self) -> usize {
        self.inner.read().await.state_logs.len()
    }

    /// Inserts a driver row directly; drivers are otherwise created by the
    /// out-of-scope registration plane.
    pub async fn seed_driver(&self, id: &str, driver: Driver) {
        self.inner
            .write()
            .await
            .drivers
            .insert(id.to_owned(), driver);
    }

    pub async fn state_logs(&self) -> Vec<DriverStateLog> {
        self.inner.read().await.state_logs.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn bus(&self, id: &Id<Bus>) -> Result<Option<WithId<Bus>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .buses
            .get(&id.raw())
            .map(|bus| WithId::new(id.clone(), bus.clone())))
    }

    async fn all_buses(&self) -> Result<Vec<WithId<Bus>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .buses
            .iter()
            .map(|(id, bus)| WithId::new(Id::new(id.clone()), bus.clone()))
            .collect())
    }

    async fn active_buses_near(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<WithDistance<WithId<Bus>>>> {
        let inner = self.inner.read().await;
        let mut hits: Vec<WithDistance<WithId<Bus>>> = inner
            .buses
            .iter()
            .filter(|(_, bus)| bus.status == BusStatus::Active)
            .filter_map(|(id, bus)| {
                let distance = geo::haversine_distance(
                    latitude,
                    longitude,
                    bus.position.latitude,
                    bus.position.longitude,
                );
                (distance <= radius_km).then(|| {
                    WithDistance::new(distance, WithId::new(Id::new(id.clone()), bus.clone()))
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn active_buses_on_route(&self, route_id: &Id<Route>) -> Result<Vec<WithId<Bus>>> {
        let inner = self.inner.read().await;
        let route_id = route_id.raw();
        Ok(inner
            .buses
            .iter()
            .filter(|(_, bus)| {
                bus.status == BusStatus::Active
                    && bus.route_id.as_ref().map(|id| id.raw()) == Some(route_id.clone())
            })
            .map(|(id, bus)| WithId::new(Id::new(id.clone()), bus.clone()))
            .collect())
    }

    async fn put_bus(&self, bus: WithId<Bus>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.buses.insert(bus.id.raw(), bus.content);
        Ok(())
    }

    async fn update_bus_position(
        &self,
        id: &Id<Bus>,
        position: BusPosition,
        passenger_count: Option<u32>,
        timestamp: i64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let bus = inner.buses.get_mut(&id.raw()).ok_or(StoreError::NotFound)?;
        bus.position = position;
        if let Some(count) = passenger_count {
            bus.passenger_count = count.min(bus.capacity);
        }
        bus.updated_at = timestamp;
        Ok(())
    }

    async fn set_bus_control(
        &self,
        id: &Id<Bus>,
        status: BusStatus,
        simulated: bool,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let bus = inner.buses.get_mut(&id.raw()).ok_or(StoreError::NotFound)?;
        bus.status = status;
        bus.simulated = simulated;
        Ok(())
    }

    async fn release_bus_to_simulation(
        &self,
        id: &Id<Bus>,
        last_position: Option<(f64, f64)>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let bus = inner.buses.get_mut(&id.raw()).ok_or(StoreError::NotFound)?;
        bus.status = BusStatus::Active;
        bus.simulated = true;
        bus.position.speed_kmh = 0.0;
        if let Some((latitude, longitude)) = last_position {
            bus.position.latitude = latitude;
            bus.position.longitude = longitude;
        }
        bus.updated_at = utility::time::epoch_ms();
        Ok(())
    }

    async fn delete_simulated_buses(&self) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.buses.len();
        inner.buses.retain(|_, bus| !bus.simulated);
        Ok((before - inner.buses.len()) as u64)
    }

    async fn driver(&self, id: &Id<Driver>) -> Result<Option<WithId<Driver>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .drivers
            .get(&id.raw())
            .map(|driver| WithId::new(id.clone(), driver.clone())))
    }

    async fn driver_by_user(&self, user_id: &str) -> Result<Option<WithId<Driver>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .drivers
            .iter()
            .find(|(_, driver)| driver.user_id == user_id)
            .map(|(id, driver)| WithId::new(Id::new(id.clone()), driver.clone())))
    }

    async fn set_driver_state(&self, id: &Id<Driver>, state: DriverState) -> Result<()> {
        let mut inner = self.inner.write().await;
        let driver = inner
            .drivers
            .get_mut(&id.raw())
            .ok_or(StoreError::NotFound)?;
        driver.state = state;
        Ok(())
    }

    async fn append_state_log(&self, entry: DriverStateLog) -> Result<()> {
        self.inner.write().await.state_logs.push(entry);
        Ok(())
    }

    async fn route(&self, id: &Id<Route>) -> Result<Option<WithId<Route>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .routes
            .get(&id.raw())
            .map(|route| WithId::new(id.clone(), route.clone())))
    }

    async fn routes_with_stops(&self) -> Result<Vec<WithId<Route>>> {
        let inner = self.inner.read().await;
        let mut routes: Vec<WithId<Route>> = inner
            .routes
            .iter()
            .map(|(id, route)| WithId::new(Id::new(id.clone()), route.clone()))
            .collect();
        routes.sort_by(|a, b| a.content.number.cmp(&b.content.number));
        Ok(routes)
    }

    async fn put_route(&self, route: WithId<Route>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.routes.insert(route.id.raw(), route.content);
        Ok(())
    }

    async fn start_trip(&self, id: Id<Trip>, trip: Trip) -> Result<WithId<Trip>> {
        let mut inner = self.inner.write().await;
        let already_running = inner.trips.values().any(|existing| {
            existing.bus_id == trip.bus_id && existing.status == TripStatus::InProgress
        });
        if already_running {
            return Err(StoreError::Conflict(format!(
                "bus {} already has a trip in progress",
                trip.bus_id
            )));
        }
        if let Some(bus) = inner.buses.get_mut(&trip.bus_id.raw()) {
            bus.status = BusStatus::Active;
            bus.simulated = false;
        }
        inner.trips.insert(id.raw(), trip.clone());
        Ok(WithId::new(id, trip))
    }

    async fn finish_trip(
        &self,
        id: &Id<Trip>,
        status: TripStatus,
        end_time: i64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let trip = inner.trips.get_mut(&id.raw()).ok_or(StoreError::NotFound)?;
        if trip.status == TripStatus::InProgress {
            trip.status = status;
            trip.end_time = Some(end_time);
        }
        Ok(())
    }

    async fn active_trip_for_bus(&self, bus_id: &Id<Bus>) -> Result<Option<WithId<Trip>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .trips
            .iter()
            .find(|(_, trip)| {
                trip.bus_id == *bus_id && trip.status == TripStatus::InProgress
            })
            .map(|(id, trip)| WithId::new(Id::new(id.clone()), trip.clone())))
    }

    async fn replace_graph(
        &self,
        nodes: &[WithId<StopNode>],
        edges: &[GraphEdge],
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.nodes = nodes.to_vec();
        inner.edges = edges.to_vec();
        Ok(())
    }

    async fn load_graph(&self) -> Result<(Vec<WithId<StopNode>>, Vec<GraphEdge>)> {
        let inner = self.inner.read().await;
        Ok((inner.nodes.clone(), inner.edges.clone()))
    }
}
