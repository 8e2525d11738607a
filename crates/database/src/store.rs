use std::error;

use async_trait::async_trait;
use model::{
    bus::{Bus, BusPosition, BusStatus},
    driver::{Driver, DriverState, DriverStateLog},
    graph::{GraphEdge, StopNode},
    route::Route,
    trip::{Trip, TripStatus},
    WithDistance, WithId,
};
use utility::id::Id;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Other(Box<dyn error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The persistent-store surface the realtime core consumes. Implemented by
/// [`crate::PgStore`] over Postgres and by [`crate::MemoryStore`] for tests
/// and database-less bootstrap.
///
/// Position writes are best-effort from the caller's point of view; the
/// trip operations that must move two rows together are transactional
/// inside the implementation.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // -- buses ---------------------------------------------------------------

    async fn bus(&self, id: &Id<Bus>) -> Result<Option<WithId<Bus>>>;

    async fn all_buses(&self) -> Result<Vec<WithId<Bus>>>;

    /// Active buses within `radius_km` of a point, closest first, capped at
    /// `limit`. Implementations without a spatial index fall back to a
    /// bounding-box prefilter plus a haversine check.
    async fn active_buses_near(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<WithDistance<WithId<Bus>>>>;

    async fn active_buses_on_route(&self, route_id: &Id<Route>) -> Result<Vec<WithId<Bus>>>;

    async fn put_bus(&self, bus: WithId<Bus>) -> Result<()>;

    async fn update_bus_position(
        &self,
        id: &Id<Bus>,
        position: BusPosition,
        passenger_count: Option<u32>,
        timestamp: i64,
    ) -> Result<()>;

    /// Flip a bus between driver control and simulation.
    async fn set_bus_control(
        &self,
        id: &Id<Bus>,
        status: BusStatus,
        simulated: bool,
    ) -> Result<()>;

    /// Grace-expiry write-back: `status = ACTIVE`, `simulated = true`,
    /// `speed = 0`, and the last driver position when one was recorded.
    async fn release_bus_to_simulation(
        &self,
        id: &Id<Bus>,
        last_position: Option<(f64, f64)>,
    ) -> Result<()>;

    async fn delete_simulated_buses(&self) -> Result<u64>;

    // -- drivers -------------------------------------------------------------

    async fn driver(&self, id: &Id<Driver>) -> Result<Option<WithId<Driver>>>;

    async fn driver_by_user(&self, user_id: &str) -> Result<Option<WithId<Driver>>>;

    async fn set_driver_state(&self, id: &Id<Driver>, state: DriverState) -> Result<()>;

    async fn append_state_log(&self, entry: DriverStateLog) -> Result<()>;

    // -- routes --------------------------------------------------------------

    async fn route(&self, id: &Id<Route>) -> Result<Option<WithId<Route>>>;

    async fn routes_with_stops(&self) -> Result<Vec<WithId<Route>>>;

    async fn put_route(&self, route: WithId<Route>) -> Result<()>;

    // -- trips ---------------------------------------------------------------

    /// Creates the trip and activates its bus in one transaction. Refuses
    /// with [`StoreError::Conflict`] while the bus has an IN_PROGRESS trip.
    async fn start_trip(&self, id: Id<Trip>, trip: Trip) -> Result<WithId<Trip>>;

    async fn finish_trip(
        &self,
        id: &Id<Trip>,
        status: TripStatus,
        end_time: i64,
    ) -> Result<()>;

    async fn active_trip_for_bus(&self, bus_id: &Id<Bus>) -> Result<Option<WithId<Trip>>>;

    // -- graph snapshot ------------------------------------------------------

    /// Atomically replaces the persisted graph: both tables are cleared and
    /// refilled inside one transaction, so readers never observe a half
    /// snapshot.
    async fn replace_graph(
        &self,
        nodes: &[WithId<StopNode>],
        edges: &[GraphEdge],
    ) -> Result<()>;

    async fn load_graph(&self) -> Result<(Vec<WithId<StopNode>>, Vec<GraphEdge>)>;
}
