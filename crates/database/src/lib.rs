use std::env;

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

pub mod memory;
pub mod queries;
pub mod rows;
pub mod store;

pub use memory::MemoryStore;
pub use store::{Result, Store, StoreError};

use queries::convert_error;

pub struct DatabaseConnectionInfo {
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub port: u16,
    pub database: String,
}

impl DatabaseConnectionInfo {
    pub fn from_env() -> Option<Self> {
        let username = env::var("DATABASE_USER").ok()?;
        let password = env::var("DATABASE_PASSWORD").ok()?;
        let hostname = env::var("DATABASE_HOST").ok()?;
        let port: u16 = env::var("DATABASE_PORT").ok()?.parse().ok()?;
        let database = env::var("DATABASE_NAME").ok()?;
        Some(Self {
            username,
            password,
            hostname,
            port,
            database,
        })
    }

    fn postgres_url(self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.hostname, self.port, self.database
        )
    }
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub async fn connect(info: DatabaseConnectionInfo) -> Result<Self> {
        let url = info.postgres_url();
        let pool = sqlx::postgres::PgPool::connect(&url)
            .await
            .map_err(convert_error)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|why| StoreError::Other(Box::new(why)))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn bus(&self, id: &Id<Bus>) -> Result<Option<WithId<Bus>>> {
        queries::bus::get(&self.pool, id).await
    }

    async fn all_buses(&self) -> Result<Vec<WithId<Bus>>> {
        queries::bus::get_all(&self.pool).await
    }

    async fn active_buses_near(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<WithDistance<WithId<Bus>>>> {
        queries::bus::get_nearby_active(&self.pool, latitude, longitude, radius_km, limit)
            .await
    }

    async fn active_buses_on_route(&self, route_id: &Id<Route>) -> Result<Vec<WithId<Bus>>> {
        queries::bus::get_active_on_route(&self.pool, route_id).await
    }

    async fn put_bus(&self, bus: WithId<Bus>) -> Result<()> {
        queries::bus::put(&self.pool, &bus).await
    }

    async fn update_bus_position(
        &self,
        id: &Id<Bus>,
        position: BusPosition,
        passenger_count: Option<u32>,
        timestamp: i64,
    ) -> Result<()> {
        queries::bus::update_position(&self.pool, id, position, passenger_count, timestamp)
            .await
    }

    async fn set_bus_control(
        &self,
        id: &Id<Bus>,
        status: BusStatus,
        simulated: bool,
    ) -> Result<()> {
        queries::bus::set_control(&self.pool, id, status, simulated).await
    }

    async fn release_bus_to_simulation(
        &self,
        id: &Id<Bus>,
        last_position: Option<(f64, f64)>,
    ) -> Result<()> {
        let now = utility::time::epoch_ms();
        queries::bus::release_to_simulation(&self.pool, id, last_position, now).await
    }

    async fn delete_simulated_buses(&self) -> Result<u64> {
        queries::bus::delete_simulated(&self.pool).await
    }

    async fn driver(&self, id: &Id<Driver>) -> Result<Option<WithId<Driver>>> {
        queries::driver::get(&self.pool, id).await
    }

    async fn driver_by_user(&self, user_id: &str) -> Result<Option<WithId<Driver>>> {
        queries::driver::get_by_user(&self.pool, user_id).await
    }

    async fn set_driver_state(&self, id: &Id<Driver>, state: DriverState) -> Result<()> {
        queries::driver::set_state(&self.pool, id, state).await
    }

    async fn append_state_log(&self, entry: DriverStateLog) -> Result<()> {
        queries::driver::append_state_log(&self.pool, &entry).await
    }

    async fn route(&self, id: &Id<Route>) -> Result<Option<WithId<Route>>> {
        queries::route::get(&self.pool, id).await
    }

    async fn routes_with_stops(&self) -> Result<Vec<WithId<Route>>> {
        queries::route::get_all_with_stops(&self.pool).await
    }

    async fn put_route(&self, route: WithId<Route>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(convert_error)?;
        queries::route::put(&mut tx, &route).await?;
        tx.commit().await.map_err(convert_error)
    }

    async fn start_trip(&self, id: Id<Trip>, trip: Trip) -> Result<WithId<Trip>> {
        let mut tx = self.pool.begin().await.map_err(convert_error)?;
        if let Some(active) = queries::trip::active_for_bus(&mut *tx, &trip.bus_id).await? {
            return Err(StoreError::Conflict(format!(
                "bus {} already has trip {} in progress",
                trip.bus_id, active.id
            )));
        }
        queries::trip::insert(&mut *tx, &id, &trip).await?;
        queries::bus::set_control(&mut *tx, &trip.bus_id, BusStatus::Active, false).await?;
        tx.commit().await.map_err(convert_error)?;
        Ok(WithId::new(id, trip))
    }

    async fn finish_trip(
        &self,
        id: &Id<Trip>,
        status: TripStatus,
        end_time: i64,
    ) -> Result<()> {
        queries::trip::finish(&self.pool, id, status, end_time).await
    }

    async fn active_trip_for_bus(&self, bus_id: &Id<Bus>) -> Result<Option<WithId<Trip>>> {
        queries::trip::active_for_bus(&self.pool, bus_id).await
    }

    async fn replace_graph(
        &self,
        nodes: &[WithId<StopNode>],
        edges: &[GraphEdge],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(convert_error)?;
        queries::graph::replace(&mut tx, nodes, edges).await?;
        tx.commit().await.map_err(convert_error)
    }

    async fn load_graph(&self) -> Result<(Vec<WithId<StopNode>>, Vec<GraphEdge>)> {
        queries::graph::load_all(&self.pool).await
    }
}
