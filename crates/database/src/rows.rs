use model::{
    bus::{Bus, BusPosition, BusStatus},
    driver::{Driver, DriverState},
    graph::{GraphEdge, StopNode},
    route::{Route, RouteKind},
    stop::Stop,
    trip::{Trip, TripStatus},
    WithId,
};
use sqlx::FromRow;
use utility::{geo::LatLng, id::Id};

use crate::store::StoreError;

fn bad_enum(column: &str, value: &str) -> StoreError {
    StoreError::Other(format!("unexpected {column} value: {value}").into())
}

#[derive(Debug, FromRow)]
pub struct BusRow {
    pub id: String,
    pub registration_no: String,
    pub capacity: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
    pub speed_kmh: f64,
    pub passenger_count: i32,
    pub status: String,
    pub route_id: Option<String>,
    pub simulated: bool,
    pub updated_at: i64,
}

impl TryFrom<BusRow> for WithId<Bus> {
    type Error = StoreError;

    fn try_from(row: BusRow) -> Result<Self, Self::Error> {
        let status = BusStatus::parse(&row.status)
            .ok_or_else(|| bad_enum("status", &row.status))?;
        Ok(WithId::new(
            Id::new(row.id),
            Bus {
                registration_no: row.registration_no,
                capacity: row.capacity.max(0) as u32,
                position: BusPosition {
                    latitude: row.latitude,
                    longitude: row.longitude,
                    heading: row.heading,
                    speed_kmh: row.speed_kmh,
                },
                passenger_count: row.passenger_count.max(0) as u32,
                status,
                route_id: row.route_id.map(Id::new),
                simulated: row.simulated,
                updated_at: row.updated_at,
            },
        ))
    }
}

#[derive(Debug, FromRow)]
pub struct DriverRow {
    pub id: String,
    pub user_id: String,
    pub license_no: String,
    pub approved: bool,
    pub bus_id: Option<String>,
    pub state: String,
}

impl TryFrom<DriverRow> for WithId<Driver> {
    type Error = StoreError;

    fn try_from(row: DriverRow) -> Result<Self, Self::Error> {
        let state = DriverState::parse(&row.state)
            .ok_or_else(|| bad_enum("state", &row.state))?;
        Ok(WithId::new(
            Id::new(row.id),
            Driver {
                user_id: row.user_id,
                license_no: row.license_no,
                approved: row.approved,
                bus_id: row.bus_id.map(Id::new),
                state,
            },
        ))
    }
}

#[derive(Debug, FromRow)]
pub struct RouteRow {
    pub id: String,
    pub number: String,
    pub name: String,
    pub kind: String,
    /// Polyline persisted as a JSON array of `{latitude, longitude}`.
    pub polyline: String,
    pub avg_speed_kmh: f64,
    pub total_distance_km: f64,
}

impl RouteRow {
    pub fn into_route(self, stops: Vec<Stop>) -> Result<WithId<Route>, StoreError> {
        let kind = RouteKind::parse(&self.kind)
            .ok_or_else(|| bad_enum("kind", &self.kind))?;
        let polyline: Vec<LatLng> = serde_json::from_str(&self.polyline)
            .map_err(|why| StoreError::Other(Box::new(why)))?;
        Ok(WithId::new(
            Id::new(self.id),
            Route {
                number: self.number,
                name: self.name,
                kind,
                polyline,
                avg_speed_kmh: self.avg_speed_kmh,
                total_distance_km: self.total_distance_km,
                stops,
            },
        ))
    }
}

#[derive(Debug, FromRow)]
pub struct RouteStopRow {
    pub route_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub stop_order: i32,
}

impl From<RouteStopRow> for Stop {
    fn from(row: RouteStopRow) -> Self {
        Stop {
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            stop_order: row.stop_order.max(0) as u32,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct TripRow {
    pub id: String,
    pub bus_id: String,
    pub driver_id: Option<String>,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
}

impl TryFrom<TripRow> for WithId<Trip> {
    type Error = StoreError;

    fn try_from(row: TripRow) -> Result<Self, Self::Error> {
        let status = TripStatus::parse(&row.status)
            .ok_or_else(|| bad_enum("status", &row.status))?;
        Ok(WithId::new(
            Id::new(row.id),
            Trip {
                bus_id: Id::new(row.bus_id),
                driver_id: row.driver_id.map(Id::new),
                start_time: row.start_time,
                end_time: row.end_time,
                status,
            },
        ))
    }
}

#[derive(Debug, FromRow)]
pub struct StopNodeRow {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl From<StopNodeRow> for WithId<StopNode> {
    fn from(row: StopNodeRow) -> Self {
        WithId::new(
            Id::new(row.id),
            StopNode {
                name: row.name,
                latitude: row.latitude,
                longitude: row.longitude,
            },
        )
    }
}

#[derive(Debug, FromRow)]
pub struct GraphEdgeRow {
    pub from_node_id: String,
    pub to_node_id: String,
    pub route_id: String,
    pub route_number: String,
    pub distance_km: f64,
    pub avg_travel_time_min: f64,
    pub transfer_cost_min: f64,
    pub stop_order: i32,
}

impl From<GraphEdgeRow> for GraphEdge {
    fn from(row: GraphEdgeRow) -> Self {
        GraphEdge {
            from: Id::new(row.from_node_id),
            to: Id::new(row.to_node_id),
            route_id: row.route_id,
            route_number: row.route_number,
            distance_km: row.distance_km,
            avg_travel_time_min: row.avg_travel_time_min,
            transfer_cost_min: row.transfer_cost_min,
            stop_order: row.stop_order.max(0) as u32,
        }
    }
}
