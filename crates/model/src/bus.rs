use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::route::Route;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusStatus {
    Active,
    Offline,
    Maintenance,
}

impl BusStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Offline => "OFFLINE",
            Self::Maintenance => "MAINTENANCE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(Self::Active),
            "OFFLINE" => Some(Self::Offline),
            "MAINTENANCE" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

/// Occupancy bands derived from passenger count vs capacity. The upper two
/// bands feed the high-occupancy notification rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccupancyLevel {
    Low,
    Moderate,
    High,
    Full,
}

impl OccupancyLevel {
    pub fn from_percent(percent: f64) -> Self {
        if percent >= 90.0 {
            Self::Full
        } else if percent >= 70.0 {
            Self::High
        } else if percent >= 40.0 {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BusPosition {
    pub latitude: f64,
    pub longitude: f64,
    /// Heading in degrees clockwise from true north.
    pub heading: f64,
    pub speed_kmh: f64,
}

impl Default for BusPosition {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            heading: 0.0,
            speed_kmh: 0.0,
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    pub registration_no: String,
    pub capacity: u32,
    #[serde(flatten)]
    pub position: BusPosition,
    pub passenger_count: u32,
    pub status: BusStatus,
    pub route_id: Option<Id<Route>>,
    pub simulated: bool,
    /// Last position write, epoch milliseconds.
    pub updated_at: i64,
}

impl HasId for Bus {
    type IdType = String;
}

impl Bus {
    pub fn occupancy_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.passenger_count as f64 / self.capacity as f64) * 100.0
    }

    pub fn occupancy_level(&self) -> OccupancyLevel {
        OccupancyLevel::from_percent(self.occupancy_percent())
    }

    /// Clamp a reported passenger count into `0..=capacity`.
    pub fn clamp_passengers(&self, reported: i64) -> u32 {
        reported.clamp(0, self.capacity as i64) as u32
    }
}

/// The canonical per-bus payload broadcast to passenger and admin
/// subscribers, and published on the `bus:location` channel.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BusView {
    pub bus_id: String,
    pub registration_no: String,
    pub route_id: Option<String>,
    pub route_number: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
    pub speed_kmh: f64,
    pub passenger_count: u32,
    pub capacity: u32,
    pub occupancy_percent: f64,
    pub status: BusStatus,
    pub simulated: bool,
    pub timestamp: i64,
}

impl BusView {
    pub fn from_bus(id: &Id<Bus>, bus: &Bus, route_number: Option<String>) -> Self {
        Self {
            bus_id: id.raw(),
            registration_no: bus.registration_no.clone(),
            route_id: bus.route_id.as_ref().map(|id| id.raw()),
            route_number,
            latitude: bus.position.latitude,
            longitude: bus.position.longitude,
            heading: bus.position.heading,
            speed_kmh: bus.position.speed_kmh,
            passenger_count: bus.passenger_count,
            capacity: bus.capacity,
            occupancy_percent: bus.occupancy_percent(),
            status: bus.status,
            simulated: bus.simulated,
            timestamp: bus.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(passengers: u32, capacity: u32) -> Bus {
        Bus {
            registration_no: "TS07-1234".to_owned(),
            capacity,
            position: BusPosition::default(),
            passenger_count: passengers,
            status: BusStatus::Active,
            route_id: None,
            simulated: true,
            updated_at: 0,
        }
    }

    #[test]
    fn occupancy_bands() {
        assert_eq!(bus(10, 50).occupancy_level(), OccupancyLevel::Low);
        assert_eq!(bus(25, 50).occupancy_level(), OccupancyLevel::Moderate);
        assert_eq!(bus(40, 50).occupancy_level(), OccupancyLevel::High);
        assert_eq!(bus(48, 50).occupancy_level(), OccupancyLevel::Full);
    }

    #[test]
    fn zero_capacity_is_empty() {
        assert_eq!(bus(5, 0).occupancy_percent(), 0.0);
    }

    #[test]
    fn clamp_passengers_bounds() {
        let b = bus(0, 40);
        assert_eq!(b.clamp_passengers(-3), 0);
        assert_eq!(b.clamp_passengers(12), 12);
        assert_eq!(b.clamp_passengers(99), 40);
    }
}
