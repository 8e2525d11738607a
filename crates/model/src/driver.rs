use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::bus::Bus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverState {
    Pending,
    Offline,
    Online,
    OnTrip,
    Idle,
    Disconnected,
    Rejected,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Offline => "OFFLINE",
            Self::Online => "ONLINE",
            Self::OnTrip => "ON_TRIP",
            Self::Idle => "IDLE",
            Self::Disconnected => "DISCONNECTED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "OFFLINE" => Some(Self::Offline),
            "ONLINE" => Some(Self::Online),
            "ON_TRIP" => Some(Self::OnTrip),
            "IDLE" => Some(Self::Idle),
            "DISCONNECTED" => Some(Self::Disconnected),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    /// The account this driver row belongs to.
    pub user_id: String,
    pub license_no: String,
    pub approved: bool,
    pub bus_id: Option<Id<Bus>>,
    pub state: DriverState,
}

impl HasId for Driver {
    type IdType = String;
}

/// One row of the driver state log; every transition attempt is recorded,
/// rejected ones included.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverStateLog {
    pub driver_id: String,
    pub from_state: DriverState,
    pub to_state: DriverState,
    pub accepted: bool,
    pub reason: Option<String>,
    pub timestamp: i64,
}
