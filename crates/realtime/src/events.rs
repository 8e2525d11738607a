//! Wire-format event types for the three namespaces. Events are tagged
//! JSON objects: `{"event": "driver:location:update", "data": {…}}`.
//! Mobile and dashboard clients agree on these names, so renames here are
//! protocol changes.

use intelligence::{ConfidenceScore, EtaEstimate, ReliabilityScore, Suggestion};
use model::bus::BusView;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::safety::LocationUpdate;

/// Driver-socket inbound events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum DriverClientEvent {
    #[serde(rename = "driver:location:update")]
    LocationUpdate(LocationUpdate),
    #[serde(rename = "driver:heartbeat")]
    Heartbeat { timestamp: i64 },
    #[serde(rename = "driver:trip:start")]
    TripStart,
    #[serde(rename = "driver:trip:end")]
    TripEnd,
}

/// Passenger-socket inbound events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PassengerClientEvent {
    #[serde(rename = "location:send")]
    LocationSend { latitude: f64, longitude: f64 },
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverInit {
    pub driver_id: String,
    pub user_id: String,
    pub bus_id: String,
    pub registration_no: String,
    pub route_id: Option<String>,
    pub route_number: Option<String>,
    pub route_name: Option<String>,
    pub capacity: u32,
    pub approved: bool,
    pub status: String,
    /// Crash recovery: a trip that was IN_PROGRESS when the socket died.
    pub active_trip_id: Option<String>,
    pub trip_start_time: Option<i64>,
}

/// A nearby bus enriched by the intelligence pipeline.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedBus {
    #[serde(flatten)]
    pub bus: BusView,
    pub distance_km: f64,
    pub eta: EtaEstimate,
    pub confidence: ConfidenceScore,
    pub reliability: ReliabilityScore,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverDisconnected {
    pub driver_id: String,
    pub bus_id: Option<String>,
    pub user_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriversStatus {
    pub online: usize,
    pub on_trip: usize,
    pub idle: usize,
    pub disconnected: usize,
    pub offline: usize,
}

/// Server-to-client events across all namespaces.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    // -- driver namespace ----------------------------------------------------
    #[serde(rename = "driver:init")]
    DriverInit(DriverInit),
    #[serde(rename = "driver:heartbeat:ack")]
    HeartbeatAck { timestamp: i64 },
    #[serde(rename = "location:confirmed")]
    LocationConfirmed {
        #[serde(rename = "busId")]
        bus_id: String,
        occupancy: f64,
        timestamp: i64,
    },
    #[serde(rename = "location:rejected")]
    LocationRejected { reason: String },
    #[serde(rename = "trip:started")]
    TripStarted {
        #[serde(rename = "tripId")]
        trip_id: String,
        #[serde(rename = "startTime")]
        start_time: i64,
    },
    #[serde(rename = "trip:ended")]
    TripEnded {
        #[serde(rename = "tripId")]
        trip_id: String,
        #[serde(rename = "endTime")]
        end_time: i64,
    },
    #[serde(rename = "driver:pending-approval")]
    PendingApproval,
    #[serde(rename = "driver:no-bus-assigned")]
    NoBusAssigned,
    /// Pushed by the admin plane when an approval lands mid-session.
    #[serde(rename = "driver:approved")]
    DriverApproved {
        #[serde(rename = "driverId")]
        driver_id: String,
    },
    #[serde(rename = "driver:bus-assigned")]
    BusAssigned {
        #[serde(rename = "busId")]
        bus_id: String,
        #[serde(rename = "registrationNo")]
        registration_no: String,
    },
    #[serde(rename = "driver:rejected")]
    DriverRejected,
    #[serde(rename = "driver:force-offline")]
    ForceOffline,
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    // -- passenger namespace -------------------------------------------------
    #[serde(rename = "buses:snapshot")]
    BusesSnapshot(Vec<BusView>),
    #[serde(rename = "buses:nearby")]
    BusesNearby(Vec<EnrichedBus>),
    #[serde(rename = "buses:suggestions")]
    BusesSuggestions(Vec<Suggestion>),
    #[serde(rename = "bus:update")]
    BusUpdate(BusView),
    #[serde(rename = "bus:offline")]
    BusOffline {
        #[serde(rename = "busId")]
        bus_id: String,
    },

    // -- admin namespace -----------------------------------------------------
    #[serde(rename = "buses:update")]
    BusesUpdate(Vec<BusView>),
    #[serde(rename = "buses:all")]
    BusesAll(Vec<BusView>),
    #[serde(rename = "driver:disconnected")]
    AdminDriverDisconnected(DriverDisconnected),
    #[serde(rename = "driver:approval-updated")]
    ApprovalUpdated {
        #[serde(rename = "driverId")]
        driver_id: String,
        action: String,
    },
    #[serde(rename = "drivers:status")]
    DriversStatus(DriversStatus),
    #[serde(rename = "notification:new")]
    NotificationNew {
        title: String,
        body: String,
        #[serde(rename = "busId")]
        bus_id: Option<String>,
        timestamp: i64,
    },
}

impl ServerEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|why| {
            log::error!("server event serialization failed: {why}");
            "{\"event\":\"error\",\"data\":{\"message\":\"internal\"}}".to_owned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_events_parse_from_tagged_json() {
        let raw = r#"{
            "event": "driver:location:update",
            "data": {"busId": "b1", "latitude": 17.4, "longitude": 78.5, "speed": 32.0}
        }"#;
        let event: DriverClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            DriverClientEvent::LocationUpdate(update) => {
                assert_eq!(update.bus_id, "b1");
                assert_eq!(update.speed, Some(32.0));
                assert!(update.accuracy.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unit_variants_parse_without_data() {
        let event: DriverClientEvent =
            serde_json::from_str(r#"{"event": "driver:trip:start"}"#).unwrap();
        assert!(matches!(event, DriverClientEvent::TripStart));
    }

    #[test]
    fn server_events_carry_the_wire_names() {
        let json = ServerEvent::BusOffline {
            bus_id: "b7".to_owned(),
        }
        .to_json();
        assert!(json.contains(r#""event":"bus:offline""#));
        assert!(json.contains(r#""busId":"b7""#));

        let ack = ServerEvent::HeartbeatAck { timestamp: 42 }.to_json();
        assert!(ack.contains(r#""event":"driver:heartbeat:ack""#));
    }

    #[test]
    fn unknown_event_is_an_error() {
        let result: Result<DriverClientEvent, _> =
            serde_json::from_str(r#"{"event": "driver:unknown"}"#);
        assert!(result.is_err());
    }
}
