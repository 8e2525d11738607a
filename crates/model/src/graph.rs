use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

/// Sentinel route id carried by walking edges.
pub const TRANSFER_ROUTE_ID: &str = "transfer";
/// Route number shown for walking legs.
pub const WALK_ROUTE_NUMBER: &str = "WALK";

/// A deduplicated stop in the transit graph. The id is the case-folded stop
/// name, so the node is stable across graph rebuilds.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StopNode {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl HasId for StopNode {
    type IdType = String;
}

/// Directed edge of the transit graph. Bus edges come in forward/backward
/// pairs per consecutive route stop; walking edges likewise.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub from: Id<StopNode>,
    pub to: Id<StopNode>,
    /// Owning route id, or [`TRANSFER_ROUTE_ID`] for walking edges.
    pub route_id: String,
    pub route_number: String,
    pub distance_km: f64,
    pub avg_travel_time_min: f64,
    pub transfer_cost_min: f64,
    pub stop_order: u32,
}

impl GraphEdge {
    pub fn is_transfer(&self) -> bool {
        self.route_id == TRANSFER_ROUTE_ID
    }
}
