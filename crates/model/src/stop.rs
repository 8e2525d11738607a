use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::geo;

/// A stop on a route. Stops are deduplicated by case-folded name when the
/// transit graph is built, so the same physical stop served by two routes
/// becomes a single graph node.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Position of this stop within its route, starting at 0.
    pub stop_order: u32,
}

impl Stop {
    /// Case-folded name used as the graph node key.
    pub fn node_key(&self) -> String {
        self.name.trim().to_lowercase()
    }

    pub fn distance_km_to(&self, latitude: f64, longitude: f64) -> f64 {
        geo::haversine_distance(self.latitude, self.longitude, latitude, longitude)
    }
}
