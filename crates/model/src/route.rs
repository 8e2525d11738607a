use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::{geo::LatLng, id::HasId};

use crate::stop::Stop;

/// Route classification; major corridors see heavier boarding in the
/// simulation and in dwell estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Major,
    Minor,
}

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "major" => Some(Self::Major),
            "minor" => Some(Self::Minor),
            _ => None,
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Public route number, e.g. "290U".
    pub number: String,
    pub name: String,
    pub kind: RouteKind,
    /// Declared geometry. May be sparse; the simulation subdivides it.
    pub polyline: Vec<LatLng>,
    pub avg_speed_kmh: f64,
    pub total_distance_km: f64,
    /// Ordered by `stop_order`.
    pub stops: Vec<Stop>,
}

impl HasId for Route {
    type IdType = String;
}

impl Route {
    /// The declared polyline, or one reconstructed from stop coordinates
    /// when no geometry was captured for the route.
    pub fn effective_polyline(&self) -> Vec<LatLng> {
        if self.polyline.len() >= 2 {
            return self.polyline.clone();
        }
        self.stops
            .iter()
            .map(|stop| LatLng::new(stop.latitude, stop.longitude))
            .collect()
    }

    pub fn stop_by_name(&self, name: &str) -> Option<&Stop> {
        let key = name.trim().to_lowercase();
        self.stops.iter().find(|stop| stop.node_key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_polyline_falls_back_to_stops() {
        let route = Route {
            number: "7".to_owned(),
            name: "Seven".to_owned(),
            kind: RouteKind::Minor,
            polyline: vec![],
            avg_speed_kmh: 25.0,
            total_distance_km: 4.0,
            stops: vec![
                Stop {
                    name: "A".to_owned(),
                    latitude: 17.0,
                    longitude: 78.0,
                    stop_order: 0,
                },
                Stop {
                    name: "B".to_owned(),
                    latitude: 17.1,
                    longitude: 78.0,
                    stop_order: 1,
                },
            ],
        };
        assert_eq!(route.effective_polyline().len(), 2);
        assert!(route.stop_by_name("  b ").is_some());
        assert!(route.stop_by_name("c").is_none());
    }
}
