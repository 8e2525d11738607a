use model::graph::TRANSFER_ROUTE_ID;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::geo::{self, LatLng};

use crate::{dijkstra::RawPath, graph::TransitGraph};

/// Average walking pace used to turn leg distance into minutes.
pub const WALK_METERS_PER_MIN: f64 = 80.0;
/// A single walking leg above this gets the whole itinerary discarded.
pub const MAX_WALK_LEG_MIN: f64 = 25.0;
/// As does a total walking distance above this.
pub const MAX_TOTAL_WALK_KM: f64 = 2.0;
/// Origin/destination snapping: walks shorter than this are not worth a leg.
pub const SNAP_DISTANCE_M: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegKind {
    Walk,
    Bus,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteLeg {
    pub kind: LegKind,
    pub from: String,
    pub to: String,
    pub route_id: Option<String>,
    pub route_number: Option<String>,
    pub distance_km: f64,
    pub eta_minutes: f64,
    /// Edge count for bus legs, 0 for walking legs.
    pub stop_count: u32,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannedRoute {
    pub legs: Vec<RouteLeg>,
    pub total_eta_min: f64,
    pub arrival_time_ms: i64,
    pub transfer_count: u32,
    /// Graph cost before leg assembly; kept for diagnostics and scoring.
    pub total_time_min: f64,
    pub reliability_score: u32,
    pub confidence: f64,
}

fn walk_minutes(distance_km: f64) -> f64 {
    (distance_km * 1000.0 / WALK_METERS_PER_MIN).round().min(MAX_WALK_LEG_MIN)
}

fn walk_leg(from: &str, to: &str, distance_km: f64) -> Option<RouteLeg> {
    let raw_minutes = (distance_km * 1000.0 / WALK_METERS_PER_MIN).round();
    if raw_minutes > MAX_WALK_LEG_MIN {
        return None;
    }
    Some(RouteLeg {
        kind: LegKind::Walk,
        from: from.to_owned(),
        to: to.to_owned(),
        route_id: None,
        route_number: None,
        distance_km,
        eta_minutes: walk_minutes(distance_km),
        stop_count: 0,
    })
}

fn reliability_for_transfers(transfers: u32) -> u32 {
    match transfers {
        0 => 85,
        1 => 72,
        _ => 60,
    }
}

fn confidence_for(transfers: u32, total_time_min: f64) -> f64 {
    let mut confidence = 0.90 - 0.1 * transfers as f64;
    if total_time_min > 60.0 {
        confidence -= 0.1;
    }
    confidence.max(0.45)
}

/// Reassembles a graph path into walking and bus legs. Returns `None` when
/// a walking cap is blown; the planner simply drops such paths.
pub fn serialize_path(
    path: &RawPath,
    graph: &TransitGraph,
    origin: LatLng,
    destination: LatLng,
    now_ms: i64,
) -> Option<PlannedRoute> {
    let first_edge = path.edges.first()?;
    let last_edge = path.edges.last()?;

    let mut legs: Vec<RouteLeg> = Vec::new();
    let mut total_walk_km = 0.0;

    // origin approach
    let first_node_id = first_edge.from.raw();
    let first_node = graph.node(&first_node_id)?;
    let approach_km = geo::haversine_distance(
        origin.latitude,
        origin.longitude,
        first_node.latitude,
        first_node.longitude,
    );
    if approach_km * 1000.0 > SNAP_DISTANCE_M {
        legs.push(walk_leg("origin", &first_node.name, approach_km)?);
        total_walk_km += approach_km;
    }

    // group consecutive same-route edges
    let mut index = 0;
    while index < path.edges.len() {
        let edge = &path.edges[index];
        if edge.route_id == TRANSFER_ROUTE_ID {
            let from = graph.node(&edge.from.raw())?.name.clone();
            let to = graph.node(&edge.to.raw())?.name.clone();
            legs.push(walk_leg(&from, &to, edge.distance_km)?);
            total_walk_km += edge.distance_km;
            index += 1;
            continue;
        }

        let route_id = edge.route_id.clone();
        let group_start = index;
        let mut distance_km = 0.0;
        let mut eta_minutes = 0.0;
        while index < path.edges.len() && path.edges[index].route_id == route_id {
            distance_km += path.edges[index].distance_km;
            eta_minutes += path.edges[index].avg_travel_time_min;
            index += 1;
        }
        let group = &path.edges[group_start..index];
        let from = graph.node(&group[0].from.raw())?.name.clone();
        let to = graph.node(&group[group.len() - 1].to.raw())?.name.clone();
        legs.push(RouteLeg {
            kind: LegKind::Bus,
            from,
            to,
            route_id: Some(route_id),
            route_number: Some(group[0].route_number.clone()),
            distance_km,
            eta_minutes,
            stop_count: group.len() as u32,
        });
    }

    // destination egress
    let last_node_id = last_edge.to.raw();
    let last_node = graph.node(&last_node_id)?;
    let egress_km = geo::haversine_distance(
        last_node.latitude,
        last_node.longitude,
        destination.latitude,
        destination.longitude,
    );
    if egress_km * 1000.0 > SNAP_DISTANCE_M {
        legs.push(walk_leg(&last_node.name, "destination", egress_km)?);
        total_walk_km += egress_km;
    }

    if total_walk_km > MAX_TOTAL_WALK_KM {
        return None;
    }

    let total_eta_min: f64 = legs.iter().map(|leg| leg.eta_minutes).sum();
    Some(PlannedRoute {
        arrival_time_ms: now_ms + (total_eta_min * 60_000.0) as i64,
        total_eta_min,
        transfer_count: path.transfer_count,
        total_time_min: path.total_time_min,
        reliability_score: reliability_for_transfers(path.transfer_count),
        confidence: confidence_for(path.transfer_count, path.total_time_min),
        legs,
    })
}

#[cfg(test)]
mod tests {
    use model::{
        graph::{GraphEdge, StopNode, WALK_ROUTE_NUMBER},
        WithId,
    };
    use utility::id::Id;

    use super::*;

    fn node(id: &str, latitude: f64, longitude: f64) -> WithId<StopNode> {
        WithId::new(
            Id::new(id.to_owned()),
            StopNode {
                name: id.to_uppercase(),
                latitude,
                longitude,
            },
        )
    }

    fn edge(from: &str, to: &str, route: &str, minutes: f64, km: f64) -> GraphEdge {
        GraphEdge {
            from: Id::new(from.to_owned()),
            to: Id::new(to.to_owned()),
            route_id: route.to_owned(),
            route_number: if route == TRANSFER_ROUTE_ID {
                WALK_ROUTE_NUMBER.to_owned()
            } else {
                route.to_uppercase()
            },
            distance_km: km,
            avg_travel_time_min: minutes,
            transfer_cost_min: 0.0,
            stop_order: 0,
        }
    }

    fn graph() -> TransitGraph {
        TransitGraph::from_parts(
            vec![
                node("a", 17.000, 78.000),
                node("b", 17.010, 78.000),
                node("c", 17.020, 78.000),
                node("d", 17.021, 78.001),
            ],
            vec![],
        )
    }

    #[test]
    fn groups_bus_edges_and_exposes_routes_in_order() {
        let path = RawPath {
            edges: vec![
                edge("a", "b", "r1", 5.0, 1.1),
                edge("b", "c", "r1", 5.0, 1.1),
                edge("c", "d", "r2", 3.0, 0.2),
            ],
            total_time_min: 18.0,
            transfer_count: 1,
        };
        let origin = LatLng::new(17.000, 78.000);
        let destination = LatLng::new(17.021, 78.001);
        let route = serialize_path(&path, &graph(), origin, destination, 0).unwrap();

        let bus_routes: Vec<&str> = route
            .legs
            .iter()
            .filter(|leg| leg.kind == LegKind::Bus)
            .map(|leg| leg.route_id.as_deref().unwrap())
            .collect();
        assert_eq!(bus_routes, vec!["r1", "r2"]);
        let first_bus = route
            .legs
            .iter()
            .find(|leg| leg.kind == LegKind::Bus)
            .unwrap();
        assert_eq!(first_bus.stop_count, 2);
        assert!((first_bus.eta_minutes - 10.0).abs() < 1e-9);
        // origin/destination sit on the nodes: no walking legs
        assert!(route.legs.iter().all(|leg| leg.kind == LegKind::Bus));
        assert_eq!(route.total_eta_min, 13.0);
        assert_eq!(route.reliability_score, 72);
    }

    #[test]
    fn adds_walking_legs_for_far_endpoints() {
        let path = RawPath {
            edges: vec![edge("a", "b", "r1", 5.0, 1.1)],
            total_time_min: 5.0,
            transfer_count: 0,
        };
        // ~550 m from node a
        let origin = LatLng::new(17.005, 78.000);
        let destination = LatLng::new(17.010, 78.000);
        let route = serialize_path(&path, &graph(), origin, destination, 0).unwrap();
        assert_eq!(route.legs.len(), 2);
        assert_eq!(route.legs[0].kind, LegKind::Walk);
        assert!(route.legs[0].eta_minutes >= 1.0);
        assert_eq!(route.reliability_score, 85);
    }

    #[test]
    fn long_walk_discards_route() {
        let path = RawPath {
            edges: vec![edge("a", "b", "r1", 5.0, 1.1)],
            total_time_min: 5.0,
            transfer_count: 0,
        };
        // ~3.3 km from node a: walk leg alone exceeds 25 min
        let origin = LatLng::new(17.030, 78.000);
        let destination = LatLng::new(17.010, 78.000);
        assert!(serialize_path(&path, &graph(), origin, destination, 0).is_none());
    }

    #[test]
    fn total_walk_budget_discards_route() {
        let path = RawPath {
            edges: vec![edge("a", "b", "r1", 5.0, 1.1)],
            total_time_min: 5.0,
            transfer_count: 0,
        };
        // 1.2 km on each side: each leg is ~15 min, total 2.4 km > 2.0 km
        let origin = LatLng::new(17.0108, 78.000);
        let destination = LatLng::new(17.0208, 78.000);
        assert!(serialize_path(&path, &graph(), origin, destination, 0).is_none());
    }

    #[test]
    fn in_path_transfer_edges_become_walk_legs() {
        let path = RawPath {
            edges: vec![
                edge("a", "b", "r1", 5.0, 1.1),
                edge("b", "c", TRANSFER_ROUTE_ID, 8.0, 0.4),
                edge("c", "d", "r2", 3.0, 0.2),
            ],
            total_time_min: 16.0,
            transfer_count: 2,
        };
        let origin = LatLng::new(17.000, 78.000);
        let destination = LatLng::new(17.021, 78.001);
        let route = serialize_path(&path, &graph(), origin, destination, 0).unwrap();
        let kinds: Vec<LegKind> = route.legs.iter().map(|leg| leg.kind).collect();
        assert_eq!(kinds, vec![LegKind::Bus, LegKind::Walk, LegKind::Bus]);
        assert_eq!(route.reliability_score, 60);
        assert!((route.confidence - 0.70).abs() < 1e-9);
    }

    #[test]
    fn confidence_floor_holds() {
        assert_eq!(confidence_for(5, 120.0), 0.45);
        assert!((confidence_for(0, 30.0) - 0.90).abs() < 1e-9);
    }

    #[test]
    fn total_eta_is_sum_of_leg_etas() {
        let path = RawPath {
            edges: vec![
                edge("a", "b", "r1", 4.0, 1.1),
                edge("b", "c", "r1", 6.0, 1.1),
            ],
            total_time_min: 10.0,
            transfer_count: 0,
        };
        let origin = LatLng::new(17.005, 78.000);
        let destination = LatLng::new(17.020, 78.000);
        let route = serialize_path(&path, &graph(), origin, destination, 1000).unwrap();
        let sum: f64 = route.legs.iter().map(|leg| leg.eta_minutes).sum();
        assert_eq!(route.total_eta_min, sum);
        assert_eq!(
            route.arrival_time_ms,
            1000 + (route.total_eta_min * 60_000.0) as i64
        );
    }
}
