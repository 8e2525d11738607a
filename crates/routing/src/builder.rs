use std::collections::HashMap;

use database::{Result, Store};
use indexmap::IndexMap;
use model::{
    graph::{GraphEdge, StopNode, TRANSFER_ROUTE_ID, WALK_ROUTE_NUMBER},
    route::Route,
    WithId,
};
use utility::{geo, id::Id};

/// Walking transfers connect stops of non-identical route sets up to this
/// distance apart.
pub const WALKING_RADIUS_KM: f64 = 2.5;
pub const WALKING_SPEED_KMH: f64 = 4.5;
/// Fixed overhead added to every walking edge, minutes.
pub const TRANSFER_COST_MIN: f64 = 3.0;

#[derive(Debug, Clone, Copy)]
pub struct GraphBuildStats {
    pub nodes: usize,
    pub bus_edges: usize,
    pub walking_edges: usize,
}

/// Materializes the graph from routes with ordered stops. Stops are
/// deduplicated by case-folded name; each consecutive stop pair produces a
/// forward and a backward bus edge; distinct-route node pairs within
/// [`WALKING_RADIUS_KM`] get symmetric walking edges.
pub fn build_graph(
    routes: &[WithId<Route>],
) -> (Vec<WithId<StopNode>>, Vec<GraphEdge>, GraphBuildStats) {
    // insertion order kept so rebuilds from the same input are stable
    let mut nodes: IndexMap<String, StopNode> = IndexMap::new();
    let mut routes_at: HashMap<String, Vec<String>> = HashMap::new();
    let mut edges: Vec<GraphEdge> = Vec::new();

    for route in routes {
        let route_id = route.id.raw();
        let avg_speed = route.content.avg_speed_kmh.max(5.0);
        for stop in &route.content.stops {
            let key = stop.node_key();
            nodes.entry(key.clone()).or_insert_with(|| StopNode {
                name: stop.name.trim().to_owned(),
                latitude: stop.latitude,
                longitude: stop.longitude,
            });
            let at = routes_at.entry(key).or_default();
            if !at.contains(&route_id) {
                at.push(route_id.clone());
            }
        }

        for pair in route.content.stops.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);
            let from_key = from.node_key();
            let to_key = to.node_key();
            if from_key == to_key {
                continue;
            }
            let distance_km = geo::haversine_distance(
                from.latitude,
                from.longitude,
                to.latitude,
                to.longitude,
            );
            let travel_min = distance_km / avg_speed * 60.0;
            edges.push(GraphEdge {
                from: Id::new(from_key.clone()),
                to: Id::new(to_key.clone()),
                route_id: route_id.clone(),
                route_number: route.content.number.clone(),
                distance_km,
                avg_travel_time_min: travel_min,
                transfer_cost_min: 0.0,
                stop_order: from.stop_order,
            });
            edges.push(GraphEdge {
                from: Id::new(to_key),
                to: Id::new(from_key),
                route_id: route_id.clone(),
                route_number: route.content.number.clone(),
                distance_km,
                avg_travel_time_min: travel_min,
                transfer_cost_min: 0.0,
                stop_order: to.stop_order,
            });
        }
    }

    let bus_edges = edges.len();

    let keys: Vec<&String> = nodes.keys().collect();
    for (index, from_key) in keys.iter().enumerate() {
        for to_key in keys.iter().skip(index + 1) {
            let from_routes = routes_at.get(*from_key);
            let to_routes = routes_at.get(*to_key);
            // identical route sets mean the bus already covers the hop
            if from_routes == to_routes {
                continue;
            }
            let from = &nodes[*from_key];
            let to = &nodes[*to_key];
            let distance_km = geo::haversine_distance(
                from.latitude,
                from.longitude,
                to.latitude,
                to.longitude,
            );
            if distance_km > WALKING_RADIUS_KM {
                continue;
            }
            let travel_min = distance_km / WALKING_SPEED_KMH * 60.0 + TRANSFER_COST_MIN;
            for (a, b) in [(from_key, to_key), (to_key, from_key)] {
                edges.push(GraphEdge {
                    from: Id::new((*a).clone()),
                    to: Id::new((*b).clone()),
                    route_id: TRANSFER_ROUTE_ID.to_owned(),
                    route_number: WALK_ROUTE_NUMBER.to_owned(),
                    distance_km,
                    avg_travel_time_min: travel_min,
                    transfer_cost_min: TRANSFER_COST_MIN,
                    stop_order: 0,
                });
            }
        }
    }

    let stats = GraphBuildStats {
        nodes: nodes.len(),
        bus_edges,
        walking_edges: edges.len() - bus_edges,
    };
    let nodes = nodes
        .into_iter()
        .map(|(key, node)| WithId::new(Id::new(key), node))
        .collect();
    (nodes, edges, stats)
}

/// Builds from the store's routes and rewrites the persisted snapshot in a
/// single atomic replace.
pub async fn rebuild_and_persist<S: Store>(store: &S) -> Result<GraphBuildStats> {
    let routes = store.routes_with_stops().await?;
    let (nodes, edges, stats) = build_graph(&routes);
    store.replace_graph(&nodes, &edges).await?;
    log::info!(
        "transit graph rebuilt: {} nodes, {} bus edges, {} walking edges",
        stats.nodes,
        stats.bus_edges,
        stats.walking_edges
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use model::{route::RouteKind, stop::Stop};

    use super::*;

    fn route(id: &str, number: &str, stops: &[(&str, f64, f64)]) -> WithId<Route> {
        WithId::new(
            Id::new(id.to_owned()),
            Route {
                number: number.to_owned(),
                name: format!("Route {number}"),
                kind: RouteKind::Major,
                polyline: vec![],
                avg_speed_kmh: 30.0,
                total_distance_km: 10.0,
                stops: stops
                    .iter()
                    .enumerate()
                    .map(|(order, (name, lat, lng))| Stop {
                        name: (*name).to_owned(),
                        latitude: *lat,
                        longitude: *lng,
                        stop_order: order as u32,
                    })
                    .collect(),
            },
        )
    }

    #[test]
    fn dedupes_stops_by_case_folded_name() {
        let routes = vec![
            route("r1", "1", &[("Central", 17.0, 78.0), ("Market", 17.01, 78.0)]),
            route("r2", "2", &[("CENTRAL", 17.0, 78.0), ("Depot", 17.02, 78.01)]),
        ];
        let (nodes, _, stats) = build_graph(&routes);
        assert_eq!(stats.nodes, 3);
        assert!(nodes.iter().any(|node| node.id.raw() == "central"));
    }

    #[test]
    fn bus_edges_come_in_symmetric_pairs() {
        let routes = vec![route(
            "r1",
            "1",
            &[("A", 17.0, 78.0), ("B", 17.01, 78.0), ("C", 17.02, 78.0)],
        )];
        let (_, edges, stats) = build_graph(&routes);
        assert_eq!(stats.bus_edges, 4);
        let forward = edges
            .iter()
            .find(|edge| edge.from.raw() == "a" && edge.to.raw() == "b")
            .unwrap();
        let backward = edges
            .iter()
            .find(|edge| edge.from.raw() == "b" && edge.to.raw() == "a")
            .unwrap();
        assert_eq!(forward.distance_km, backward.distance_km);
        assert!(forward.avg_travel_time_min > 0.0);
    }

    #[test]
    fn walking_edges_only_between_distinct_route_sets() {
        let routes = vec![
            route("r1", "1", &[("A", 17.0, 78.0), ("B", 17.01, 78.0)]),
            route("r2", "2", &[("C", 17.001, 78.001), ("D", 17.05, 78.05)]),
        ];
        let (_, edges, stats) = build_graph(&routes);
        assert!(stats.walking_edges > 0);
        // A and C sit on different routes ~150 m apart: expect a pair
        let walk: Vec<&GraphEdge> = edges
            .iter()
            .filter(|edge| edge.is_transfer())
            .filter(|edge| {
                (edge.from.raw() == "a" && edge.to.raw() == "c")
                    || (edge.from.raw() == "c" && edge.to.raw() == "a")
            })
            .collect();
        assert_eq!(walk.len(), 2);
        assert_eq!(walk[0].route_number, WALK_ROUTE_NUMBER);
        assert!(walk[0].transfer_cost_min == TRANSFER_COST_MIN);
        // no walking edge between same-route neighbors A and B
        assert!(!edges.iter().any(|edge| {
            edge.is_transfer() && edge.from.raw() == "a" && edge.to.raw() == "b"
        }));
    }

    #[test]
    fn rebuild_is_stable() {
        let routes = vec![
            route("r1", "1", &[("A", 17.0, 78.0), ("B", 17.01, 78.0)]),
            route("r2", "2", &[("B", 17.01, 78.0), ("C", 17.02, 78.0)]),
        ];
        let (nodes_a, edges_a, _) = build_graph(&routes);
        let (nodes_b, edges_b, _) = build_graph(&routes);
        let ids_a: Vec<String> = nodes_a.iter().map(|node| node.id.raw()).collect();
        let ids_b: Vec<String> = nodes_b.iter().map(|node| node.id.raw()).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(edges_a.len(), edges_b.len());
    }
}
