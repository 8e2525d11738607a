use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use database::{Store, StoreError};
use model::{
    graph::{GraphEdge, StopNode},
    WithId,
};
use tokio::sync::RwLock;
use utility::geo;

/// Immutable in-memory snapshot of the transit graph: adjacency list,
/// connected-component labels and the node table. Dijkstra runs against one
/// snapshot for its whole call; rebuilds swap in a fresh `Arc`.
pub struct TransitGraph {
    nodes: HashMap<String, StopNode>,
    adjacency: HashMap<String, Vec<GraphEdge>>,
    components: HashMap<String, u32>,
    /// Bus routes serving each node; used to skip same-route walking edges.
    routes_at: HashMap<String, HashSet<String>>,
}

impl TransitGraph {
    pub fn empty() -> Self {
        Self::from_parts(Vec::new(), Vec::new())
    }

    pub fn from_parts(nodes: Vec<WithId<StopNode>>, edges: Vec<GraphEdge>) -> Self {
        let mut node_table = HashMap::with_capacity(nodes.len());
        for node in nodes {
            node_table.insert(node.id.raw(), node.content);
        }

        let mut adjacency: HashMap<String, Vec<GraphEdge>> = HashMap::new();
        let mut routes_at: HashMap<String, HashSet<String>> = HashMap::new();
        for edge in edges {
            if !edge.is_transfer() {
                routes_at
                    .entry(edge.from.raw())
                    .or_default()
                    .insert(edge.route_id.clone());
                routes_at
                    .entry(edge.to.raw())
                    .or_default()
                    .insert(edge.route_id.clone());
            }
            adjacency.entry(edge.from.raw()).or_default().push(edge);
        }

        let components = label_components(&node_table, &adjacency);
        Self {
            nodes: node_table,
            adjacency,
            components,
            routes_at,
        }
    }

    pub fn node(&self, id: &str) -> Option<&StopNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    pub fn edges_from(&self, id: &str) -> &[GraphEdge] {
        self.adjacency
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn routes_at(&self, id: &str) -> Option<&HashSet<String>> {
        self.routes_at.get(id)
    }

    /// O(1) reachability via component labels; used to skip hopeless
    /// origin/destination pairs before Dijkstra runs.
    pub fn are_connected(&self, a: &str, b: &str) -> bool {
        match (self.components.get(a), self.components.get(b)) {
            (Some(component_a), Some(component_b)) => component_a == component_b,
            _ => false,
        }
    }

    /// The `top_n` nodes within `radius_km` of a point, closest first.
    pub fn nearest_nodes(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        top_n: usize,
    ) -> Vec<(String, f64)> {
        let mut candidates: Vec<(String, f64)> = self
            .nodes
            .iter()
            .filter_map(|(id, node)| {
                let distance = geo::haversine_distance(
                    latitude,
                    longitude,
                    node.latitude,
                    node.longitude,
                );
                (distance <= radius_km).then(|| (id.clone(), distance))
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_n);
        candidates
    }
}

fn label_components(
    nodes: &HashMap<String, StopNode>,
    adjacency: &HashMap<String, Vec<GraphEdge>>,
) -> HashMap<String, u32> {
    // Edges are created in symmetric pairs, so a forward-only BFS labels
    // undirected components correctly.
    let mut components = HashMap::with_capacity(nodes.len());
    let mut next_label = 0u32;
    let mut queue = VecDeque::new();
    for start in nodes.keys() {
        if components.contains_key(start) {
            continue;
        }
        components.insert(start.clone(), next_label);
        queue.push_back(start.clone());
        while let Some(current) = queue.pop_front() {
            for edge in adjacency.get(&current).map(Vec::as_slice).unwrap_or_default() {
                let neighbor = edge.to.raw();
                if !components.contains_key(&neighbor) {
                    components.insert(neighbor.clone(), next_label);
                    queue.push_back(neighbor);
                }
            }
        }
        next_label += 1;
    }
    components
}

/// Shared, swappable graph snapshot. Readers clone the `Arc` and never see
/// a half-built graph; `reload` builds everything in local variables and
/// assigns once.
pub struct GraphHandle {
    current: RwLock<Arc<TransitGraph>>,
}

impl Default for GraphHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphHandle {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(TransitGraph::empty())),
        }
    }

    pub async fn snapshot(&self) -> Arc<TransitGraph> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn install(&self, graph: TransitGraph) {
        *self.current.write().await = Arc::new(graph);
    }

    /// Reads the persisted snapshot and swaps it in atomically.
    pub async fn reload<S: Store>(&self, store: &S) -> Result<(), StoreError> {
        let (nodes, edges) = store.load_graph().await?;
        let graph = TransitGraph::from_parts(nodes, edges);
        log::info!(
            "transit graph loaded: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        self.install(graph).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use model::graph::TRANSFER_ROUTE_ID;
    use utility::id::Id;

    use super::*;

    fn node(id: &str, latitude: f64, longitude: f64) -> WithId<StopNode> {
        WithId::new(
            Id::new(id.to_owned()),
            StopNode {
                name: id.to_owned(),
                latitude,
                longitude,
            },
        )
    }

    fn bus_edge(from: &str, to: &str, route: &str) -> GraphEdge {
        GraphEdge {
            from: Id::new(from.to_owned()),
            to: Id::new(to.to_owned()),
            route_id: route.to_owned(),
            route_number: route.to_uppercase(),
            distance_km: 1.0,
            avg_travel_time_min: 3.0,
            transfer_cost_min: 0.0,
            stop_order: 0,
        }
    }

    fn sample_graph() -> TransitGraph {
        // a -- b -- c connected, d isolated
        TransitGraph::from_parts(
            vec![
                node("a", 17.00, 78.00),
                node("b", 17.01, 78.00),
                node("c", 17.02, 78.00),
                node("d", 18.00, 79.00),
            ],
            vec![
                bus_edge("a", "b", "r1"),
                bus_edge("b", "a", "r1"),
                bus_edge("b", "c", "r1"),
                bus_edge("c", "b", "r1"),
            ],
        )
    }

    #[test]
    fn components_partition_the_graph() {
        let graph = sample_graph();
        assert!(graph.are_connected("a", "c"));
        assert!(!graph.are_connected("a", "d"));
        assert!(!graph.are_connected("a", "missing"));
    }

    #[test]
    fn components_agree_with_reference_bfs() {
        let graph = sample_graph();
        // brute force: reachable set from every node must match labels
        for from in ["a", "b", "c", "d"] {
            for to in ["a", "b", "c", "d"] {
                let mut seen = std::collections::HashSet::new();
                let mut queue = vec![from.to_owned()];
                while let Some(current) = queue.pop() {
                    if !seen.insert(current.clone()) {
                        continue;
                    }
                    for edge in graph.edges_from(&current) {
                        queue.push(edge.to.raw());
                    }
                }
                assert_eq!(graph.are_connected(from, to), seen.contains(to));
            }
        }
    }

    #[test]
    fn nearest_nodes_sorted_and_capped() {
        let graph = sample_graph();
        let hits = graph.nearest_nodes(17.0, 78.0, 5.0, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "a");
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn transfer_edges_do_not_register_routes() {
        let mut edges = vec![bus_edge("a", "b", "r1"), bus_edge("b", "a", "r1")];
        let mut walk = bus_edge("b", "c", TRANSFER_ROUTE_ID);
        walk.route_id = TRANSFER_ROUTE_ID.to_owned();
        edges.push(walk);
        let graph = TransitGraph::from_parts(
            vec![
                node("a", 17.0, 78.0),
                node("b", 17.01, 78.0),
                node("c", 17.02, 78.0),
            ],
            edges,
        );
        assert!(graph.routes_at("c").is_none());
        assert!(graph.routes_at("b").unwrap().contains("r1"));
    }
}
