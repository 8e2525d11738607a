use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet},
    time::Instant,
};

use model::graph::GraphEdge;
use serde::Serialize;

use crate::graph::TransitGraph;

#[derive(Debug, Clone)]
pub struct DijkstraConfig {
    pub max_transfers: u32,
    pub transfer_penalty_min: f64,
    pub max_results: usize,
    /// Results and heap-cap exceptions are kept while within this multiple
    /// of the best destination cost.
    pub prune_factor: f64,
    pub max_iterations: u32,
    pub max_heap: usize,
    pub time_limit_ms: u128,
    /// Popped states costing more than this multiple of the best result are
    /// skipped instead of expanded.
    pub early_exit_factor: f64,
}

impl Default for DijkstraConfig {
    fn default() -> Self {
        Self {
            max_transfers: 2,
            transfer_penalty_min: 5.0,
            max_results: 2,
            prune_factor: 1.5,
            max_iterations: 8000,
            max_heap: 2000,
            time_limit_ms: 15,
            early_exit_factor: 1.3,
        }
    }
}

/// Per-call statistics; `timed_out` marks truncated-but-consistent results.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DijkstraStats {
    pub iterations: u32,
    pub heap_peak: usize,
    pub heap_drops: u32,
    pub early_exits: u32,
    pub dominated_prunes: u32,
    pub results_found: usize,
    pub duration_ms: f64,
    pub timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct RawPath {
    pub edges: Vec<GraphEdge>,
    pub total_time_min: f64,
    pub transfer_count: u32,
}

impl RawPath {
    /// Ordered route segments with consecutive same-route edges collapsed.
    /// Two paths sharing a signature are duplicates.
    pub fn segment_signature(&self) -> Vec<String> {
        let mut signature = Vec::new();
        for edge in &self.edges {
            if signature.last() != Some(&edge.route_id) {
                signature.push(edge.route_id.clone());
            }
        }
        signature
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct StateKey {
    node: String,
    route: Option<String>,
    transfers: u32,
}

struct LightState {
    prev: Option<StateKey>,
    edge: Option<GraphEdge>,
}

#[derive(PartialEq)]
struct HeapEntry {
    cost: f64,
    key: StateKey,
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // cost first; the key breaks ties so ordering is deterministic
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Transfer-aware Dijkstra over one graph snapshot. Caps on iterations,
/// heap size and wall clock apply simultaneously; hitting any of them
/// returns whatever was found with `timed_out` set, never an error.
pub fn shortest_paths(
    graph: &TransitGraph,
    origin: &str,
    destination: &str,
    traffic_factor: f64,
    config: &DijkstraConfig,
) -> (Vec<RawPath>, DijkstraStats) {
    let started = Instant::now();
    let mut stats = DijkstraStats::default();

    if origin == destination || graph.node(origin).is_none() || graph.node(destination).is_none() {
        stats.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        return (Vec::new(), stats);
    }

    let start_key = StateKey {
        node: origin.to_owned(),
        route: None,
        transfers: 0,
    };

    let mut states: HashMap<StateKey, LightState> = HashMap::new();
    let mut visited: HashMap<StateKey, f64> = HashMap::new();
    let mut dominance: HashMap<String, Vec<(f64, u32)>> = HashMap::new();
    let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
    let mut found: Vec<(StateKey, f64)> = Vec::new();
    let mut best_cost: Option<f64> = None;

    states.insert(
        start_key.clone(),
        LightState {
            prev: None,
            edge: None,
        },
    );
    visited.insert(start_key.clone(), 0.0);
    heap.push(Reverse(HeapEntry {
        cost: 0.0,
        key: start_key,
    }));

    while let Some(Reverse(HeapEntry { cost, key })) = heap.pop() {
        stats.iterations += 1;
        if stats.iterations > config.max_iterations {
            stats.timed_out = true;
            break;
        }
        if stats.iterations % 256 == 0
            && started.elapsed().as_millis() >= config.time_limit_ms
        {
            stats.timed_out = true;
            break;
        }

        // stale heap entry
        if visited.get(&key).is_some_and(|&best| cost > best) {
            continue;
        }

        if let Some(best) = best_cost {
            if cost > config.early_exit_factor * best {
                stats.early_exits += 1;
                continue;
            }
        }

        if key.node == destination {
            best_cost = Some(best_cost.map_or(cost, |best| best.min(cost)));
            if let Some(best) = best_cost {
                if cost > config.prune_factor * best {
                    // everything still queued is at least this expensive
                    break;
                }
            }
            found.push((key, cost));
            if found.len() >= 2 * config.max_results {
                break;
            }
            continue;
        }

        for edge in graph.edges_from(&key.node) {
            let mut transfers = key.transfers;
            let mut edge_cost = edge.avg_travel_time_min * traffic_factor;
            if let Some(current_route) = &key.route {
                if *current_route != edge.route_id {
                    transfers += 1;
                    edge_cost += config.transfer_penalty_min;
                }
            }
            if transfers > config.max_transfers {
                continue;
            }

            let next_cost = cost + edge_cost;
            let next_key = StateKey {
                node: edge.to.raw(),
                route: Some(edge.route_id.clone()),
                transfers,
            };

            if visited.get(&next_key).is_some_and(|&seen| seen <= next_cost) {
                continue;
            }

            let frontier = dominance.entry(next_key.node.clone()).or_default();
            let dominated = frontier.iter().any(|&(frontier_cost, frontier_transfers)| {
                frontier_cost <= next_cost
                    && frontier_transfers <= transfers
                    && (frontier_cost < next_cost || frontier_transfers < transfers)
            });
            if dominated {
                stats.dominated_prunes += 1;
                continue;
            }
            frontier.retain(|&(frontier_cost, frontier_transfers)| {
                !(next_cost <= frontier_cost
                    && transfers <= frontier_transfers
                    && (next_cost < frontier_cost || transfers < frontier_transfers))
            });
            frontier.push((next_cost, transfers));

            if heap.len() >= config.max_heap {
                let keep = best_cost
                    .is_some_and(|best| next_cost <= config.prune_factor * best);
                if !keep {
                    stats.heap_drops += 1;
                    continue;
                }
            }

            visited.insert(next_key.clone(), next_cost);
            states.insert(
                next_key.clone(),
                LightState {
                    prev: Some(key.clone()),
                    edge: Some(edge.clone()),
                },
            );
            heap.push(Reverse(HeapEntry {
                cost: next_cost,
                key: next_key,
            }));
            stats.heap_peak = stats.heap_peak.max(heap.len());
        }
    }

    found.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut paths = Vec::new();
    let mut signatures: HashSet<Vec<String>> = HashSet::new();
    for (key, cost) in found {
        let Some(path) = reconstruct(&states, &key, cost) else {
            continue;
        };
        if !signatures.insert(path.segment_signature()) {
            continue;
        }
        paths.push(path);
        if paths.len() >= config.max_results {
            break;
        }
    }

    stats.results_found = paths.len();
    stats.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    (paths, stats)
}

fn reconstruct(
    states: &HashMap<StateKey, LightState>,
    key: &StateKey,
    cost: f64,
) -> Option<RawPath> {
    let mut edges = Vec::new();
    let mut current = key.clone();
    loop {
        let state = states.get(&current)?;
        match (&state.edge, &state.prev) {
            (Some(edge), Some(prev)) => {
                edges.push(edge.clone());
                current = prev.clone();
            }
            _ => break,
        }
    }
    edges.reverse();
    Some(RawPath {
        edges,
        total_time_min: cost,
        transfer_count: key.transfers,
    })
}

#[cfg(test)]
mod tests {
    use model::{graph::StopNode, WithId};
    use utility::id::Id;

    use super::*;

    fn node(id: &str, latitude: f64) -> WithId<StopNode> {
        WithId::new(
            Id::new(id.to_owned()),
            StopNode {
                name: id.to_owned(),
                latitude,
                longitude: 78.0,
            },
        )
    }

    fn edge(from: &str, to: &str, route: &str, minutes: f64) -> GraphEdge {
        GraphEdge {
            from: Id::new(from.to_owned()),
            to: Id::new(to.to_owned()),
            route_id: route.to_owned(),
            route_number: route.to_uppercase(),
            distance_km: minutes / 2.0,
            avg_travel_time_min: minutes,
            transfer_cost_min: 0.0,
            stop_order: 0,
        }
    }

    fn both(from: &str, to: &str, route: &str, minutes: f64) -> Vec<GraphEdge> {
        vec![edge(from, to, route, minutes), edge(to, from, route, minutes)]
    }

    fn line_graph() -> TransitGraph {
        let edges = [both("a", "b", "r1", 4.0), both("b", "c", "r1", 6.0)]
            .into_iter()
            .flatten()
            .collect();
        TransitGraph::from_parts(
            vec![node("a", 17.0), node("b", 17.01), node("c", 17.02)],
            edges,
        )
    }

    #[test]
    fn finds_single_route_path() {
        let graph = line_graph();
        let (paths, stats) =
            shortest_paths(&graph, "a", "c", 1.0, &DijkstraConfig::default());
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].edges.len(), 2);
        assert_eq!(paths[0].transfer_count, 0);
        assert!((paths[0].total_time_min - 10.0).abs() < 1e-9);
        assert!(!stats.timed_out);
        assert_eq!(stats.results_found, 1);
    }

    #[test]
    fn traffic_factor_scales_cost() {
        let graph = line_graph();
        let (paths, _) = shortest_paths(&graph, "a", "c", 1.2, &DijkstraConfig::default());
        assert!((paths[0].total_time_min - 12.0).abs() < 1e-9);
    }

    #[test]
    fn same_node_query_is_empty() {
        let graph = line_graph();
        let (paths, stats) =
            shortest_paths(&graph, "a", "a", 1.0, &DijkstraConfig::default());
        assert!(paths.is_empty());
        assert!(!stats.timed_out);
    }

    fn two_route_graph() -> TransitGraph {
        // r1: a-b-c   r2: b-d; reaching d from a needs one transfer at b
        let edges = [
            both("a", "b", "r1", 4.0),
            both("b", "c", "r1", 4.0),
            both("b", "d", "r2", 4.0),
        ]
        .into_iter()
        .flatten()
        .collect();
        TransitGraph::from_parts(
            vec![node("a", 17.0), node("b", 17.01), node("c", 17.02), node("d", 17.03)],
            edges,
        )
    }

    #[test]
    fn transfers_are_counted_and_penalized() {
        let graph = two_route_graph();
        let (paths, _) = shortest_paths(&graph, "a", "d", 1.0, &DijkstraConfig::default());
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].transfer_count, 1);
        // 4 + 4 + transfer penalty 5
        assert!((paths[0].total_time_min - 13.0).abs() < 1e-9);
    }

    #[test]
    fn max_transfers_zero_blocks_cross_route_paths() {
        let graph = two_route_graph();
        let config = DijkstraConfig {
            max_transfers: 0,
            ..Default::default()
        };
        let (paths, _) = shortest_paths(&graph, "a", "d", 1.0, &config);
        assert!(paths.is_empty());
    }

    #[test]
    fn transfer_invariant_holds() {
        let graph = two_route_graph();
        for max_transfers in 0..3 {
            let config = DijkstraConfig {
                max_transfers,
                ..Default::default()
            };
            let (paths, _) = shortest_paths(&graph, "a", "d", 1.0, &config);
            for path in paths {
                assert!(path.transfer_count <= max_transfers);
            }
        }
    }

    #[test]
    fn duplicate_segment_sequences_are_collapsed() {
        let graph = two_route_graph();
        let (paths, _) = shortest_paths(&graph, "a", "c", 1.0, &DijkstraConfig::default());
        let mut signatures: Vec<Vec<String>> =
            paths.iter().map(RawPath::segment_signature).collect();
        let before = signatures.len();
        signatures.dedup();
        assert_eq!(before, signatures.len());
    }

    #[test]
    fn iteration_cap_sets_timed_out() {
        let graph = line_graph();
        let config = DijkstraConfig {
            max_iterations: 1,
            ..Default::default()
        };
        let (_, stats) = shortest_paths(&graph, "a", "c", 1.0, &config);
        assert!(stats.timed_out);
    }

    #[test]
    fn segment_signature_collapses_runs() {
        let path = RawPath {
            edges: vec![
                edge("a", "b", "r1", 1.0),
                edge("b", "c", "r1", 1.0),
                edge("c", "d", "r2", 1.0),
            ],
            total_time_min: 3.0,
            transfer_count: 1,
        };
        assert_eq!(path.segment_signature(), vec!["r1", "r2"]);
    }
}
