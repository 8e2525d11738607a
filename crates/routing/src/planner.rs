use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use cache::{keys, Cache};
use intelligence::{
    speed_memory::SpeedMemory, traffic::time_of_day_factor, ReliabilityTracker,
};
use serde::Serialize;
use utility::{
    geo::{self, LatLng},
    time::{epoch_ms, local_hour},
};

use crate::{
    dijkstra::{self, DijkstraConfig, RawPath},
    graph::GraphHandle,
    score,
    serialize::{self, LegKind, PlannedRoute},
};

const NEAREST_RADIUS_KM: f64 = 5.0;
const EXPANDED_RADIUS_KM: f64 = 10.0;
const NEAREST_TOP_N: usize = 2;
const EXPANDED_TOP_N: usize = 3;
/// Stop running Dijkstra pairs once this many candidate paths exist.
const EARLY_EXIT_PATHS: usize = 5;
const MAX_RANKED_PATHS: usize = 5;
/// The public planning contract allows three transfers.
const PLANNER_MAX_TRANSFERS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct PlanRequest {
    pub from_latitude: f64,
    pub from_longitude: f64,
    pub to_latitude: f64,
    pub to_longitude: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub routes: Vec<PlannedRoute>,
    pub cached: bool,
}

#[derive(Default)]
struct PlannerMetrics {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total_duration_us: AtomicU64,
    active: AtomicI64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerMetricsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub avg_duration_ms: f64,
    pub active_requests: i64,
}

/// Orchestrates a plan request: cache probe, nearest-node selection,
/// pair-wise Dijkstra with reachability skips, scoring, serialization and
/// live-ETA injection. Cache trouble silently degrades to computing.
pub struct RoutePlanner<C> {
    graph: Arc<GraphHandle>,
    cache: Arc<C>,
    speed_memory: SpeedMemory<C>,
    reliability: ReliabilityTracker<C>,
    metrics: PlannerMetrics,
}

impl<C: Cache> RoutePlanner<C> {
    pub fn new(graph: Arc<GraphHandle>, cache: Arc<C>) -> Self {
        Self {
            graph,
            speed_memory: SpeedMemory::new(Arc::clone(&cache)),
            reliability: ReliabilityTracker::new(Arc::clone(&cache)),
            cache,
            metrics: PlannerMetrics::default(),
        }
    }

    pub async fn plan(&self, request: PlanRequest) -> PlanResponse {
        self.plan_at(request, epoch_ms(), local_hour()).await
    }

    /// Entry point with an explicit clock, so cache-bucket behavior is
    /// testable.
    pub async fn plan_at(&self, request: PlanRequest, now_ms: i64, hour: u32) -> PlanResponse {
        self.metrics.requests.fetch_add(1, Ordering::Relaxed);
        self.metrics.active.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let response = self.plan_inner(request, now_ms, hour).await;
        self.metrics
            .total_duration_us
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.metrics.active.fetch_sub(1, Ordering::Relaxed);
        response
    }

    async fn plan_inner(&self, request: PlanRequest, now_ms: i64, hour: u32) -> PlanResponse {
        let key = keys::route_plan(
            request.from_latitude,
            request.from_longitude,
            request.to_latitude,
            request.to_longitude,
            now_ms,
        );

        match self.cache.get(&key).await {
            Ok(Some(raw)) => {
                if let Ok(routes) = serde_json::from_str::<Vec<PlannedRoute>>(&raw) {
                    self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return PlanResponse {
                        routes,
                        cached: true,
                    };
                }
            }
            Ok(None) => {}
            Err(why) => log::debug!("plan cache read failed: {why}"),
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        let graph = self.graph.snapshot().await;

        let origins = nearest_with_expansion(
            &graph,
            request.from_latitude,
            request.from_longitude,
        );
        let destinations =
            nearest_with_expansion(&graph, request.to_latitude, request.to_longitude);
        if origins.is_empty() || destinations.is_empty() {
            return self.finish(&key, Vec::new()).await;
        }

        let traffic_factor = time_of_day_factor(hour);
        let config = DijkstraConfig {
            max_transfers: PLANNER_MAX_TRANSFERS,
            ..Default::default()
        };

        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
        let mut raw_paths: Vec<RawPath> = Vec::new();
        'pairs: for (origin, _) in &origins {
            for (destination, _) in &destinations {
                if origin == destination {
                    continue;
                }
                if !seen_pairs.insert((origin.clone(), destination.clone())) {
                    continue;
                }
                // O(1) component check before paying for Dijkstra
                if !graph.are_connected(origin, destination) {
                    continue;
                }
                let (paths, stats) = dijkstra::shortest_paths(
                    &graph,
                    origin,
                    destination,
                    traffic_factor,
                    &config,
                );
                if stats.timed_out {
                    log::debug!(
                        "dijkstra truncated for {origin}->{destination}: {} iterations",
                        stats.iterations
                    );
                }
                raw_paths.extend(paths);
                if raw_paths.len() >= EARLY_EXIT_PATHS {
                    break 'pairs;
                }
            }
        }

        // Candidates end at different graph nodes; fold the endpoint walks
        // into each total so the Pareto filter compares like with like.
        for path in &mut raw_paths {
            let (Some(first), Some(last)) = (path.edges.first(), path.edges.last()) else {
                continue;
            };
            let (Some(from_node), Some(to_node)) =
                (graph.node(&first.from.raw()), graph.node(&last.to.raw()))
            else {
                continue;
            };
            let approach_km = geo::haversine_distance(
                request.from_latitude,
                request.from_longitude,
                from_node.latitude,
                from_node.longitude,
            );
            let egress_km = geo::haversine_distance(
                to_node.latitude,
                to_node.longitude,
                request.to_latitude,
                request.to_longitude,
            );
            path.total_time_min +=
                (approach_km + egress_km) * 1000.0 / serialize::WALK_METERS_PER_MIN;
        }

        let filtered = score::pareto_filter(raw_paths);
        let reliability = self.reliability_by_route(&filtered).await;
        let scored = score::score_paths(filtered, &reliability, &HashMap::new());

        let origin_point = LatLng::new(request.from_latitude, request.from_longitude);
        let destination_point = LatLng::new(request.to_latitude, request.to_longitude);
        let mut routes: Vec<PlannedRoute> = scored
            .into_iter()
            .take(MAX_RANKED_PATHS)
            .filter_map(|scored| {
                serialize::serialize_path(
                    &scored.path,
                    &graph,
                    origin_point,
                    destination_point,
                    now_ms,
                )
            })
            .collect();

        if let Some(first) = routes.first_mut() {
            self.inject_live_eta(first, now_ms).await;
        }

        self.finish(&key, routes).await
    }

    /// Replaces the top result's bus-leg ETAs with live windowed speeds
    /// where available. Paths are deliberately not re-scored afterwards.
    async fn inject_live_eta(&self, route: &mut PlannedRoute, now_ms: i64) {
        let mut changed = false;
        for leg in &mut route.legs {
            if leg.kind != LegKind::Bus {
                continue;
            }
            let Some(route_id) = &leg.route_id else {
                continue;
            };
            let Some((avg_speed, _)) = self
                .speed_memory
                .windowed_average(route_id, SpeedMemory::<C>::ETA_WINDOW_MS, now_ms)
                .await
            else {
                continue;
            };
            if avg_speed > 0.0 {
                leg.eta_minutes = leg.distance_km / avg_speed * 60.0;
                changed = true;
            }
        }
        if changed {
            route.total_eta_min = route.legs.iter().map(|leg| leg.eta_minutes).sum();
            route.arrival_time_ms = now_ms + (route.total_eta_min * 60_000.0) as i64;
        }
    }

    async fn reliability_by_route(&self, paths: &[RawPath]) -> HashMap<String, f64> {
        let mut routes: HashSet<String> = HashSet::new();
        for path in paths {
            for edge in &path.edges {
                if !edge.is_transfer() {
                    routes.insert(edge.route_id.clone());
                }
            }
        }
        let mut scores = HashMap::new();
        for route_id in routes {
            let score = self.reliability.score(&route_id).await;
            scores.insert(route_id, score.score as f64);
        }
        scores
    }

    /// Stores the result (empty ones included, so unreachable pairs are not
    /// recomputed every request) and builds the response.
    async fn finish(&self, key: &str, routes: Vec<PlannedRoute>) -> PlanResponse {
        match serde_json::to_string(&routes) {
            Ok(payload) => {
                if let Err(why) = self.cache.set_ex(key, &payload, keys::PLAN_TTL_SECS).await
                {
                    log::debug!("plan cache write failed: {why}");
                }
            }
            Err(why) => log::debug!("plan serialization for cache failed: {why}"),
        }
        PlanResponse {
            routes,
            cached: false,
        }
    }

    pub fn metrics(&self) -> PlannerMetricsSnapshot {
        let requests = self.metrics.requests.load(Ordering::Relaxed);
        let cache_hits = self.metrics.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.metrics.cache_misses.load(Ordering::Relaxed);
        let total_us = self.metrics.total_duration_us.load(Ordering::Relaxed);
        PlannerMetricsSnapshot {
            requests,
            cache_hits,
            cache_misses,
            cache_hit_rate: if requests > 0 {
                cache_hits as f64 / requests as f64
            } else {
                0.0
            },
            avg_duration_ms: if requests > 0 {
                total_us as f64 / requests as f64 / 1000.0
            } else {
                0.0
            },
            active_requests: self.metrics.active.load(Ordering::Relaxed),
        }
    }
}

fn nearest_with_expansion(
    graph: &crate::graph::TransitGraph,
    latitude: f64,
    longitude: f64,
) -> Vec<(String, f64)> {
    let hits = graph.nearest_nodes(latitude, longitude, NEAREST_RADIUS_KM, NEAREST_TOP_N);
    if !hits.is_empty() {
        return hits;
    }
    graph.nearest_nodes(latitude, longitude, EXPANDED_RADIUS_KM, EXPANDED_TOP_N)
}
