//! The transit routing engine: a graph materialized from routes and stops,
//! a transfer-aware Dijkstra over it, and the planner that turns graph paths
//! into passenger-facing itineraries.

pub mod builder;
pub mod dijkstra;
pub mod direct;
pub mod graph;
pub mod planner;
pub mod score;
pub mod serialize;

pub use builder::{build_graph, rebuild_and_persist, GraphBuildStats};
pub use dijkstra::{DijkstraConfig, DijkstraStats, RawPath};
pub use direct::{find_direct_routes, DirectEndpoint, DirectRouteMatch};
pub use graph::{GraphHandle, TransitGraph};
pub use planner::{PlanRequest, PlanResponse, PlannerMetricsSnapshot, RoutePlanner};
pub use serialize::{LegKind, PlannedRoute, RouteLeg};
