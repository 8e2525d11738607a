use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use cache::Cache;
use database::Store;
use routing::{
    find_direct_routes, DirectEndpoint, DirectRouteMatch, PlanRequest, PlannedRoute,
    RoutePlanner,
};
use serde::{Deserialize, Serialize};
use utility::time::local_hour;

/// Trip-planning API state; the ws namespaces have their own.
pub struct PlanState<S, C> {
    pub store: Arc<S>,
    pub planner: Arc<RoutePlanner<C>>,
}

impl<S, C> Clone for PlanState<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            planner: Arc::clone(&self.planner),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanQuery {
    pub from_lat: f64,
    pub from_lng: f64,
    pub to_lat: f64,
    pub to_lng: f64,
    pub from_name: Option<String>,
    pub to_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "strategy")]
pub enum PlanResult {
    /// A single bus covers the trip; the graph engine never ran.
    #[serde(rename = "direct")]
    Direct { routes: Vec<DirectRouteMatch> },
    #[serde(rename = "graph")]
    Graph {
        routes: Vec<PlannedRoute>,
        cached: bool,
    },
}

pub fn routes<S: Store, C: Cache>(state: PlanState<S, C>) -> Router {
    Router::new()
        .route("/plan", get(plan_handler::<S, C>))
        .with_state(state)
}

/// Direct stop-pair lookup first; the Dijkstra planner is the fallback.
async fn plan_handler<S: Store, C: Cache>(
    State(state): State<PlanState<S, C>>,
    Query(query): Query<PlanQuery>,
) -> Json<PlanResult> {
    let routes = state.store.routes_with_stops().await.unwrap_or_default();
    let origin = DirectEndpoint {
        name: query.from_name.clone(),
        latitude: query.from_lat,
        longitude: query.from_lng,
    };
    let destination = DirectEndpoint {
        name: query.to_name.clone(),
        latitude: query.to_lat,
        longitude: query.to_lng,
    };

    let direct = find_direct_routes(&routes, &origin, &destination, local_hour());
    if !direct.is_empty() {
        return Json(PlanResult::Direct { routes: direct });
    }

    let response = state
        .planner
        .plan(PlanRequest {
            from_latitude: query.from_lat,
            from_longitude: query.from_lng,
            to_latitude: query.to_lat,
            to_longitude: query.to_lng,
        })
        .await;
    Json(PlanResult::Graph {
        routes: response.routes,
        cached: response.cached,
    })
}
