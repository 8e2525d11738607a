use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use cache::Cache;
use database::Store;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use intelligence::{
    confidence::{confidence_score, ConfidenceInput},
    suggestions::{rank_suggestions, SuggestionCandidate},
    EtaRequest, ReliabilityScore,
};
use utility::{
    geo,
    time::{epoch_ms, local_hour},
};

use crate::{
    channel::{unauthorized, RealtimeState, WsQuery},
    events::{EnrichedBus, PassengerClientEvent, ServerEvent},
};

/// Search radius for `location:send`.
const NEARBY_RADIUS_KM: f64 = 5.0;
const NEARBY_LIMIT: usize = 50;
/// Same-route clustering distance for the congestion signal.
const CLUSTER_RADIUS_KM: f64 = 0.3;

/// `GET /ws/passenger` upgrade. Guests are welcome; a presented token must
/// still verify.
pub async fn ws_handler<S: Store, C: Cache>(
    State(state): State<Arc<RealtimeState<S, C>>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let context = match state.auth.passenger(query.token.as_deref()) {
        Ok(context) => context,
        Err(why) => {
            log::debug!("passenger ws auth failed: {why}");
            return unauthorized();
        }
    };
    ws.on_upgrade(move |socket| handle_passenger(socket, state, context.user_id))
        .into_response()
}

type WsSink = SplitSink<WebSocket, Message>;

async fn send(ws_tx: &mut WsSink, event: &ServerEvent) -> bool {
    ws_tx.send(Message::Text(event.to_json())).await.is_ok()
}

async fn handle_passenger<S: Store, C: Cache>(
    socket: WebSocket,
    state: Arc<RealtimeState<S, C>>,
    user_id: Option<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut feed = state.hub.subscribe_passenger();

    let snapshot = state.bus_snapshot().await;
    if !send(&mut ws_tx, &ServerEvent::BusesSnapshot(snapshot)).await {
        return;
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            broadcast = feed.recv() => {
                match broadcast {
                    Ok(frame) => {
                        if ws_tx.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    // lagged receivers just skip ahead
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }

            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, user_id.as_deref(), &mut ws_tx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

async fn handle_frame<S: Store, C: Cache>(
    state: &Arc<RealtimeState<S, C>>,
    user_id: Option<&str>,
    ws_tx: &mut WsSink,
    raw: &str,
) {
    match serde_json::from_str::<PassengerClientEvent>(raw) {
        Ok(PassengerClientEvent::LocationSend {
            latitude,
            longitude,
        }) => {
            on_location_send(state, user_id, ws_tx, latitude, longitude).await;
        }
        Err(why) => {
            log::debug!("unparseable passenger frame: {why}");
            send(
                ws_tx,
                &ServerEvent::Error {
                    message: "unrecognized event".to_owned(),
                    code: None,
                },
            )
            .await;
        }
    }
}

/// The passenger query: nearby buses enriched with predictive ETA,
/// confidence and reliability, plus the top-three suggestion ranking.
async fn on_location_send<S: Store, C: Cache>(
    state: &Arc<RealtimeState<S, C>>,
    user_id: Option<&str>,
    ws_tx: &mut WsSink,
    latitude: f64,
    longitude: f64,
) {
    let now = epoch_ms();
    let hour = local_hour();

    let nearby = match state
        .store
        .active_buses_near(latitude, longitude, NEARBY_RADIUS_KM, NEARBY_LIMIT)
        .await
    {
        Ok(nearby) => nearby,
        Err(why) => {
            log::warn!("nearby bus query failed: {why}");
            Vec::new()
        }
    };

    let routes = match state.store.routes_with_stops().await {
        Ok(routes) => routes
            .into_iter()
            .map(|route| (route.id.raw(), route.content))
            .collect::<HashMap<_, _>>(),
        Err(why) => {
            log::warn!("route lookup failed: {why}");
            HashMap::new()
        }
    };

    // per-route occupancy average over the visible set
    let mut route_occupancy: HashMap<String, (f64, usize)> = HashMap::new();
    for bus in &nearby {
        if let Some(route_id) = &bus.content.content.route_id {
            let entry = route_occupancy.entry(route_id.raw()).or_insert((0.0, 0));
            entry.0 += bus.content.content.occupancy_percent();
            entry.1 += 1;
        }
    }

    let mut enriched = Vec::with_capacity(nearby.len());
    let mut candidates = Vec::with_capacity(nearby.len());

    for bus in &nearby {
        let bus_row = &bus.content.content;
        let route_id = bus_row.route_id.as_ref().map(|id| id.raw());
        let route = route_id.as_ref().and_then(|id| routes.get(id));

        let nearby_same_route = nearby
            .iter()
            .filter(|other| {
                other.content.id != bus.content.id
                    && other.content.content.route_id == bus_row.route_id
                    && bus_row.route_id.is_some()
            })
            .filter(|other| {
                geo::haversine_distance(
                    bus_row.position.latitude,
                    bus_row.position.longitude,
                    other.content.content.position.latitude,
                    other.content.content.position.longitude,
                ) <= CLUSTER_RADIUS_KM
            })
            .count() as u32;

        let route_occupancy_avg = route_id
            .as_ref()
            .and_then(|id| route_occupancy.get(id))
            .map(|(sum, count)| sum / *count as f64)
            .unwrap_or(0.0);

        let request = EtaRequest {
            bus_latitude: bus_row.position.latitude,
            bus_longitude: bus_row.position.longitude,
            target_latitude: latitude,
            target_longitude: longitude,
            current_speed_kmh: bus_row.position.speed_kmh,
            route_avg_speed_kmh: route.map(|route| route.avg_speed_kmh).unwrap_or(0.0),
            route_id: route_id.clone(),
            hour,
            upcoming_stops: 0,
            occupancy_percent: bus_row.occupancy_percent(),
            nearby_same_route,
            route_occupancy_avg,
        };
        let estimate = state.eta.estimate(&request, now).await;

        let confidence = confidence_score(&ConfidenceInput {
            traffic_level: Some(estimate.traffic_level),
            congestion_level: Some(estimate.congestion_level),
            gps_accuracy_m: None,
            reconnected_secs_ago: None,
            current_speed_kmh: bus_row.position.speed_kmh,
            historical_samples: estimate.historical_samples,
        });

        let reliability = match &route_id {
            Some(route_id) => state.reliability.score(route_id).await,
            None => ReliabilityScore::unknown(),
        };

        if let Some(user) = user_id {
            state
                .notifier
                .bus_arriving(user, &bus.content.id.raw(), estimate.estimated_minutes)
                .await;
        }

        let number = route.map(|route| route.number.clone());
        let view = model::bus::BusView::from_bus(&bus.content.id, bus_row, number);

        candidates.push(SuggestionCandidate {
            bus_id: bus.content.id.raw(),
            eta_minutes: estimate.estimated_minutes as f64,
            distance_meters: bus.distance_km * 1000.0,
            occupancy_percent: bus_row.occupancy_percent(),
            traffic_factor: estimate.traffic_factor,
            confidence: confidence.score,
        });
        enriched.push(EnrichedBus {
            bus: view,
            distance_km: bus.distance_km,
            eta: estimate,
            confidence,
            reliability,
        });
    }

    send(ws_tx, &ServerEvent::BusesNearby(enriched)).await;
    send(
        ws_tx,
        &ServerEvent::BusesSuggestions(rank_suggestions(candidates)),
    )
    .await;
}
