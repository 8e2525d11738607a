use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use cache::{keys, Cache};
use database::{Store, StoreError};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use model::{
    bus::{BusPosition, BusStatus, BusView},
    driver::DriverState,
    trip::{Trip, TripStatus},
};
use tokio::sync::mpsc;
use utility::{geo, id::Id, time::epoch_ms};

use crate::{
    channel::{unauthorized, RealtimeState, WsQuery},
    events::{DriverClientEvent, DriverDisconnected, DriverInit, DriversStatus, ServerEvent},
    safety::LocationUpdate,
};

/// Cadence for refreshing the presence keys in the cache.
const HEARTBEAT_REFRESH: Duration = Duration::from_secs(20);

/// `GET /ws/driver` upgrade.
pub async fn ws_handler<S: Store, C: Cache>(
    State(state): State<Arc<RealtimeState<S, C>>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let context = match state.auth.driver(query.token.as_deref()) {
        Ok(context) => context,
        Err(why) => {
            log::debug!("driver ws auth failed: {why}");
            return unauthorized();
        }
    };
    let user_id = context.user_id.unwrap_or_default();
    ws.on_upgrade(move |socket| handle_driver(socket, state, user_id))
        .into_response()
}

type WsSink = SplitSink<WebSocket, Message>;

async fn send(ws_tx: &mut WsSink, event: &ServerEvent) -> bool {
    ws_tx.send(Message::Text(event.to_json())).await.is_ok()
}

/// Per-connection context, rebuilt from the store on every connect so a
/// reconnect never inherits stale handler state.
struct DriverSession {
    driver_id: String,
    user_id: String,
    bus_id: String,
    registration_no: String,
    capacity: u32,
    route_id: Option<String>,
    route_number: Option<String>,
    connected_at_ms: i64,
    /// Last known passenger count, for views when an update omits it.
    last_passenger_count: std::sync::atomic::AtomicU32,
}

async fn handle_driver<S: Store, C: Cache>(
    socket: WebSocket,
    state: Arc<RealtimeState<S, C>>,
    user_id: String,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let driver = match state.store.driver_by_user(&user_id).await {
        Ok(Some(driver)) => driver,
        Ok(None) => {
            send(
                &mut ws_tx,
                &ServerEvent::Error {
                    message: "no driver profile for this account".to_owned(),
                    code: None,
                },
            )
            .await;
            return;
        }
        Err(why) => {
            log::error!("driver lookup failed for {user_id}: {why}");
            send(
                &mut ws_tx,
                &ServerEvent::Error {
                    message: "driver lookup failed".to_owned(),
                    code: None,
                },
            )
            .await;
            return;
        }
    };

    let mut hub_rx = state.hub.register_driver(&user_id);

    if !driver.content.approved {
        send(&mut ws_tx, &ServerEvent::PendingApproval).await;
        hold_socket(&state, &mut ws_tx, &mut ws_rx, &mut hub_rx).await;
        state.hub.unregister_driver(&user_id);
        return;
    }

    let Some(bus_id) = driver.content.bus_id.clone() else {
        send(&mut ws_tx, &ServerEvent::NoBusAssigned).await;
        hold_socket(&state, &mut ws_tx, &mut ws_rx, &mut hub_rx).await;
        state.hub.unregister_driver(&user_id);
        return;
    };

    let bus = match state.store.bus(&bus_id).await {
        Ok(Some(bus)) => bus,
        _ => {
            send(
                &mut ws_tx,
                &ServerEvent::Error {
                    message: format!("assigned bus {bus_id} not found"),
                    code: None,
                },
            )
            .await;
            state.hub.unregister_driver(&user_id);
            return;
        }
    };

    let route = match &bus.content.route_id {
        Some(route_id) => state.store.route(route_id).await.ok().flatten(),
        None => None,
    };
    let route_id = bus.content.route_id.as_ref().map(|id| id.raw());

    // hybrid ownership is the gate: refusal means another driver is live
    if let Err(refusal) = state.hybrid.register(
        &bus_id.raw(),
        &driver.id.raw(),
        route_id.as_deref().unwrap_or(""),
    ) {
        send(
            &mut ws_tx,
            &ServerEvent::Error {
                message: format!("bus {bus_id} can not be claimed"),
                code: Some(refusal.code().to_owned()),
            },
        )
        .await;
        state.hub.unregister_driver(&user_id);
        return;
    }

    if let Err(why) = state
        .store
        .set_bus_control(&bus_id, BusStatus::Active, false)
        .await
    {
        log::warn!("bus activation write failed for {bus_id}: {why}");
    }

    state.drivers.prime(&driver.id.raw(), driver.content.state);
    if let Err(why) = state
        .drivers
        .transition(&driver.id, DriverState::Online, Some("driver connected"))
        .await
    {
        log::warn!("online transition failed for {}: {why}", driver.id);
    }
    state.drivers.record_activity(&driver.id.raw());
    broadcast_driver_status(&state);

    let session = DriverSession {
        driver_id: driver.id.raw(),
        user_id: user_id.clone(),
        bus_id: bus_id.raw(),
        registration_no: bus.content.registration_no.clone(),
        capacity: bus.content.capacity,
        route_id,
        route_number: route.as_ref().map(|route| route.content.number.clone()),
        connected_at_ms: epoch_ms(),
        last_passenger_count: std::sync::atomic::AtomicU32::new(
            bus.content.passenger_count,
        ),
    };

    refresh_presence(&state, &session).await;

    let active_trip = state.store.active_trip_for_bus(&bus_id).await.ok().flatten();
    send(
        &mut ws_tx,
        &ServerEvent::DriverInit(DriverInit {
            driver_id: session.driver_id.clone(),
            user_id: session.user_id.clone(),
            bus_id: session.bus_id.clone(),
            registration_no: bus.content.registration_no.clone(),
            route_id: session.route_id.clone(),
            route_number: session.route_number.clone(),
            route_name: route.as_ref().map(|route| route.content.name.clone()),
            capacity: session.capacity,
            approved: true,
            status: driver.content.state.as_str().to_owned(),
            active_trip_id: active_trip.as_ref().map(|trip| trip.id.raw()),
            trip_start_time: active_trip.as_ref().map(|trip| trip.content.start_time),
        }),
    )
    .await;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_REFRESH);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            _ = heartbeat.tick() => {
                refresh_presence(&state, &session).await;
            }

            event = hub_rx.recv() => {
                match event {
                    Some(event) => {
                        let force_offline = matches!(event, ServerEvent::ForceOffline);
                        if !send(&mut ws_tx, &event).await || force_offline {
                            break;
                        }
                    }
                    None => break,
                }
            }

            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&state, &session, &mut ws_tx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    on_disconnect(&state, &session).await;
    state.hub.unregister_driver(&user_id);
}

/// Pending-approval and no-bus connections stay open to receive approval
/// or assignment events, but run no operational handlers.
async fn hold_socket<S: Store, C: Cache>(
    state: &Arc<RealtimeState<S, C>>,
    ws_tx: &mut WsSink,
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
    hub_rx: &mut mpsc::UnboundedReceiver<ServerEvent>,
) {
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            event = hub_rx.recv() => {
                match event {
                    Some(event) => {
                        if !send(ws_tx, &event).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

async fn refresh_presence<S: Store, C: Cache>(
    state: &Arc<RealtimeState<S, C>>,
    session: &DriverSession,
) {
    let socket_key = keys::driver_socket(&session.user_id);
    let socket_id = format!("{}-{}", session.user_id, session.connected_at_ms);
    if let Err(why) = state
        .cache
        .set_ex(&socket_key, &socket_id, keys::HEARTBEAT_TTL_SECS)
        .await
    {
        log::debug!("driver socket presence write failed: {why}");
    }
    let reverse_key = keys::bus_driver(&session.bus_id);
    if let Err(why) = state
        .cache
        .set_ex(&reverse_key, &session.user_id, keys::HEARTBEAT_TTL_SECS)
        .await
    {
        log::debug!("bus->driver presence write failed: {why}");
    }
}

/// Inbound frame dispatch. Handler failures are logged and answered with a
/// generic error event; the socket stays open.
async fn dispatch<S: Store, C: Cache>(
    state: &Arc<RealtimeState<S, C>>,
    session: &DriverSession,
    ws_tx: &mut WsSink,
    raw: &str,
) {
    let event = match serde_json::from_str::<DriverClientEvent>(raw) {
        Ok(event) => event,
        Err(why) => {
            log::debug!("unparseable driver frame from {}: {why}", session.user_id);
            send(
                ws_tx,
                &ServerEvent::Error {
                    message: "unrecognized event".to_owned(),
                    code: None,
                },
            )
            .await;
            return;
        }
    };

    let result = match event {
        DriverClientEvent::LocationUpdate(update) => {
            on_location(state, session, ws_tx, update).await
        }
        DriverClientEvent::Heartbeat { timestamp } => {
            state.drivers.record_activity(&session.driver_id);
            send(ws_tx, &ServerEvent::HeartbeatAck { timestamp }).await;
            Ok(())
        }
        DriverClientEvent::TripStart => on_trip_start(state, session, ws_tx).await,
        DriverClientEvent::TripEnd => on_trip_end(state, session, ws_tx).await,
    };

    if let Err(why) = result {
        log::error!("driver handler failed for {}: {why}", session.user_id);
        send(
            ws_tx,
            &ServerEvent::Error {
                message: "internal error".to_owned(),
                code: None,
            },
        )
        .await;
    }
}

async fn on_location<S: Store, C: Cache>(
    state: &Arc<RealtimeState<S, C>>,
    session: &DriverSession,
    ws_tx: &mut WsSink,
    update: LocationUpdate,
) -> Result<(), StoreError> {
    let now = epoch_ms();

    // previous accepted point, needed for heading before history advances
    let previous = state.safety.last_accepted(&session.driver_id);

    if let Err(reason) = state.safety.validate(&session.driver_id, &update, now) {
        log::debug!(
            "location rejected for driver {}: {reason}",
            session.driver_id
        );
        send(ws_tx, &ServerEvent::LocationRejected { reason }).await;
        return Ok(());
    }

    state.drivers.record_activity(&session.driver_id);
    if state.drivers.current(&session.driver_id) == Some(DriverState::Idle) {
        let id = Id::new(session.driver_id.clone());
        let _ = state
            .drivers
            .transition(&id, DriverState::Online, Some("location updates resumed"))
            .await;
        broadcast_driver_status(state);
    }

    let heading = update.heading.unwrap_or_else(|| {
        previous
            .map(|(latitude, longitude)| {
                geo::initial_bearing(latitude, longitude, update.latitude, update.longitude)
            })
            .unwrap_or(0.0)
    });
    let speed = update.speed.unwrap_or(0.0).max(0.0);
    let position = BusPosition {
        latitude: update.latitude,
        longitude: update.longitude,
        heading,
        speed_kmh: speed,
    };
    let passenger_count = update
        .passenger_count
        .map(|count| count.clamp(0, session.capacity as i64) as u32);

    let bus_id = Id::new(session.bus_id.clone());
    // best-effort: a failed write is logged and the stream continues
    if let Err(why) = state
        .store
        .update_bus_position(&bus_id, position, passenger_count, now)
        .await
    {
        log::warn!("position write failed for bus {}: {why}", session.bus_id);
    }

    state
        .hybrid
        .record_position(&session.bus_id, update.latitude, update.longitude);
    if let Some(route_id) = &session.route_id {
        state.hybrid.note_route_activity(route_id);
        if let Some(sample) = update.speed {
            state.speed_memory.record(route_id, sample, now).await;
        }
    }

    let passenger_count = match passenger_count {
        Some(count) => {
            session
                .last_passenger_count
                .store(count, std::sync::atomic::Ordering::Relaxed);
            count
        }
        None => session
            .last_passenger_count
            .load(std::sync::atomic::Ordering::Relaxed),
    };
    let occupancy_percent = if session.capacity > 0 {
        passenger_count as f64 / session.capacity as f64 * 100.0
    } else {
        0.0
    };
    let view = BusView {
        bus_id: session.bus_id.clone(),
        registration_no: session.registration_no.clone(),
        route_id: session.route_id.clone(),
        route_number: session.route_number.clone(),
        latitude: update.latitude,
        longitude: update.longitude,
        heading,
        speed_kmh: speed,
        passenger_count,
        capacity: session.capacity,
        occupancy_percent,
        status: BusStatus::Active,
        simulated: false,
        timestamp: now,
    };

    state.hub.broadcast_passenger(&ServerEvent::BusUpdate(view.clone()));
    state.hub.broadcast_admin(&ServerEvent::BusUpdate(view.clone()));
    if let Ok(payload) = serde_json::to_string(&view) {
        if let Err(why) = state.cache.publish(keys::CHANNEL_BUS_LOCATION, &payload).await {
            log::debug!("bus:location publish failed: {why}");
        }
    }

    state.notifier.occupancy_alert(&view).await;

    send(
        ws_tx,
        &ServerEvent::LocationConfirmed {
            bus_id: session.bus_id.clone(),
            occupancy: occupancy_percent,
            timestamp: now,
        },
    )
    .await;
    Ok(())
}

async fn on_trip_start<S: Store, C: Cache>(
    state: &Arc<RealtimeState<S, C>>,
    session: &DriverSession,
    ws_tx: &mut WsSink,
) -> Result<(), StoreError> {
    let bus_id = Id::new(session.bus_id.clone());
    let now = epoch_ms();
    let trip_id = Id::new(format!("trip-{now}-{}", session.bus_id));
    let trip = Trip {
        bus_id: bus_id.clone(),
        driver_id: Some(Id::new(session.driver_id.clone())),
        start_time: now,
        end_time: None,
        status: TripStatus::InProgress,
    };

    match state.store.start_trip(trip_id, trip).await {
        Ok(created) => {
            let driver_id = Id::new(session.driver_id.clone());
            let _ = state
                .drivers
                .transition(&driver_id, DriverState::OnTrip, Some("trip started"))
                .await;
            broadcast_driver_status(state);
            state
                .notifier
                .trip_started(&session.bus_id, session.route_number.as_deref())
                .await;
            send(
                ws_tx,
                &ServerEvent::TripStarted {
                    trip_id: created.id.raw(),
                    start_time: created.content.start_time,
                },
            )
            .await;
            Ok(())
        }
        Err(StoreError::Conflict(message)) => {
            log::debug!("concurrent trip start refused: {message}");
            send(
                ws_tx,
                &ServerEvent::Error {
                    message: "a trip is already in progress".to_owned(),
                    code: Some("TRIP_ALREADY_ACTIVE".to_owned()),
                },
            )
            .await;
            Ok(())
        }
        Err(why) => Err(why),
    }
}

async fn on_trip_end<S: Store, C: Cache>(
    state: &Arc<RealtimeState<S, C>>,
    session: &DriverSession,
    ws_tx: &mut WsSink,
) -> Result<(), StoreError> {
    let bus_id = Id::new(session.bus_id.clone());
    let Some(trip) = state.store.active_trip_for_bus(&bus_id).await? else {
        send(
            ws_tx,
            &ServerEvent::Error {
                message: "no trip in progress".to_owned(),
                code: Some("NO_ACTIVE_TRIP".to_owned()),
            },
        )
        .await;
        return Ok(());
    };

    let now = epoch_ms();
    state
        .store
        .finish_trip(&trip.id, TripStatus::Completed, now)
        .await?;
    let driver_id = Id::new(session.driver_id.clone());
    let _ = state
        .drivers
        .transition(&driver_id, DriverState::Online, Some("trip ended"))
        .await;
    broadcast_driver_status(state);
    state
        .notifier
        .trip_ended(&session.bus_id, session.route_number.as_deref())
        .await;
    send(
        ws_tx,
        &ServerEvent::TripEnded {
            trip_id: trip.id.raw(),
            end_time: now,
        },
    )
    .await;
    Ok(())
}

async fn on_disconnect<S: Store, C: Cache>(
    state: &Arc<RealtimeState<S, C>>,
    session: &DriverSession,
) {
    let driver_id = Id::new(session.driver_id.clone());
    let _ = state
        .drivers
        .transition(&driver_id, DriverState::Disconnected, Some("socket closed"))
        .await;

    // reset so a reconnect replaying its offline buffer is not judged
    // against the pre-disconnect position
    state.safety.clear(&session.driver_id);

    if let Some(route_id) = &session.route_id {
        state.reliability.record_disconnect(route_id).await;
    }

    state
        .hub
        .broadcast_admin(&ServerEvent::AdminDriverDisconnected(DriverDisconnected {
            driver_id: session.driver_id.clone(),
            bus_id: Some(session.bus_id.clone()),
            user_id: session.user_id.clone(),
            timestamp: epoch_ms(),
        }));
    broadcast_driver_status(state);

    let hub = Arc::clone(&state.hub);
    let store = Arc::clone(&state.store);
    let bus_id = session.bus_id.clone();
    state.hybrid.unregister(
        &session.bus_id,
        &session.driver_id,
        session.route_id.as_deref().unwrap_or(""),
        move || async move {
            hub.broadcast_passenger(&ServerEvent::BusOffline {
                bus_id: bus_id.clone(),
            });
            let id = Id::new(bus_id.clone());
            match store.active_trip_for_bus(&id).await {
                Ok(Some(trip)) => {
                    if let Err(why) = store
                        .finish_trip(&trip.id, TripStatus::Cancelled, epoch_ms())
                        .await
                    {
                        log::warn!("trip cancellation after grace failed: {why}");
                    }
                }
                Ok(None) => {}
                Err(why) => log::warn!("trip lookup after grace failed: {why}"),
            }
        },
    );

    state.drivers.forget(&session.driver_id);

    let _ = state
        .cache
        .del(&keys::driver_socket(&session.user_id))
        .await;
    let _ = state.cache.del(&keys::bus_driver(&session.bus_id)).await;
}

fn broadcast_driver_status<S: Store, C: Cache>(state: &Arc<RealtimeState<S, C>>) {
    let counts = state.drivers.state_counts();
    let count = |wanted: DriverState| counts.get(&wanted).copied().unwrap_or(0);
    state.hub.broadcast_admin(&ServerEvent::DriversStatus(DriversStatus {
        online: count(DriverState::Online),
        on_trip: count(DriverState::OnTrip),
        idle: count(DriverState::Idle),
        disconnected: count(DriverState::Disconnected),
        offline: count(DriverState::Offline),
    }));
}
