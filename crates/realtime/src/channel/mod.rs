use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::{routing::get, Router};
use cache::Cache;
use database::Store;
use intelligence::{EtaEngine, ReliabilityTracker, SpeedMemory};
use model::{bus::BusView, route::Route, WithId};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::Authenticator,
    driver_state::DriverStateService,
    events::ServerEvent,
    hybrid::HybridManager,
    notify::{LogPushSink, Notifier, PushSink},
    safety::SafetyValidator,
};

pub mod admin;
pub mod driver;
pub mod passenger;

const BROADCAST_CAPACITY: usize = 256;

/// Fanout hub for the three namespaces. Passenger and admin subscribers get
/// broadcast JSON frames; driver sockets are addressable individually so
/// the admin plane can push approval updates and force-offline.
pub struct Hub {
    passenger_tx: broadcast::Sender<String>,
    admin_tx: broadcast::Sender<String>,
    drivers: Mutex<HashMap<String, mpsc::UnboundedSender<ServerEvent>>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (passenger_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (admin_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            passenger_tx,
            admin_tx,
            drivers: Mutex::new(HashMap::new()),
        }
    }

    pub fn broadcast_passenger(&self, event: &ServerEvent) {
        // no receivers is fine, fanout is at-least-once best effort
        let _ = self.passenger_tx.send(event.to_json());
    }

    pub fn broadcast_admin(&self, event: &ServerEvent) {
        let _ = self.admin_tx.send(event.to_json());
    }

    pub fn subscribe_passenger(&self) -> broadcast::Receiver<String> {
        self.passenger_tx.subscribe()
    }

    pub fn subscribe_admin(&self) -> broadcast::Receiver<String> {
        self.admin_tx.subscribe()
    }

    /// Registers a driver socket. A reconnect replaces the previous sender
    /// outright, so stale connections never receive duplicated events.
    pub fn register_driver(
        &self,
        user_id: &str,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut drivers) = self.drivers.lock() {
            drivers.insert(user_id.to_owned(), tx);
        }
        rx
    }

    pub fn unregister_driver(&self, user_id: &str) {
        if let Ok(mut drivers) = self.drivers.lock() {
            drivers.remove(user_id);
        }
    }

    /// Direct event to one driver; `false` when the driver is not connected.
    pub fn notify_driver(&self, user_id: &str, event: ServerEvent) -> bool {
        match self.drivers.lock() {
            Ok(drivers) => drivers
                .get(user_id)
                .map(|tx| tx.send(event).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn connected_drivers(&self) -> usize {
        self.drivers.lock().map(|drivers| drivers.len()).unwrap_or(0)
    }
}

/// Everything the namespace handlers need, wired once at bootstrap.
pub struct RealtimeState<S, C> {
    pub store: Arc<S>,
    pub cache: Arc<C>,
    pub hub: Arc<Hub>,
    pub hybrid: Arc<HybridManager<S>>,
    pub drivers: Arc<DriverStateService<S>>,
    pub safety: Arc<SafetyValidator>,
    pub eta: Arc<EtaEngine<C>>,
    pub speed_memory: SpeedMemory<C>,
    pub reliability: ReliabilityTracker<C>,
    pub notifier: Arc<Notifier<C>>,
    pub auth: Authenticator,
    pub shutdown: CancellationToken,
}

impl<S: Store, C: Cache> RealtimeState<S, C> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<C>,
        jwt_secret: &str,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Self::with_push_sink(store, cache, jwt_secret, shutdown, Arc::new(LogPushSink))
    }

    pub fn with_push_sink(
        store: Arc<S>,
        cache: Arc<C>,
        jwt_secret: &str,
        shutdown: CancellationToken,
        sink: Arc<dyn PushSink>,
    ) -> Arc<Self> {
        let hub = Arc::new(Hub::new());
        let speed_memory = SpeedMemory::new(Arc::clone(&cache));
        Arc::new(Self {
            hybrid: HybridManager::new(Arc::clone(&store)),
            drivers: DriverStateService::new(Arc::clone(&store)),
            safety: Arc::new(SafetyValidator::new()),
            eta: Arc::new(EtaEngine::new(speed_memory.clone())),
            reliability: ReliabilityTracker::new(Arc::clone(&cache)),
            notifier: Notifier::new(Arc::clone(&cache), sink, Arc::clone(&hub)),
            auth: Authenticator::new(jwt_secret),
            speed_memory,
            hub,
            store,
            cache,
            shutdown,
        })
    }

    /// Route-number lookup for snapshot building.
    pub(crate) async fn route_numbers(&self) -> HashMap<String, String> {
        match self.store.routes_with_stops().await {
            Ok(routes) => routes
                .iter()
                .map(|route: &WithId<Route>| (route.id.raw(), route.content.number.clone()))
                .collect(),
            Err(why) => {
                log::warn!("route lookup for snapshot failed: {why}");
                HashMap::new()
            }
        }
    }

    /// All buses as views, for `buses:snapshot` / `buses:all`.
    pub(crate) async fn bus_snapshot(&self) -> Vec<BusView> {
        let numbers = self.route_numbers().await;
        match self.store.all_buses().await {
            Ok(buses) => buses
                .iter()
                .map(|bus| {
                    let number = bus
                        .content
                        .route_id
                        .as_ref()
                        .and_then(|id| numbers.get(&id.raw()).cloned());
                    BusView::from_bus(&bus.id, &bus.content, number)
                })
                .collect(),
            Err(why) => {
                log::warn!("bus snapshot failed: {why}");
                Vec::new()
            }
        }
    }
}

/// Query parameters accepted on every ws upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// The namespace routes. Mounted under the server's router.
pub fn routes<S: Store, C: Cache>(state: Arc<RealtimeState<S, C>>) -> Router {
    Router::new()
        .route("/ws/passenger", get(passenger::ws_handler::<S, C>))
        .route("/ws/driver", get(driver::ws_handler::<S, C>))
        .route("/ws/admin", get(admin::ws_handler::<S, C>))
        .with_state(state)
}

pub(crate) fn unauthorized() -> axum::response::Response {
    axum::http::Response::builder()
        .status(401)
        .body(axum::body::Body::from("unauthorized"))
        .unwrap_or_default()
}
