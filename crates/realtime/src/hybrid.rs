use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use database::Store;
use tokio::task::JoinHandle;
use utility::time::epoch_ms;

/// How long a disconnected driver keeps ownership of their bus. Absorbs
/// transient network losses: passengers never see the bus flicker offline
/// and the simulator never takes over mid-blip.
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    BusAlreadyControlled,
    BusInTransition,
}

impl RegisterError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BusAlreadyControlled => "BUS_ALREADY_CONTROLLED",
            Self::BusInTransition => "BUS_IN_TRANSITION",
        }
    }
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Default)]
struct HybridInner {
    owned: HashSet<String>,
    owner_driver: HashMap<String, String>,
    grace_timers: HashMap<String, JoinHandle<()>>,
    last_positions: HashMap<String, (f64, f64)>,
    route_buses: HashMap<String, HashSet<String>>,
    route_last_driver_ms: HashMap<String, i64>,
    /// Per-bus transition lock; Register/Unregister are mutually exclusive
    /// for the same bus.
    transitioning: HashSet<String>,
}

/// Enforces exactly one source of truth per bus: a registered driver or the
/// simulation, never both. All ownership records live here and are
/// read-only to every other subsystem.
pub struct HybridManager<S> {
    store: Arc<S>,
    inner: Mutex<HybridInner>,
}

impl<S: Store> HybridManager<S> {
    pub fn new(store: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            store,
            inner: Mutex::new(HybridInner::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HybridInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claims a bus for a driver. Cancels any pending grace timer so a
    /// reconnect within the window is seamless.
    pub fn register(
        &self,
        bus_id: &str,
        driver_id: &str,
        route_id: &str,
    ) -> Result<(), RegisterError> {
        let mut inner = self.lock();
        if let Some(owner) = inner.owner_driver.get(bus_id) {
            if owner != driver_id {
                return Err(RegisterError::BusAlreadyControlled);
            }
        }
        if inner.transitioning.contains(bus_id) {
            return Err(RegisterError::BusInTransition);
        }

        inner.transitioning.insert(bus_id.to_owned());
        if let Some(timer) = inner.grace_timers.remove(bus_id) {
            timer.abort();
        }
        inner
            .owner_driver
            .insert(bus_id.to_owned(), driver_id.to_owned());
        inner.owned.insert(bus_id.to_owned());
        inner
            .route_buses
            .entry(route_id.to_owned())
            .or_default()
            .insert(bus_id.to_owned());
        inner
            .route_last_driver_ms
            .insert(route_id.to_owned(), epoch_ms());
        inner.transitioning.remove(bus_id);
        Ok(())
    }

    /// Starts the grace timer. When it fires and the driver has not come
    /// back, the bus is handed to the simulation and `on_expire` runs (the
    /// channel layer uses it to broadcast `bus:offline` and cancel trips).
    pub fn unregister<F, Fut>(
        self: &Arc<Self>,
        bus_id: &str,
        driver_id: &str,
        route_id: &str,
        on_expire: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut inner = self.lock();
        match inner.owner_driver.get(bus_id) {
            Some(owner) if owner == driver_id => {}
            // ownership mismatch: silently refuse
            _ => return,
        }
        if let Some(timer) = inner.grace_timers.remove(bus_id) {
            timer.abort();
        }

        let manager = Arc::clone(self);
        let bus = bus_id.to_owned();
        let driver = driver_id.to_owned();
        let route = route_id.to_owned();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(GRACE_PERIOD).await;
            manager.expire_grace(&bus, &driver, &route, on_expire).await;
        });
        inner.grace_timers.insert(bus_id.to_owned(), timer);
    }

    async fn expire_grace<F, Fut>(
        self: Arc<Self>,
        bus_id: &str,
        driver_id: &str,
        route_id: &str,
        on_expire: F,
    ) where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let last_position = {
            let mut inner = self.lock();
            inner.grace_timers.remove(bus_id);
            // a different driver (or none) owning the bus means this timer
            // raced a re-registration; do nothing
            match inner.owner_driver.get(bus_id) {
                Some(owner) if owner == driver_id => {}
                _ => return,
            }
            if inner.transitioning.contains(bus_id) {
                return;
            }
            inner.transitioning.insert(bus_id.to_owned());
            inner.owned.remove(bus_id);
            inner.owner_driver.remove(bus_id);
            if let Some(buses) = inner.route_buses.get_mut(route_id) {
                buses.remove(bus_id);
            }
            let last_position = inner.last_positions.get(bus_id).copied();
            inner.transitioning.remove(bus_id);
            last_position
        };

        let bus = utility::id::Id::new(bus_id.to_owned());
        if let Err(why) = self
            .store
            .release_bus_to_simulation(&bus, last_position)
            .await
        {
            log::warn!("grace expiry write-back for bus {bus_id} failed: {why}");
        }
        log::info!("grace period expired, bus {bus_id} handed back to simulation");
        on_expire().await;
    }

    /// Last driver-reported position; consumed on grace expiry and by the
    /// simulation's teleport-free resume.
    pub fn record_position(&self, bus_id: &str, latitude: f64, longitude: f64) {
        self.lock()
            .last_positions
            .insert(bus_id.to_owned(), (latitude, longitude));
    }

    pub fn last_position(&self, bus_id: &str) -> Option<(f64, f64)> {
        self.lock().last_positions.get(bus_id).copied()
    }

    pub fn note_route_activity(&self, route_id: &str) {
        self.lock()
            .route_last_driver_ms
            .insert(route_id.to_owned(), epoch_ms());
    }

    pub fn last_driver_seen(&self, route_id: &str) -> Option<i64> {
        self.lock().route_last_driver_ms.get(route_id).copied()
    }

    pub fn driver_buses_on_route(&self, route_id: &str) -> usize {
        self.lock()
            .route_buses
            .get(route_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn is_controlled(&self, bus_id: &str) -> bool {
        self.lock().owned.contains(bus_id)
    }

    pub fn is_in_grace(&self, bus_id: &str) -> bool {
        self.lock().grace_timers.contains_key(bus_id)
    }

    pub fn owner_of(&self, bus_id: &str) -> Option<String> {
        self.lock().owner_driver.get(bus_id).cloned()
    }

    /// Number of live ownership records; feeds the memory monitor.
    pub fn tracked_buses(&self) -> usize {
        self.lock().owner_driver.len()
    }

    /// Cancels every pending grace timer; part of shutdown.
    pub fn drain_grace_timers(&self) {
        let mut inner = self.lock();
        for (_, timer) in inner.grace_timers.drain() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use database::MemoryStore;
    use model::{
        bus::{Bus, BusPosition, BusStatus},
        WithId,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use utility::id::Id;

    use super::*;

    async fn store_with_bus(id: &str) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .put_bus(WithId::new(
                Id::new(id.to_owned()),
                Bus {
                    registration_no: "TS-1".to_owned(),
                    capacity: 40,
                    position: BusPosition::default(),
                    passenger_count: 0,
                    status: BusStatus::Active,
                    route_id: None,
                    simulated: false,
                    updated_at: 0,
                },
            ))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn second_driver_is_refused() {
        let manager = HybridManager::new(store_with_bus("b1").await);
        manager.register("b1", "d1", "r1").unwrap();
        let refused = manager.register("b1", "d2", "r1");
        assert_eq!(refused, Err(RegisterError::BusAlreadyControlled));
        assert_eq!(manager.owner_of("b1").as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn same_driver_reregister_is_idempotent() {
        let manager = HybridManager::new(store_with_bus("b1").await);
        manager.register("b1", "d1", "r1").unwrap();
        manager.register("b1", "d1", "r1").unwrap();
        assert!(manager.is_controlled("b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_expiry_releases_bus_and_fires_callback() {
        let store = store_with_bus("b1").await;
        let manager = HybridManager::new(Arc::clone(&store));
        let fired = Arc::new(AtomicU32::new(0));

        manager.register("b1", "d1", "r1").unwrap();
        manager.record_position("b1", 17.42, 78.51);

        let counter = Arc::clone(&fired);
        manager.unregister("b1", "d1", "r1", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(manager.is_in_grace("b1"));
        assert!(manager.is_controlled("b1"));

        tokio::time::sleep(GRACE_PERIOD + Duration::from_millis(100)).await;
        // let the spawned timer task run to completion
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!manager.is_controlled("b1"));
        assert!(!manager.is_in_grace("b1"));

        let bus = store.bus(&Id::new("b1".into())).await.unwrap().unwrap();
        assert!(bus.content.simulated);
        assert_eq!(bus.content.status, BusStatus::Active);
        assert_eq!(bus.content.position.speed_kmh, 0.0);
        assert!((bus.content.position.latitude - 17.42).abs() < 1e-9);
        assert!((bus.content.position.longitude - 78.51).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_keeps_ownership_silently() {
        let store = store_with_bus("b1").await;
        let manager = HybridManager::new(Arc::clone(&store));
        let fired = Arc::new(AtomicU32::new(0));

        manager.register("b1", "d1", "r1").unwrap();
        let counter = Arc::clone(&fired);
        manager.unregister("b1", "d1", "r1", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(GRACE_PERIOD / 2).await;
        manager.register("b1", "d1", "r1").unwrap();
        assert!(!manager.is_in_grace("b1"));

        tokio::time::sleep(GRACE_PERIOD * 2).await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(manager.is_controlled("b1"));
        assert_eq!(manager.owner_of("b1").as_deref(), Some("d1"));
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_by_non_owner_is_ignored() {
        let manager = HybridManager::new(store_with_bus("b1").await);
        manager.register("b1", "d1", "r1").unwrap();
        manager.unregister("b1", "d2", "r1", || async {});
        assert!(!manager.is_in_grace("b1"));
        assert!(manager.is_controlled("b1"));
    }

    #[tokio::test]
    async fn route_tracking_counts_driver_buses() {
        let store = store_with_bus("b1").await;
        let manager = HybridManager::new(store);
        assert_eq!(manager.driver_buses_on_route("r1"), 0);
        manager.register("b1", "d1", "r1").unwrap();
        assert_eq!(manager.driver_buses_on_route("r1"), 1);
        assert!(manager.last_driver_seen("r1").is_some());
    }
}
