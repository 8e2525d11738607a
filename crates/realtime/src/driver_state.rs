use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use database::{Store, StoreError};
use model::driver::{Driver, DriverState, DriverStateLog};
use utility::{id::Id, time::epoch_ms};

/// An ONLINE driver with no activity for this long is moved to IDLE.
pub const IDLE_TIMEOUT_MS: i64 = 300_000;
/// How often the idle detector sweeps.
pub const IDLE_CHECK_INTERVAL_SECS: u64 = 60;

const IDLE_REASON: &str = "No location update for 5 minutes";

/// Admissible transitions. OFFLINE and DISCONNECTED are additionally always
/// reachable (shutdown, socket loss) regardless of this table.
fn table_allows(from: DriverState, to: DriverState) -> bool {
    use DriverState::*;
    matches!(
        (from, to),
        (Pending, Offline)
            | (Offline, Online)
            | (Online, Offline | OnTrip | Idle | Disconnected)
            | (OnTrip, Offline | Online | Disconnected)
            | (Idle, Offline | Online | Disconnected)
            | (Disconnected, Offline | Online)
    )
}

pub fn is_transition_allowed(from: DriverState, to: DriverState) -> bool {
    matches!(to, DriverState::Offline | DriverState::Disconnected)
        || table_allows(from, to)
}

#[derive(Default)]
struct ServiceInner {
    /// Current state per driver id, primed on connect.
    states: HashMap<String, DriverState>,
    /// Last-activity timestamps, epoch ms.
    activity: HashMap<String, i64>,
}

/// Owns every per-driver activity timestamp and the in-process view of
/// driver states. Each transition attempt, legal or not, lands in the
/// state log.
pub struct DriverStateService<S> {
    store: Arc<S>,
    inner: Mutex<ServiceInner>,
}

impl<S: Store> DriverStateService<S> {
    pub fn new(store: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            store,
            inner: Mutex::new(ServiceInner::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ServiceInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seeds the in-process state from the store row on connect.
    pub fn prime(&self, driver_id: &str, state: DriverState) {
        self.lock().states.insert(driver_id.to_owned(), state);
    }

    pub fn current(&self, driver_id: &str) -> Option<DriverState> {
        self.lock().states.get(driver_id).copied()
    }

    /// Attempts a transition. Illegal ones are rejected and logged; the
    /// return value says whether the transition was applied.
    pub async fn transition(
        &self,
        driver_id: &Id<Driver>,
        to: DriverState,
        reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        let raw_id = driver_id.raw();
        let from = self
            .current(&raw_id)
            .unwrap_or(DriverState::Offline);
        let accepted = is_transition_allowed(from, to);

        let entry = DriverStateLog {
            driver_id: raw_id.clone(),
            from_state: from,
            to_state: to,
            accepted,
            reason: reason.map(str::to_owned),
            timestamp: epoch_ms(),
        };
        self.store.append_state_log(entry).await?;

        if !accepted {
            log::warn!(
                "illegal driver transition rejected: {} {} -> {}",
                raw_id,
                from.as_str(),
                to.as_str()
            );
            return Ok(false);
        }

        self.store.set_driver_state(driver_id, to).await?;
        self.lock().states.insert(raw_id, to);
        Ok(true)
    }

    pub fn record_activity(&self, driver_id: &str) {
        self.lock()
            .activity
            .insert(driver_id.to_owned(), epoch_ms());
    }

    pub fn last_activity(&self, driver_id: &str) -> Option<i64> {
        self.lock().activity.get(driver_id).copied()
    }

    /// Drops per-driver bookkeeping on disconnect.
    pub fn forget(&self, driver_id: &str) {
        let mut inner = self.lock();
        inner.activity.remove(driver_id);
        inner.states.remove(driver_id);
    }

    pub fn tracked_drivers(&self) -> usize {
        self.lock().states.len()
    }

    /// Counts per state for the admin `drivers:status` event.
    pub fn state_counts(&self) -> HashMap<DriverState, usize> {
        let inner = self.lock();
        let mut counts = HashMap::new();
        for state in inner.states.values() {
            *counts.entry(*state).or_insert(0) += 1;
        }
        counts
    }

    /// One idle-detector pass; returns the drivers moved to IDLE.
    pub async fn idle_sweep(&self) -> Vec<String> {
        let now = epoch_ms();
        let stale: Vec<String> = {
            let inner = self.lock();
            inner
                .states
                .iter()
                .filter(|(_, state)| **state == DriverState::Online)
                .filter(|(driver_id, _)| {
                    inner
                        .activity
                        .get(*driver_id)
                        .map_or(true, |last| now - last >= IDLE_TIMEOUT_MS)
                })
                .map(|(driver_id, _)| driver_id.clone())
                .collect()
        };

        let mut idled = Vec::new();
        for driver_id in stale {
            let id = Id::new(driver_id.clone());
            match self
                .transition(&id, DriverState::Idle, Some(IDLE_REASON))
                .await
            {
                Ok(true) => idled.push(driver_id),
                Ok(false) => {}
                Err(why) => log::warn!("idle transition for {driver_id} failed: {why}"),
            }
        }
        idled
    }
}

#[cfg(test)]
mod tests {
    use database::MemoryStore;
    use model::driver::Driver;
    use model::WithId;

    use super::*;

    async fn service_with_driver(
        state: DriverState,
    ) -> (Arc<MemoryStore>, Arc<DriverStateService<MemoryStore>>) {
        let store = Arc::new(MemoryStore::new());
        store
            .seed_driver(
                "d1",
                Driver {
                    user_id: "u1".to_owned(),
                    license_no: "L-1".to_owned(),
                    approved: true,
                    bus_id: None,
                    state,
                },
            )
            .await;
        let service = DriverStateService::new(Arc::clone(&store));
        service.prime("d1", state);
        (store, service)
    }

    #[test]
    fn table_matches_specification() {
        use DriverState::*;
        let allowed = [
            (Pending, Offline),
            (Offline, Online),
            (Online, OnTrip),
            (Online, Idle),
            (OnTrip, Online),
            (Idle, Online),
            (Disconnected, Online),
        ];
        for (from, to) in allowed {
            assert!(is_transition_allowed(from, to), "{from:?} -> {to:?}");
        }
        let rejected = [
            (Pending, Online),
            (Offline, OnTrip),
            (Idle, OnTrip),
            (Disconnected, OnTrip),
            (Rejected, Online),
            (Offline, Idle),
        ];
        for (from, to) in rejected {
            assert!(!is_transition_allowed(from, to), "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn forced_states_always_reachable() {
        use DriverState::*;
        for from in [Pending, Offline, Online, OnTrip, Idle, Disconnected, Rejected] {
            assert!(is_transition_allowed(from, Offline));
            assert!(is_transition_allowed(from, Disconnected));
        }
    }

    #[tokio::test]
    async fn legal_transition_is_applied_and_logged() {
        let (store, service) = service_with_driver(DriverState::Offline).await;
        let applied = service
            .transition(&Id::new("d1".into()), DriverState::Online, None)
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(service.current("d1"), Some(DriverState::Online));
        let logs = store.state_logs().await;
        assert_eq!(logs.len(), 1);
        assert!(logs[0].accepted);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_and_logged() {
        let (store, service) = service_with_driver(DriverState::Pending).await;
        let applied = service
            .transition(&Id::new("d1".into()), DriverState::OnTrip, None)
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(service.current("d1"), Some(DriverState::Pending));
        let logs = store.state_logs().await;
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].accepted);
    }

    #[tokio::test]
    async fn idle_sweep_moves_stale_online_drivers() {
        let (_, service) = service_with_driver(DriverState::Online).await;
        // no activity recorded at all counts as stale
        let idled = service.idle_sweep().await;
        assert_eq!(idled, vec!["d1".to_owned()]);
        assert_eq!(service.current("d1"), Some(DriverState::Idle));
    }

    #[tokio::test]
    async fn active_driver_is_not_idled() {
        let (_, service) = service_with_driver(DriverState::Online).await;
        service.record_activity("d1");
        let idled = service.idle_sweep().await;
        assert!(idled.is_empty());
        assert_eq!(service.current("d1"), Some(DriverState::Online));
    }
}
