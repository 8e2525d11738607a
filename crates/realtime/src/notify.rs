use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use cache::{keys, Cache};
use model::bus::{BusView, OccupancyLevel};
use serde::Serialize;
use utility::time::epoch_ms;

use crate::{channel::Hub, events::ServerEvent};

/// One push per `(user, bus, type)` within this window.
pub const PUSH_COOLDOWN: Duration = Duration::from_secs(600);
/// Delay reports below this many minutes are not push-worthy.
pub const DELAY_THRESHOLD_MIN: f64 = 5.0;
/// `bus:arriving` fires at or under this ETA.
pub const ARRIVING_THRESHOLD_MIN: u32 = 3;

/// Pseudo-recipient for route-wide broadcasts. The source system notified
/// every passenger rather than subscribers of the route; the cooldown key
/// makes that survivable, so the behavior is kept.
const BROADCAST_USER: &str = "passengers";

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub bus_id: Option<String>,
    pub kind: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The provider no longer knows the token; it must be dropped from the
    /// user record.
    #[error("unknown device token")]
    UnknownToken,
    #[error("device not registered")]
    NotRegistered,
    #[error("push provider unreachable: {0}")]
    Unavailable(String),
}

/// Delivery seam for the third-party push provider. The provider itself is
/// out of scope; the default sink logs.
#[async_trait]
pub trait PushSink: Send + Sync + 'static {
    async fn deliver(&self, user_id: &str, message: &PushMessage) -> Result<(), PushError>;

    /// Invoked when delivery reported a dead token, so the hosting layer
    /// can remove it from the user record.
    async fn forget_token(&self, user_id: &str) {
        let _ = user_id;
    }
}

pub struct LogPushSink;

#[async_trait]
impl PushSink for LogPushSink {
    async fn deliver(&self, user_id: &str, message: &PushMessage) -> Result<(), PushError> {
        log::info!("push to {user_id}: {} - {}", message.title, message.body);
        Ok(())
    }
}

/// Notification rules behind a two-layer dedupe: cache set-if-absent first,
/// an in-memory cooldown map when the cache is down. The in-memory layer is
/// swept periodically so it cannot grow without bound.
pub struct Notifier<C> {
    cache: Arc<C>,
    sink: Arc<dyn PushSink>,
    hub: Arc<Hub>,
    fallback: Mutex<HashMap<String, Instant>>,
}

impl<C: Cache> Notifier<C> {
    pub fn new(cache: Arc<C>, sink: Arc<dyn PushSink>, hub: Arc<Hub>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            sink,
            hub,
            fallback: Mutex::new(HashMap::new()),
        })
    }

    fn fallback_lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        match self.fallback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// First the cache (shared across processes), then the local map.
    async fn allow(&self, user_id: &str, bus_id: &str, kind: &str) -> bool {
        let key = keys::push_rate_limit(user_id, bus_id, kind);
        match self
            .cache
            .set_nx_ex(&key, "1", keys::PUSH_RATE_LIMIT_TTL_SECS)
            .await
        {
            Ok(created) => created,
            Err(why) => {
                log::debug!("rate-limit cache failed, using memory fallback: {why}");
                let mut fallback = self.fallback_lock();
                let now = Instant::now();
                match fallback.get(&key) {
                    Some(last) if now.duration_since(*last) < PUSH_COOLDOWN => false,
                    _ => {
                        fallback.insert(key, now);
                        true
                    }
                }
            }
        }
    }

    /// Drops expired fallback entries; scheduled from bootstrap.
    pub fn sweep_fallback(&self) {
        let now = Instant::now();
        self.fallback_lock()
            .retain(|_, last| now.duration_since(*last) < PUSH_COOLDOWN);
    }

    pub fn fallback_len(&self) -> usize {
        self.fallback_lock().len()
    }

    async fn dispatch(&self, user_id: &str, message: PushMessage) {
        match self.sink.deliver(user_id, &message).await {
            Ok(()) => {}
            Err(PushError::UnknownToken) | Err(PushError::NotRegistered) => {
                self.sink.forget_token(user_id).await;
            }
            Err(why) => log::debug!("push delivery failed: {why}"),
        }

        // horizontal fanout for other processes; failure is non-fatal
        if let Ok(payload) = serde_json::to_string(&message) {
            let channel = keys::notifications_channel("passengers");
            if let Err(why) = self.cache.publish(&channel, &payload).await {
                log::debug!("notification publish failed: {why}");
            }
        }

        self.hub.broadcast_admin(&ServerEvent::NotificationNew {
            title: message.title,
            body: message.body,
            bus_id: message.bus_id,
            timestamp: epoch_ms(),
        });
    }

    /// Rule: occupancy HIGH or FULL on any update.
    pub async fn occupancy_alert(&self, bus: &BusView) {
        let level = OccupancyLevel::from_percent(bus.occupancy_percent);
        if !matches!(level, OccupancyLevel::High | OccupancyLevel::Full) {
            return;
        }
        if !self.allow(BROADCAST_USER, &bus.bus_id, "occupancy").await {
            return;
        }
        let route = bus.route_number.as_deref().unwrap_or("your route");
        self.dispatch(
            BROADCAST_USER,
            PushMessage {
                title: "Bus filling up".to_owned(),
                body: format!(
                    "Bus {} on {route} is at {:.0}% occupancy",
                    bus.registration_no, bus.occupancy_percent
                ),
                bus_id: Some(bus.bus_id.clone()),
                kind: "occupancy".to_owned(),
            },
        )
        .await;
    }

    pub async fn trip_started(&self, bus_id: &str, route_number: Option<&str>) {
        if !self.allow(BROADCAST_USER, bus_id, "trip-start").await {
            return;
        }
        let route = route_number.unwrap_or("a route");
        self.dispatch(
            BROADCAST_USER,
            PushMessage {
                title: "Trip started".to_owned(),
                body: format!("A bus on {route} just started its trip"),
                bus_id: Some(bus_id.to_owned()),
                kind: "trip-start".to_owned(),
            },
        )
        .await;
    }

    pub async fn trip_ended(&self, bus_id: &str, route_number: Option<&str>) {
        if !self.allow(BROADCAST_USER, bus_id, "trip-end").await {
            return;
        }
        let route = route_number.unwrap_or("a route");
        self.dispatch(
            BROADCAST_USER,
            PushMessage {
                title: "Trip ended".to_owned(),
                body: format!("A bus on {route} finished its trip"),
                bus_id: Some(bus_id.to_owned()),
                kind: "trip-end".to_owned(),
            },
        )
        .await;
    }

    /// Rule: reported delay above [`DELAY_THRESHOLD_MIN`].
    pub async fn bus_delayed(&self, bus_id: &str, delay_minutes: f64) {
        if !delay_minutes.is_finite() || delay_minutes <= DELAY_THRESHOLD_MIN {
            return;
        }
        if !self.allow(BROADCAST_USER, bus_id, "delay").await {
            return;
        }
        self.dispatch(
            BROADCAST_USER,
            PushMessage {
                title: "Bus delayed".to_owned(),
                body: format!("Your bus is running about {delay_minutes:.0} minutes late"),
                bus_id: Some(bus_id.to_owned()),
                kind: "delay".to_owned(),
            },
        )
        .await;
    }

    /// Rule: per-passenger arriving alert at ETA <= 3 minutes.
    pub async fn bus_arriving(&self, user_id: &str, bus_id: &str, eta_minutes: u32) {
        if eta_minutes > ARRIVING_THRESHOLD_MIN {
            return;
        }
        if !self.allow(user_id, bus_id, "arriving").await {
            return;
        }
        self.dispatch(
            user_id,
            PushMessage {
                title: "Bus arriving".to_owned(),
                body: format!("Your bus arrives in about {eta_minutes} min"),
                bus_id: Some(bus_id.to_owned()),
                kind: "arriving".to_owned(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use cache::MemoryCache;
    use model::bus::BusStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl PushSink for CountingSink {
        async fn deliver(&self, _user: &str, _message: &PushMessage) -> Result<(), PushError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn view(occupancy: f64) -> BusView {
        BusView {
            bus_id: "b1".to_owned(),
            registration_no: "TS-1".to_owned(),
            route_id: Some("r1".to_owned()),
            route_number: Some("10".to_owned()),
            latitude: 17.0,
            longitude: 78.0,
            heading: 0.0,
            speed_kmh: 20.0,
            passenger_count: 0,
            capacity: 40,
            occupancy_percent: occupancy,
            status: BusStatus::Active,
            simulated: false,
            timestamp: 0,
        }
    }

    fn notifier(sink: Arc<CountingSink>) -> Arc<Notifier<MemoryCache>> {
        Notifier::new(Arc::new(MemoryCache::new()), sink, Arc::new(Hub::new()))
    }

    #[tokio::test]
    async fn high_occupancy_fires_once_per_cooldown() {
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let notifier = notifier(Arc::clone(&sink));
        notifier.occupancy_alert(&view(85.0)).await;
        notifier.occupancy_alert(&view(88.0)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn low_occupancy_is_silent() {
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let notifier = notifier(Arc::clone(&sink));
        notifier.occupancy_alert(&view(30.0)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn small_delay_is_silent_big_delay_fires() {
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let notifier = notifier(Arc::clone(&sink));
        notifier.bus_delayed("b1", 4.0).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
        notifier.bus_delayed("b1", 9.0).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn arriving_respects_threshold_and_per_user_key() {
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let notifier = notifier(Arc::clone(&sink));
        notifier.bus_arriving("u1", "b1", 5).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
        notifier.bus_arriving("u1", "b1", 2).await;
        notifier.bus_arriving("u2", "b1", 2).await;
        notifier.bus_arriving("u1", "b1", 1).await; // deduped
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fallback_sweep_clears_entries() {
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let notifier = notifier(sink);
        notifier
            .fallback_lock()
            .insert("old".to_owned(), Instant::now() - PUSH_COOLDOWN * 2);
        notifier
            .fallback_lock()
            .insert("fresh".to_owned(), Instant::now());
        notifier.sweep_fallback();
        assert_eq!(notifier.fallback_len(), 1);
    }
}
