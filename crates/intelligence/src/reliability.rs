use std::sync::Arc;

use cache::{keys, Cache};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::time::epoch_ms;

const DELAY_FIELD: &str = "delayMinutes";
const DISCONNECT_FIELD: &str = "disconnectCount";
const HIGH_CONGESTION_FIELD: &str = "highCongestionMinutes";
const LAST_UPDATED_FIELD: &str = "lastUpdated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReliabilityLabel {
    High,
    Medium,
    Low,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilityScore {
    pub score: u32,
    pub label: ReliabilityLabel,
}

impl ReliabilityScore {
    pub fn from_counters(
        delay_minutes: f64,
        disconnect_count: f64,
        high_congestion_minutes: f64,
    ) -> Self {
        let raw = 100.0
            - 3.0 * delay_minutes
            - 7.0 * disconnect_count
            - 2.0 * high_congestion_minutes;
        let score = if raw.is_finite() {
            raw.round().clamp(0.0, 100.0) as u32
        } else {
            0
        };
        let label = if score >= 80 {
            ReliabilityLabel::High
        } else if score >= 50 {
            ReliabilityLabel::Medium
        } else {
            ReliabilityLabel::Low
        };
        Self { score, label }
    }

    /// What callers show when the counters are unreadable.
    pub fn unknown() -> Self {
        Self {
            score: 70,
            label: ReliabilityLabel::Medium,
        }
    }
}

/// Per-route reliability counters held in a cache hash with a one-hour
/// sliding TTL. Writers are fire-and-forget; reads degrade to
/// [`ReliabilityScore::unknown`].
pub struct ReliabilityTracker<C> {
    cache: Arc<C>,
}

impl<C> Clone for ReliabilityTracker<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<C: Cache> ReliabilityTracker<C> {
    pub fn new(cache: Arc<C>) -> Self {
        Self { cache }
    }

    pub async fn record_delay(&self, route_id: &str, minutes: f64) {
        if minutes.is_finite() && minutes > 0.0 {
            self.bump(route_id, DELAY_FIELD, minutes).await;
        }
    }

    pub async fn record_disconnect(&self, route_id: &str) {
        self.bump(route_id, DISCONNECT_FIELD, 1.0).await;
    }

    pub async fn record_high_congestion(&self, route_id: &str, minutes: f64) {
        if minutes.is_finite() && minutes > 0.0 {
            self.bump(route_id, HIGH_CONGESTION_FIELD, minutes).await;
        }
    }

    async fn bump(&self, route_id: &str, field: &str, delta: f64) {
        let key = keys::route_reliability(route_id);
        let result = async {
            self.cache.hincr_float(&key, field, delta).await?;
            self.cache
                .hset(&key, LAST_UPDATED_FIELD, &epoch_ms().to_string())
                .await?;
            self.cache.expire(&key, keys::RELIABILITY_TTL_SECS).await
        }
        .await;
        if let Err(why) = result {
            log::debug!("reliability write for route {route_id} skipped: {why}");
        }
    }

    pub async fn score(&self, route_id: &str) -> ReliabilityScore {
        let key = keys::route_reliability(route_id);
        let counters = match self.cache.hgetall(&key).await {
            Ok(counters) => counters,
            Err(why) => {
                log::debug!("reliability read for route {route_id} failed: {why}");
                return ReliabilityScore::unknown();
            }
        };
        let field = |name: &str| {
            counters
                .get(name)
                .and_then(|raw| raw.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        ReliabilityScore::from_counters(
            field(DELAY_FIELD),
            field(DISCONNECT_FIELD),
            field(HIGH_CONGESTION_FIELD),
        )
    }
}
