use std::sync::Arc;

use cache::{keys, Cache};

/// Per-route sliding-window speed samples, cache-resident. Capped at
/// [`Self::MAX_SAMPLES`] per route with a 15-minute key TTL; each write also
/// trims samples older than the 10-minute retention window.
pub struct SpeedMemory<C> {
    cache: Arc<C>,
}

impl<C> Clone for SpeedMemory<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<C: Cache> SpeedMemory<C> {
    pub const MAX_SAMPLES: usize = 200;
    pub const RETENTION_MS: i64 = 10 * 60 * 1000;
    /// The ETA engine reads a 5-minute window.
    pub const ETA_WINDOW_MS: i64 = 5 * 60 * 1000;

    pub fn new(cache: Arc<C>) -> Self {
        Self { cache }
    }

    /// Fire-and-forget sample write. Cache failures are logged and dropped.
    pub async fn record(&self, route_id: &str, speed_kmh: f64, now_ms: i64) {
        if !speed_kmh.is_finite() || speed_kmh < 0.0 {
            return;
        }
        let key = keys::route_speed(route_id);
        let member = format!("{speed_kmh:.1}:{now_ms}");
        let result = async {
            self.cache.zadd(&key, &member, now_ms as f64).await?;
            self.cache
                .zrembyscore(&key, 0.0, (now_ms - Self::RETENTION_MS) as f64)
                .await?;
            self.cache
                .zrembyrank(&key, 0, -(Self::MAX_SAMPLES as isize + 1))
                .await?;
            self.cache.expire(&key, keys::SPEED_SAMPLE_TTL_SECS).await
        }
        .await;
        if let Err(why) = result {
            log::debug!("speed sample write for route {route_id} skipped: {why}");
        }
    }

    /// Average speed over the trailing `window_ms`, with the sample count.
    /// `None` when the cache is unreachable or the window is empty.
    pub async fn windowed_average(
        &self,
        route_id: &str,
        window_ms: i64,
        now_ms: i64,
    ) -> Option<(f64, usize)> {
        let key = keys::route_speed(route_id);
        let members = match self
            .cache
            .zrangebyscore(&key, (now_ms - window_ms) as f64, now_ms as f64)
            .await
        {
            Ok(members) => members,
            Err(why) => {
                log::debug!("speed window read for route {route_id} failed: {why}");
                return None;
            }
        };
        let speeds: Vec<f64> = members
            .iter()
            .filter_map(|member| member.split(':').next())
            .filter_map(|raw| raw.parse::<f64>().ok())
            .filter(|speed| speed.is_finite())
            .collect();
        if speeds.is_empty() {
            return None;
        }
        let average = speeds.iter().sum::<f64>() / speeds.len() as f64;
        Some((average, speeds.len()))
    }
}

#[cfg(test)]
mod tests {
    use cache::MemoryCache;

    use super::*;

    #[tokio::test]
    async fn window_average_and_count() {
        let memory = SpeedMemory::new(Arc::new(MemoryCache::new()));
        let now = 1_000_000;
        memory.record("r1", 20.0, now - 60_000).await;
        memory.record("r1", 30.0, now - 30_000).await;
        memory.record("r1", 40.0, now).await;

        let (average, count) = memory
            .windowed_average("r1", SpeedMemory::<MemoryCache>::ETA_WINDOW_MS, now)
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert!((average - 30.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn old_samples_fall_out_of_window() {
        let memory = SpeedMemory::new(Arc::new(MemoryCache::new()));
        let now = 20 * 60 * 1000;
        memory.record("r1", 50.0, now - 8 * 60 * 1000).await;
        memory.record("r1", 20.0, now).await;

        let (average, count) = memory
            .windowed_average("r1", SpeedMemory::<MemoryCache>::ETA_WINDOW_MS, now)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!((average - 20.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn rejects_garbage_samples() {
        let memory = SpeedMemory::new(Arc::new(MemoryCache::new()));
        memory.record("r1", f64::NAN, 1000).await;
        memory.record("r1", -5.0, 1000).await;
        assert!(memory.windowed_average("r1", 300_000, 1000).await.is_none());
    }
}
