use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Cache, Result};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Sorted(Vec<(f64, String)>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process cache over the same trait as [`crate::RedisCache`]; used by
/// tests and by database-less bootstrap. Expiry is checked lazily on access
/// and `publish` only counts, since a single process has nothing to fan out
/// to over the wire.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    published: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: everything published so far, channel + payload.
    pub async fn published(&self) -> Vec<(String, String)> {
        self.published.lock().await.clone()
    }

    async fn with_entry<F, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce(Option<&mut Entry>) -> T,
    {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.expired(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }

    async fn upsert<F>(&self, key: &str, default: Value, f: F)
    where
        F: FnOnce(&mut Value),
    {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.expired(now)) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_owned()).or_insert(Entry {
            value: default,
            expires_at: None,
        });
        f(&mut entry.value);
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.upsert(key, Value::Sorted(Vec::new()), |value| {
            if let Value::Sorted(set) = value {
                set.retain(|(_, m)| m != member);
                let at = set
                    .iter()
                    .position(|(s, _)| *s > score)
                    .unwrap_or(set.len());
                set.insert(at, (score, member.to_owned()));
            }
        })
        .await;
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        Ok(self
            .with_entry(key, |entry| match entry.map(|e| &e.value) {
                Some(Value::Sorted(set)) => set
                    .iter()
                    .filter(|(score, _)| *score >= min && *score <= max)
                    .map(|(_, member)| member.clone())
                    .collect(),
                _ => Vec::new(),
            })
            .await)
    }

    async fn zrembyscore(&self, key: &str, min: f64, max: f64) -> Result<()> {
        self.with_entry(key, |entry| {
            if let Some(Value::Sorted(set)) = entry.map(|e| &mut e.value) {
                set.retain(|(score, _)| *score < min || *score > max);
            }
        })
        .await;
        Ok(())
    }

    async fn zrembyrank(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        self.with_entry(key, |entry| {
            if let Some(Value::Sorted(set)) = entry.map(|e| &mut e.value) {
                let len = set.len() as isize;
                let resolve = |i: isize| if i < 0 { len + i } else { i };
                let from = resolve(start).clamp(0, len);
                let to = (resolve(stop) + 1).clamp(0, len);
                if from < to {
                    set.drain(from as usize..to as usize);
                }
            }
        })
        .await;
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        Ok(self
            .with_entry(key, |entry| match entry.map(|e| &e.value) {
                Some(Value::Sorted(set)) => set.len(),
                _ => 0,
            })
            .await)
    }

    async fn hincr_float(&self, key: &str, field: &str, delta: f64) -> Result<()> {
        self.upsert(key, Value::Hash(HashMap::new()), |value| {
            if let Value::Hash(hash) = value {
                let current: f64 = hash
                    .get(field)
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(0.0);
                hash.insert(field.to_owned(), (current + delta).to_string());
            }
        })
        .await;
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.upsert(key, Value::Hash(HashMap::new()), |entry| {
            if let Value::Hash(hash) = entry {
                hash.insert(field.to_owned(), value.to_owned());
            }
        })
        .await;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .with_entry(key, |entry| match entry.map(|e| &e.value) {
                Some(Value::Hash(hash)) => hash.clone(),
                _ => HashMap::new(),
            })
            .await)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .with_entry(key, |entry| match entry.map(|e| &e.value) {
                Some(Value::Str(value)) => Some(value.clone()),
                _ => None,
            })
            .await)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.expired(now)) {
            entries.remove(key);
        }
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at: Some(now + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at =
                Some(Instant::now() + Duration::from_secs(ttl_secs.max(0) as u64));
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.published
            .lock()
            .await
            .push((channel.to_owned(), payload.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sorted_set_roundtrip() {
        let cache = MemoryCache::new();
        cache.zadd("k", "a", 1.0).await.unwrap();
        cache.zadd("k", "b", 2.0).await.unwrap();
        cache.zadd("k", "c", 3.0).await.unwrap();
        assert_eq!(cache.zcard("k").await.unwrap(), 3);
        assert_eq!(
            cache.zrangebyscore("k", 2.0, 3.0).await.unwrap(),
            vec!["b".to_owned(), "c".to_owned()]
        );
        cache.zrembyscore("k", 0.0, 1.5).await.unwrap();
        assert_eq!(cache.zcard("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn zrembyrank_keeps_newest() {
        let cache = MemoryCache::new();
        for i in 0..5 {
            cache.zadd("k", &format!("m{i}"), i as f64).await.unwrap();
        }
        // keep the newest 2 members
        cache.zrembyrank("k", 0, -3).await.unwrap();
        assert_eq!(
            cache.zrangebyscore("k", f64::MIN, f64::MAX).await.unwrap(),
            vec!["m3".to_owned(), "m4".to_owned()]
        );
    }

    #[tokio::test]
    async fn set_nx_semantics() {
        let cache = MemoryCache::new();
        assert!(cache.set_nx_ex("once", "1", 60).await.unwrap());
        assert!(!cache.set_nx_ex("once", "1", 60).await.unwrap());
    }

    #[tokio::test]
    async fn hash_counters() {
        let cache = MemoryCache::new();
        cache.hincr_float("h", "delay", 2.5).await.unwrap();
        cache.hincr_float("h", "delay", 1.5).await.unwrap();
        let all = cache.hgetall("h").await.unwrap();
        assert_eq!(all.get("delay").map(String::as_str), Some("4"));
    }
}
