use std::collections::HashMap;

use async_trait::async_trait;

pub mod keys;
pub mod memory;
pub mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache unavailable")]
    Unavailable,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// The key-value / pubsub surface the core consumes: sorted sets for speed
/// samples, hashes for reliability counters, expiring strings for plan
/// results and dedupe keys, and channel publish for horizontal fanout.
///
/// Every caller treats failures here as transient: log, continue, never
/// propagate. Only the implementations return errors.
#[async_trait]
pub trait Cache: Send + Sync + 'static {
    // -- sorted sets ---------------------------------------------------------

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>>;

    async fn zrembyscore(&self, key: &str, min: f64, max: f64) -> Result<()>;

    /// Remove by rank range; `(0, -(cap+1))` keeps the newest `cap` members.
    async fn zrembyrank(&self, key: &str, start: isize, stop: isize) -> Result<()>;

    async fn zcard(&self, key: &str) -> Result<usize>;

    // -- hashes --------------------------------------------------------------

    async fn hincr_float(&self, key: &str, field: &str, delta: f64) -> Result<()>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    // -- strings -------------------------------------------------------------

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Set-if-absent with TTL. Returns `true` when this call created the key.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<()>;

    // -- expiry / pubsub -----------------------------------------------------

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<()>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}
