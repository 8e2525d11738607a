use std::collections::HashMap;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::{Cache, Result};

/// Redis-backed cache. The connection manager reconnects on its own; every
/// call simply surfaces the error and lets the caller's fire-and-forget
/// policy deal with it.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut connection = self.connection.clone();
        connection.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let mut connection = self.connection.clone();
        Ok(connection.zrangebyscore(key, min, max).await?)
    }

    async fn zrembyscore(&self, key: &str, min: f64, max: f64) -> Result<()> {
        let mut connection = self.connection.clone();
        connection.zrembyscore::<_, _, _, ()>(key, min, max).await?;
        Ok(())
    }

    async fn zrembyrank(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let mut connection = self.connection.clone();
        connection.zremrangebyrank::<_, ()>(key, start, stop).await?;
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let mut connection = self.connection.clone();
        Ok(connection.zcard(key).await?)
    }

    async fn hincr_float(&self, key: &str, field: &str, delta: f64) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("HINCRBYFLOAT")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        connection.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut connection = self.connection.clone();
        Ok(connection.hgetall(key).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        Ok(connection.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut connection = self.connection.clone();
        connection.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut connection = self.connection.clone();
        // SET key value NX EX ttl -- nil reply means the key already existed
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut connection)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        connection.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<()> {
        let mut connection = self.connection.clone();
        connection.expire::<_, ()>(key, ttl_secs).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        connection.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}
