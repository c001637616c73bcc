//! Key/value store abstraction backing the tracker.
//!
//! The tracker is written against a narrow trait rather than the `redis`
//! crate directly so that unit tests can run against an in-process fake
//! without a live Redis instance.

use async_trait::async_trait;
use chrono::Duration;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::TrackerResult;

/// The handful of Redis primitives the tracker needs: strings with TTL,
/// an integer counter, a set (membership index), a sorted set (retry
/// candidates), and a hash (per-day metrics).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> TrackerResult<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> TrackerResult<()>;
    async fn del(&self, key: &str) -> TrackerResult<()>;
    async fn incr_by(&self, key: &str, delta: i64) -> TrackerResult<i64>;
    async fn expire(&self, key: &str, ttl: Duration) -> TrackerResult<()>;

    async fn sadd(&self, key: &str, member: &str) -> TrackerResult<()>;
    async fn srem(&self, key: &str, member: &str) -> TrackerResult<()>;
    async fn smembers(&self, key: &str) -> TrackerResult<Vec<String>>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> TrackerResult<()>;
    async fn zrem(&self, key: &str, member: &str) -> TrackerResult<()>;
    async fn zrangebyscore(&self, key: &str, max_score: f64, limit: usize) -> TrackerResult<Vec<String>>;

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> TrackerResult<i64>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> TrackerResult<()>;
    async fn hgetall(&self, key: &str) -> TrackerResult<HashMap<String, String>>;
}

/// Production store backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> TrackerResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> TrackerResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> TrackerResult<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.num_seconds().max(1) as u64;
        conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> TrackerResult<()> {
        let mut conn = self.conn.clone();
        conn.del(key).await?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> TrackerResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, delta).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> TrackerResult<()> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl.num_seconds().max(1)).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> TrackerResult<()> {
        let mut conn = self.conn.clone();
        conn.sadd(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> TrackerResult<()> {
        let mut conn = self.conn.clone();
        conn.srem(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> TrackerResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> TrackerResult<()> {
        let mut conn = self.conn.clone();
        conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> TrackerResult<()> {
        let mut conn = self.conn.clone();
        conn.zrem(key, member).await?;
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, max_score: f64, limit: usize) -> TrackerResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max_score)
            .arg("LIMIT")
            .arg(0)
            .arg(limit as i64)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> TrackerResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr(key, field, delta).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> TrackerResult<()> {
        let mut conn = self.conn.clone();
        conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> TrackerResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }
}

/// In-memory fake used by unit tests and by callers that want to exercise
/// the tracker's algorithmic logic without a Redis instance.
#[derive(Default)]
pub struct InMemoryStore {
    strings: Mutex<HashMap<String, String>>,
    sets: Mutex<HashMap<String, std::collections::HashSet<String>>>,
    zsets: Mutex<HashMap<String, Vec<(String, f64)>>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> TrackerResult<Option<String>> {
        Ok(self.strings.lock().unwrap().get(key).cloned())
    }

    async fn set_ex(&self, key: &str, value: &str, _ttl: Duration) -> TrackerResult<()> {
        self.strings.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> TrackerResult<()> {
        self.strings.lock().unwrap().remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> TrackerResult<i64> {
        let mut strings = self.strings.lock().unwrap();
        let current: i64 = strings.get(key).and_then(|v| v.parse().ok()).unwrap_or(0);
        let updated = current + delta;
        strings.insert(key.to_string(), updated.to_string());
        Ok(updated)
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> TrackerResult<()> {
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> TrackerResult<()> {
        self.sets
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> TrackerResult<()> {
        if let Some(set) = self.sets.lock().unwrap().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> TrackerResult<Vec<String>> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> TrackerResult<()> {
        let mut zsets = self.zsets.lock().unwrap();
        let entries = zsets.entry(key.to_string()).or_default();
        entries.retain(|(m, _)| m != member);
        entries.push((member.to_string(), score));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> TrackerResult<()> {
        if let Some(entries) = self.zsets.lock().unwrap().get_mut(key) {
            entries.retain(|(m, _)| m != member);
        }
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, max_score: f64, limit: usize) -> TrackerResult<Vec<String>> {
        let zsets = self.zsets.lock().unwrap();
        let mut entries = zsets.get(key).cloned().unwrap_or_default();
        entries.retain(|(_, score)| *score <= max_score);
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(entries.into_iter().take(limit).map(|(m, _)| m).collect())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> TrackerResult<i64> {
        let mut hashes = self.hashes.lock().unwrap();
        let hash = hashes.entry(key.to_string()).or_default();
        let current: i64 = hash.get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
        let updated = current + delta;
        hash.insert(field.to_string(), updated.to_string());
        Ok(updated)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> TrackerResult<()> {
        self.hashes
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> TrackerResult<HashMap<String, String>> {
        Ok(self.hashes.lock().unwrap().get(key).cloned().unwrap_or_default())
    }
}
