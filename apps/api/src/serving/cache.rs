//! Prediction cache: the shared key-value cache consumed as a capability:
//! get / set-with-TTL-and-tags / invalidate-by-tag.
//!
//! Keys are `(model_id, feature_hash)`; every entry is tagged with its model id so a
//! deployment change can drop all cached scores of the affected models.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache entry is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("cache lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CachedScore {
    pub score: f64,
    pub confidence: f64,
}

pub fn prediction_key(model_id: Uuid, feature_hash: u64) -> String {
    format!("match:prediction:{model_id}:{feature_hash:016x}")
}

pub fn model_tag(model_id: Uuid) -> String {
    format!("match:model:{model_id}")
}

#[async_trait]
pub trait PredictionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration, tags: &[String]) -> Result<(), CacheError>;

    /// Drops every key carrying `tag`; returns how many were removed.
    async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError>;
}

/// Redis backend: values under their key with `EX`, tag membership in a Redis set.
#[derive(Clone)]
pub struct RedisPredictionCache {
    client: redis::Client,
}

impl RedisPredictionCache {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PredictionCache for RedisPredictionCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration, tags: &[String]) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let secs = ttl.as_secs().max(1);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(secs)
            .ignore();
        for tag in tags {
            pipe.cmd("SADD").arg(tag).arg(key).ignore();
            pipe.cmd("EXPIRE").arg(tag).arg(secs).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys = redis::cmd("SMEMBERS")
            .arg(tag)
            .query_async::<_, Vec<String>>(&mut conn)
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = redis::cmd("DEL")
            .arg(&keys)
            .query_async::<_, u64>(&mut conn)
            .await?;
        redis::cmd("DEL").arg(tag).query_async::<_, ()>(&mut conn).await?;
        Ok(removed)
    }
}

#[derive(Default)]
struct MemoryCacheState {
    entries: HashMap<String, (String, Instant)>,
    tags: HashMap<String, HashSet<String>>,
}

/// Process-local backend used when no Redis is configured for tests and single-node runs.
#[derive(Default)]
pub struct InMemoryPredictionCache {
    state: Mutex<MemoryCacheState>,
}

impl InMemoryPredictionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PredictionCache for InMemoryPredictionCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut state = self.state.lock().map_err(|_| CacheError::Poisoned)?;
        match state.entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                state.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration, tags: &[String]) -> Result<(), CacheError> {
        let mut state = self.state.lock().map_err(|_| CacheError::Poisoned)?;
        state
            .entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        for tag in tags {
            state
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let mut state = self.state.lock().map_err(|_| CacheError::Poisoned)?;
        let keys = state.tags.remove(tag).unwrap_or_default();
        let mut removed = 0;
        for key in keys {
            if state.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = InMemoryPredictionCache::new();
        cache
            .set("k", "v", Duration::from_secs(60), &["t".to_string()])
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let cache = InMemoryPredictionCache::new();
        cache.set("k", "v", Duration::from_millis(0), &[]).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_tag_drops_only_tagged_keys() {
        let cache = InMemoryPredictionCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("a", "1", ttl, &["m1".to_string()]).await.unwrap();
        cache.set("b", "2", ttl, &["m1".to_string()]).await.unwrap();
        cache.set("c", "3", ttl, &["m2".to_string()]).await.unwrap();

        assert_eq!(cache.invalidate_tag("m1").await.unwrap(), 2);
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("c").await.unwrap().as_deref(), Some("3"));
        assert_eq!(cache.invalidate_tag("m1").await.unwrap(), 0);
    }

    #[test]
    fn test_key_and_tag_formats() {
        let id = Uuid::nil();
        assert_eq!(
            prediction_key(id, 255),
            "match:prediction:00000000-0000-0000-0000-000000000000:00000000000000ff"
        );
        assert_eq!(model_tag(id), "match:model:00000000-0000-0000-0000-000000000000");
    }
}
