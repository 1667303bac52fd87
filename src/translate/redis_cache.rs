//! Redis-backed translation cache.
//! Values are the raw translated text, written with `SETEX`.
//! The connection manager reconnects in the background; calls on the request
//! path never retry and fail fast after the response timeout.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use tracing::{debug, warn};

use super::cache::{CacheError, CacheStore};
use super::normalize::CacheKey;
use crate::config::CacheConfig;

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    url: String,
}

impl RedisCache {
    /// Connect once and verify the server answers `PING`.
    /// The warm-up retry loop lives in `bootstrap`.
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let url = config.redis_url();
        let client = redis::Client::open(url.as_str()).map_err(unavailable)?;

        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(0)
            .set_connection_timeout(config.timeout)
            .set_response_timeout(config.timeout);

        let mut manager = ConnectionManager::new_with_config(client, manager_config)
            .await
            .map_err(unavailable)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(unavailable)?;
        debug!(reply = %pong, url = %url, "redis ping");
        Ok(Self { manager, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &CacheKey) -> Option<String> {
        let mut conn = self.manager.clone();
        let reply: redis::RedisResult<Option<String>> = conn.get(key.as_str()).await;
        match reply {
            // An empty cached value is treated as a miss.
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(error = %e, key = %key, "redis get failed, treating as miss");
                None
            }
        }
    }

    async fn set_with_expiry(
        &self,
        key: &CacheKey,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let reply: redis::RedisResult<()> =
            conn.set_ex(key.as_str(), value, ttl.as_secs().max(1)).await;
        reply.map_err(unavailable)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

fn unavailable(e: redis::RedisError) -> CacheError {
    CacheError::Unavailable(e.to_string())
}
