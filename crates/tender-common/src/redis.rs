/// Redis wrapper with graceful degradation.
///
/// All operations return `Option<T>` or `bool`: on any Redis error the operation logs a
/// warning and reports failure. The system is fully functional without Redis.
use std::collections::HashMap;

use redis::AsyncCommands;
use tracing::warn;

#[derive(Clone)]
pub struct RedisCache {
    client: Option<redis::Client>,
}

impl RedisCache {
    /// Attempt to create a client. If the URL is `None` or invalid, returns a `RedisCache`
    /// whose operations are all no-ops.
    pub fn new(url: Option<&str>) -> Self {
        let client = url.and_then(|u| {
            redis::Client::open(u)
                .inspect_err(|e| warn!(error = %e, url = u, "failed to create redis client, redis disabled"))
                .ok()
        });
        Self { client }
    }

    pub fn disabled() -> Self {
        Self { client: None }
    }

    /// Test the connection by sending a PING. Returns `true` if Redis is reachable.
    pub async fn is_available(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
                result.is_ok()
            }
            Err(_) => false,
        }
    }

    async fn connection(&self) -> Option<redis::aio::MultiplexedConnection> {
        let client = self.client.as_ref()?;
        client
            .get_multiplexed_async_connection()
            .await
            .inspect_err(|e| warn!(error = %e, "redis connection failed"))
            .ok()
    }

    /// Apply several hash increments in one round trip. Returns `true` if successful.
    pub async fn hincr_all(&self, key: &str, increments: &[(String, i64)]) -> bool {
        if increments.is_empty() {
            return true;
        }
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let mut pipe = redis::pipe();
        for (field, delta) in increments {
            pipe.hincr(key, field, *delta).ignore();
        }
        let result: redis::RedisResult<()> = pipe.query_async(&mut conn).await;
        result
            .inspect_err(|e| warn!(error = %e, key, "redis pipelined HINCRBY failed"))
            .is_ok()
    }

    /// Read every field of a hash. Returns `None` if Redis is unavailable.
    pub async fn hgetall(&self, key: &str) -> Option<HashMap<String, String>> {
        let mut conn = self.connection().await?;
        conn.hgetall(key)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis HGETALL failed"))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::RedisCache;

    #[tokio::test]
    async fn disabled_cache_degrades_to_noops() {
        let cache = RedisCache::new(None);
        assert!(!cache.is_available().await);
        assert!(!cache.hincr_all("k", &[("f".to_string(), 1)]).await);
        assert!(cache.hincr_all("k", &[]).await);
        assert!(cache.hgetall("k").await.is_none());
    }

    #[tokio::test]
    async fn invalid_url_disables_cache() {
        let cache = RedisCache::new(Some("not a redis url"));
        assert!(!cache.is_available().await);
    }
}
