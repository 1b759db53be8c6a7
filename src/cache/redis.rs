use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use tracing::{debug, info};

use crate::config::RedisSettings;
use crate::error::LLMError;

use super::CacheBackend;

/// Redis backend over a multiplexed connection.
///
/// The connection is cloned per command; clones share one socket.
#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    /// Opens a client and establishes the multiplexed connection.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Cache`] if the URL is invalid or the server is unreachable.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, LLMError> {
        let url = settings.url();
        info!(host = %settings.host, port = settings.port, "connecting to redis cache backend");

        let client = Client::open(url.as_str())
            .map_err(|err| LLMError::cache(format!("invalid redis url: {err}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| {
                LLMError::cache(format!(
                    "failed to connect to redis at {}:{}: {err}",
                    settings.host, settings.port
                ))
            })?;

        debug!("redis cache backend connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, LLMError> {
        let mut conn = self.conn.clone();
        let result: RedisResult<Option<String>> = conn.get(key).await;
        result.map_err(|err| LLMError::cache(format!("redis GET {key} failed: {err}")))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), LLMError> {
        let mut conn = self.conn.clone();
        let result: RedisResult<()> = match ttl {
            // SETEX 以秒为单位 不足一秒按一秒
            Some(ttl) => conn.set_ex(key, value, ttl.as_secs().max(1)).await,
            None => conn.set(key, value).await,
        };
        result.map_err(|err| LLMError::cache(format!("redis SET {key} failed: {err}")))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
