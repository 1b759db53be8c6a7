//! Response cache and router coordination backends.
//!
//! The router stores both cached completions and latency samples through
//! [`CacheBackend`], so every router sharing a backend shares routing state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::{CacheBackendKind, CacheConfig};
use crate::error::LLMError;
use crate::types::ChatRequest;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

/// Key/value store with per-entry expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the stored value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, LLMError>;

    /// Stores a value; `ttl = None` keeps it until evicted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), LLMError>;

    /// 后端名称 用于日志
    fn name(&self) -> &'static str;
}

/// 线程安全缓存后端
pub type DynCacheBackend = Arc<dyn CacheBackend>;

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// In-process backend built on moka.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use llm_relay::cache::{CacheBackend, MemoryCache};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let cache = MemoryCache::new(100);
/// cache.set("k", "v".to_string(), Some(Duration::from_secs(60))).await.unwrap();
/// assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
/// # });
/// ```
#[derive(Clone)]
pub struct MemoryCache {
    inner: Cache<String, Entry>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, LLMError> {
        Ok(self.inner.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), LLMError> {
        self.inner.insert(key.to_string(), Entry { value, ttl }).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Connects the configured backend; `Disabled` yields `None`.
///
/// # Errors
///
/// Returns [`LLMError::Cache`] when the Redis server cannot be reached.
pub async fn connect(config: &CacheConfig) -> Result<Option<DynCacheBackend>, LLMError> {
    match config.backend {
        CacheBackendKind::Disabled => Ok(None),
        CacheBackendKind::Memory => {
            info!(max_capacity = config.max_capacity, "using in-memory cache backend");
            Ok(Some(Arc::new(MemoryCache::new(config.max_capacity))))
        }
        #[cfg(feature = "redis")]
        CacheBackendKind::Redis => {
            let cache = RedisCache::connect(&config.redis).await?;
            Ok(Some(Arc::new(cache)))
        }
        #[cfg(not(feature = "redis"))]
        CacheBackendKind::Redis => Err(LLMError::InvalidConfig {
            field: "cache.backend".to_string(),
            reason: "redis backend requires the `redis` feature".to_string(),
        }),
    }
}

/// Cache key for a routed completion.
///
/// Covers every field that changes the answer; the timeout and target model are left
/// out because the router fills the model in per deployment.
pub fn response_cache_key(alias: &str, request: &ChatRequest) -> String {
    let material = json!({
        "model": alias,
        "messages": request.messages,
        "temperature": request.options.temperature,
        "max_output_tokens": request.options.max_output_tokens,
        "response_format": request.response_format,
        "tools": request.tools,
        "tool_choice": request.tool_choice,
        "extra": request.options.extra,
    });
    let digest = Sha256::digest(material.to_string().as_bytes());
    format!("llm_relay:response:{}", hex::encode(digest))
}
