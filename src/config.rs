use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::DynProvider;
use crate::provider::anthropic_messages::AnthropicMessagesProvider;
use crate::provider::azure_openai::{self, AzureOpenAiProvider};
use crate::provider::openai_chat::OpenAiChatProvider;
use crate::provider::vertex_anthropic::auth::TokenCache;
use crate::provider::vertex_anthropic::{self, VertexAnthropicProvider};

/// 调用方提供的凭证映射 provider 名称到密钥或结构化凭证
///
/// # Examples
///
/// ```
/// use llm_relay::config::Credentials;
///
/// let creds: Credentials = serde_json::from_str(r#"{"openai": "sk-x"}"#).unwrap();
/// assert_eq!(creds.string("openai"), "sk-x");
/// assert_eq!(creds.string("anthropic"), "");
/// assert_eq!(creds.json("google_service_account_creds"), serde_json::json!({}));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(HashMap<String, Value>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖一个凭证
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// 字符串凭证 缺失或非字符串时返回空串
    pub fn string(&self, key: &str) -> String {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// 结构化凭证 缺失时返回空对象
    pub fn json(&self, key: &str) -> Value {
        self.0
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// 路由条目 别名到具体部署参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEntry {
    /// 调用方请求的逻辑模型名
    pub model_name: String,
    pub params: DeploymentParams,
}

/// 部署参数 `model` 可带 `azure/` 或 `vertex_ai/` 前缀
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentParams {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// 服务账号 JSON 文本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_credentials: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_location: Option<String>,
}

/// 供应商类型 由模型前缀推断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiChat,
    AzureOpenAi,
    AnthropicMessages,
    VertexAnthropic,
}

impl DeploymentParams {
    /// Splits the provider prefix off `model`.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::config::{DeploymentParams, ProviderKind};
    ///
    /// let params = DeploymentParams { model: "azure/gpt-4o".into(), ..Default::default() };
    /// assert_eq!(params.provider().unwrap(), (ProviderKind::AzureOpenAi, "gpt-4o"));
    /// ```
    pub fn provider(&self) -> Result<(ProviderKind, &str), LLMError> {
        match self.model.split_once('/') {
            Some(("azure", model)) => Ok((ProviderKind::AzureOpenAi, model)),
            Some(("vertex_ai", model)) => Ok((ProviderKind::VertexAnthropic, model)),
            Some(("anthropic", model)) => Ok((ProviderKind::AnthropicMessages, model)),
            Some(("openai", model)) => Ok((ProviderKind::OpenAiChat, model)),
            Some((prefix, _)) => Err(LLMError::InvalidConfig {
                field: "model".to_string(),
                reason: format!("unsupported provider prefix `{prefix}` in {}", self.model),
            }),
            None if self.model.starts_with("claude") => {
                Ok((ProviderKind::AnthropicMessages, self.model.as_str()))
            }
            None => Ok((ProviderKind::OpenAiChat, self.model.as_str())),
        }
    }
}

/// 构建目录时使用的部署常量
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub azure_api_version: String,
    pub vertex_location: String,
    /// 缺省时使用服务账号中的 project_id
    pub vertex_project: Option<String>,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            azure_api_version: azure_openai::DEFAULT_API_VERSION.to_string(),
            vertex_location: vertex_anthropic::DEFAULT_LOCATION.to_string(),
            vertex_project: None,
        }
    }
}

/// Latency-based routing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Latency samples older than this many seconds are ignored.
    pub ttl_secs: u64,
    /// Deployments within `lowest * (1 + buffer)` of the fastest one stay eligible.
    pub lowest_latency_buffer: f64,
    /// Samples kept per deployment.
    pub max_latency_samples: usize,
    /// Filter deployments by context window and capabilities before dispatch.
    pub enable_pre_call_checks: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 10,
            lowest_latency_buffer: 0.5,
            max_latency_samples: 10,
            enable_pre_call_checks: true,
        }
    }
}

impl RoutingConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// 缓存后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    Memory,
    Redis,
    Disabled,
}

impl FromStr for CacheBackendKind {
    type Err = LLMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => Err(LLMError::InvalidConfig {
                field: "cache.backend".to_string(),
                reason: format!("unknown cache backend `{other}`"),
            }),
        }
    }
}

/// Redis 连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "redis".to_string(),
            port: 6379,
            password: None,
        }
    }
}

impl RedisSettings {
    /// Connection URL understood by the redis client.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::config::RedisSettings;
    ///
    /// let mut settings = RedisSettings::default();
    /// assert_eq!(settings.url(), "redis://redis:6379/");
    /// settings.password = Some("s3cret".into());
    /// assert_eq!(settings.url(), "redis://:s3cret@redis:6379/");
    /// ```
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{password}@{}:{}/", self.host, self.port)
            }
            _ => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

/// Response cache and router coordination backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis: RedisSettings,
    /// Serve identical requests from the cache.
    pub cache_responses: bool,
    /// Lifetime of cached responses; `None` keeps them until evicted.
    pub response_ttl_secs: Option<u64>,
    /// Entry bound for the in-memory backend.
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: if cfg!(feature = "redis") {
                CacheBackendKind::Redis
            } else {
                CacheBackendKind::Memory
            },
            redis: RedisSettings::default(),
            cache_responses: true,
            response_ttl_secs: None,
            max_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn response_ttl(&self) -> Option<Duration> {
        self.response_ttl_secs.map(Duration::from_secs)
    }
}

/// 网关整体配置
///
/// # Examples
///
/// ```
/// use llm_relay::config::GatewayConfig;
///
/// let config = GatewayConfig::default();
/// assert_eq!(config.routing.ttl_secs, 10);
/// assert_eq!(config.catalog.vertex_location, "us-east5");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub catalog: CatalogSettings,
    pub routing: RoutingConfig,
    pub cache: CacheConfig,
}

impl GatewayConfig {
    /// Builds a configuration from defaults overridden by environment variables.
    ///
    /// Recognized variables: `LLM_RELAY_AZURE_API_VERSION`, `LLM_RELAY_VERTEX_LOCATION`,
    /// `LLM_RELAY_VERTEX_PROJECT`, `LLM_RELAY_ROUTING_TTL_SECS`,
    /// `LLM_RELAY_LATENCY_BUFFER`, `LLM_RELAY_PRE_CALL_CHECKS`, `LLM_RELAY_CACHE_BACKEND`,
    /// `LLM_RELAY_CACHE_RESPONSES`, `LLM_RELAY_CACHE_TTL_SECS`, `REDIS_HOST`,
    /// `REDIS_PORT`, `REDIS_PASSWORD`.
    pub fn from_env() -> Result<Self, LLMError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LLMError> {
        let mut config = Self::default();

        if let Some(value) = lookup("LLM_RELAY_AZURE_API_VERSION") {
            config.catalog.azure_api_version = value;
        }
        if let Some(value) = lookup("LLM_RELAY_VERTEX_LOCATION") {
            config.catalog.vertex_location = value;
        }
        if let Some(value) = lookup("LLM_RELAY_VERTEX_PROJECT") {
            config.catalog.vertex_project = Some(value);
        }
        if let Some(value) = lookup("LLM_RELAY_ROUTING_TTL_SECS") {
            config.routing.ttl_secs = parse_var("LLM_RELAY_ROUTING_TTL_SECS", &value)?;
        }
        if let Some(value) = lookup("LLM_RELAY_LATENCY_BUFFER") {
            config.routing.lowest_latency_buffer = parse_var("LLM_RELAY_LATENCY_BUFFER", &value)?;
        }
        if let Some(value) = lookup("LLM_RELAY_PRE_CALL_CHECKS") {
            config.routing.enable_pre_call_checks = parse_var("LLM_RELAY_PRE_CALL_CHECKS", &value)?;
        }
        if let Some(value) = lookup("LLM_RELAY_CACHE_BACKEND") {
            config.cache.backend = value.parse()?;
        }
        if let Some(value) = lookup("LLM_RELAY_CACHE_RESPONSES") {
            config.cache.cache_responses = parse_var("LLM_RELAY_CACHE_RESPONSES", &value)?;
        }
        if let Some(value) = lookup("LLM_RELAY_CACHE_TTL_SECS") {
            config.cache.response_ttl_secs = Some(parse_var("LLM_RELAY_CACHE_TTL_SECS", &value)?);
        }
        if let Some(value) = lookup("REDIS_HOST") {
            config.cache.redis.host = value;
        }
        if let Some(value) = lookup("REDIS_PORT") {
            config.cache.redis.port = parse_var("REDIS_PORT", &value)?;
        }
        if let Some(value) = lookup("REDIS_PASSWORD") {
            config.cache.redis.password = Some(value);
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the router or cache cannot work with.
    pub fn validate(&self) -> Result<(), LLMError> {
        let buffer = self.routing.lowest_latency_buffer;
        if !buffer.is_finite() || buffer < 0.0 {
            return Err(invalid(
                "routing.lowest_latency_buffer",
                "must be a finite non-negative number",
            ));
        }
        if self.routing.max_latency_samples == 0 {
            return Err(invalid("routing.max_latency_samples", "must be at least 1"));
        }
        if self.catalog.vertex_location.trim().is_empty() {
            return Err(invalid("catalog.vertex_location", "must not be empty"));
        }
        if self.cache.backend == CacheBackendKind::Redis {
            if !cfg!(feature = "redis") {
                return Err(invalid(
                    "cache.backend",
                    "redis backend requires the `redis` feature",
                ));
            }
            if self.cache.redis.host.trim().is_empty() {
                return Err(invalid("cache.redis.host", "must not be empty"));
            }
        }
        if self.cache.backend == CacheBackendKind::Memory && self.cache.max_capacity == 0 {
            return Err(invalid("cache.max_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> LLMError {
    LLMError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, LLMError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| LLMError::InvalidConfig {
        field: name.to_string(),
        reason: format!("cannot parse `{value}`: {err}"),
    })
}

/// 根据路由条目构建 Provider
///
/// 缺失的凭证不会在此处报错 只在真正调用时暴露。
pub fn build_provider_from_entry(
    entry: &RoutingEntry,
    transport: DynHttpTransport,
    tokens: &TokenCache,
) -> Result<DynProvider, LLMError> {
    let params = &entry.params;
    let (kind, model) = params.provider()?;
    let api_key = params.api_key.clone().unwrap_or_default();

    let provider: DynProvider = match kind {
        ProviderKind::OpenAiChat => {
            let mut provider =
                OpenAiChatProvider::new(transport, api_key).with_default_model(model);
            if let Some(base_url) = params.api_base.as_ref().filter(|b| !b.is_empty()) {
                provider = provider.with_base_url(base_url.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::AzureOpenAi => {
            let mut provider = AzureOpenAiProvider::new(
                transport,
                params.api_base.clone().unwrap_or_default(),
                api_key,
                model,
            );
            if let Some(version) = &params.api_version {
                provider = provider.with_api_version(version.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::AnthropicMessages => {
            let mut provider =
                AnthropicMessagesProvider::new(transport, api_key).with_default_model(model);
            if let Some(base_url) = params.api_base.as_ref().filter(|b| !b.is_empty()) {
                provider = provider.with_base_url(base_url.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::VertexAnthropic => {
            let mut provider = VertexAnthropicProvider::new(
                transport,
                params
                    .vertex_credentials
                    .clone()
                    .unwrap_or_else(|| "{}".to_string()),
                model,
            )
            .with_token_cache(tokens.clone());
            if let Some(project) = &params.vertex_project {
                provider = provider.with_project(project.clone());
            }
            if let Some(location) = &params.vertex_location {
                provider = provider.with_location(location.clone());
            }
            if let Some(base_url) = params.api_base.as_ref().filter(|b| !b.is_empty()) {
                provider = provider.with_base_url(base_url.clone());
            }
            Arc::new(provider)
        }
    };

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    fn entry(model: &str) -> RoutingEntry {
        RoutingEntry {
            model_name: "alias".to_string(),
            params: DeploymentParams {
                model: model.to_string(),
                api_key: Some("key".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn provider_kind_follows_model_prefix() {
        let cases = [
            ("gpt-4", ProviderKind::OpenAiChat, "gpt-4"),
            ("azure/gpt-4o", ProviderKind::AzureOpenAi, "gpt-4o"),
            (
                "vertex_ai/claude-3-5-sonnet-v2@20241022",
                ProviderKind::VertexAnthropic,
                "claude-3-5-sonnet-v2@20241022",
            ),
            (
                "claude-3-5-sonnet-20240620",
                ProviderKind::AnthropicMessages,
                "claude-3-5-sonnet-20240620",
            ),
        ];
        for (model, kind, bare) in cases {
            assert_eq!(entry(model).params.provider().unwrap(), (kind, bare));
        }
        assert!(matches!(
            entry("bedrock/claude").params.provider(),
            Err(LLMError::InvalidConfig { .. })
        ));
    }

    /// 所有前缀都能构建出对应 Provider
    #[test]
    fn build_provider_from_entry_supports_all_prefixes() {
        let transport = default_dyn_transport().expect("transport");
        let tokens = TokenCache::new();
        let names: Vec<&str> = [
            "gpt-4o",
            "azure/gpt-4o",
            "claude-3-5-sonnet-20240620",
            "vertex_ai/claude-3-5-sonnet-v2@20241022",
        ]
        .into_iter()
        .map(|model| {
            build_provider_from_entry(&entry(model), transport.clone(), &tokens)
                .expect("provider")
                .name()
        })
        .collect();
        assert_eq!(
            names,
            vec![
                "openai_chat",
                "azure_openai",
                "anthropic_messages",
                "vertex_anthropic"
            ]
        );
    }

    #[test]
    fn env_overrides_are_applied_and_validated() {
        let vars: HashMap<&str, &str> = [
            ("LLM_RELAY_CACHE_BACKEND", "memory"),
            ("LLM_RELAY_ROUTING_TTL_SECS", "30"),
            ("LLM_RELAY_VERTEX_PROJECT", "proj-1"),
            ("REDIS_PORT", "6380"),
            ("LLM_RELAY_CACHE_TTL_SECS", "120"),
        ]
        .into_iter()
        .collect();
        let config =
            GatewayConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert_eq!(config.routing.ttl(), Duration::from_secs(30));
        assert_eq!(config.catalog.vertex_project.as_deref(), Some("proj-1"));
        assert_eq!(config.cache.redis.port, 6380);
        assert_eq!(config.cache.response_ttl(), Some(Duration::from_secs(120)));

        let err = GatewayConfig::from_lookup(|name| {
            (name == "LLM_RELAY_LATENCY_BUFFER").then(|| "fast".to_string())
        })
        .unwrap_err();
        match err {
            LLMError::InvalidConfig { field, .. } => assert_eq!(field, "LLM_RELAY_LATENCY_BUFFER"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_negative_buffer() {
        let mut config = GatewayConfig::default();
        config.routing.lowest_latency_buffer = -1.0;
        assert!(matches!(
            config.validate(),
            Err(LLMError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn credentials_collect_from_pairs() {
        let creds: Credentials = [("openai", "sk-1"), ("azure", "az-1")].into_iter().collect();
        assert_eq!(creds.string("azure"), "az-1");
        let creds = creds.with("google_service_account_creds", serde_json::json!({"a": 1}));
        assert_eq!(creds.json("google_service_account_creds")["a"], 1);
        assert_eq!(creds.string("google_service_account_creds"), "");
    }
}
