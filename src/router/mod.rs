//! 按别名路由的多部署调度器
//!
//! 每个别名对应一组部署（条目顺序即注册顺序）。一次调用依次经过：响应缓存、
//! 调用前检查、最低延迟选择、失败转移。

mod latency;
mod precheck;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cache::{DynCacheBackend, MemoryCache, response_cache_key};
use crate::config::{RoutingConfig, RoutingEntry, build_provider_from_entry};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::http::reqwest::default_dyn_transport;
use crate::provider::DynProvider;
use crate::provider::vertex_anthropic::auth::TokenCache;
use crate::types::{CapabilityDescriptor, ChatRequest, ChatResponse, ProviderType};

pub use latency::{FAILURE_PENALTY, LatencyTracker};

/// 单个部署
#[derive(Clone)]
pub struct Deployment {
    /// Stable identifier within the alias, `"{index}:{model}"`.
    pub id: String,
    pub alias: String,
    /// Model string as configured, provider prefix included.
    pub model: String,
    provider: DynProvider,
}

impl Deployment {
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    pub fn capabilities(&self) -> CapabilityDescriptor {
        self.provider.capabilities()
    }

    fn provider_type(&self) -> ProviderType {
        match self.provider.name() {
            "anthropic_messages" | "vertex_anthropic" => ProviderType::Anthropic,
            _ => ProviderType::OpenAI,
        }
    }
}

/// Routes completions for an alias across its deployments.
pub struct Router {
    deployments: HashMap<String, Vec<Deployment>>,
    latency: LatencyTracker,
    cache: Option<DynCacheBackend>,
    routing: RoutingConfig,
    cache_responses: bool,
    response_ttl: Option<Duration>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// 已注册的别名 按字母序
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.deployments.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// 别名下的部署 未注册时为空
    pub fn deployments(&self, alias: &str) -> &[Deployment] {
        self.deployments
            .get(alias)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Sends `request` to one deployment of `alias`.
    ///
    /// An identical earlier request is answered from the response cache. Otherwise the
    /// deployments that pass the pre-call checks are tried in latency order; a retryable
    /// failure moves on to the next one, and the last error is returned as is.
    ///
    /// # Errors
    ///
    /// - [`LLMError::ModelNotFound`] when no deployment is registered for `alias`.
    /// - [`LLMError::NoDeployment`] when the pre-call checks reject every deployment.
    /// - Whatever the last attempted provider returned.
    pub async fn completion(
        &self,
        alias: &str,
        mut request: ChatRequest,
    ) -> Result<ChatResponse, LLMError> {
        let deployments = self
            .deployments
            .get(alias)
            .filter(|list| !list.is_empty())
            .ok_or_else(|| LLMError::ModelNotFound {
                model: Some(alias.to_string()),
                message: format!("no deployments registered for alias `{alias}`"),
            })?;

        // 部署各自决定模型名
        request.options.model = None;

        let cache_key = self
            .response_cache()
            .map(|_| response_cache_key(alias, &request));
        if let Some(cached) = self.cached_response(alias, cache_key.as_deref()).await {
            return Ok(cached);
        }

        let candidates = self.eligible(alias, deployments, &request)?;
        let ids: Vec<&str> = candidates.iter().map(|d| d.id.as_str()).collect();
        let averages = self.latency.averages(alias).await;
        let order = self
            .latency
            .attempt_order(&ids, &averages, &mut rand::thread_rng());

        let mut last_error = None;
        for (attempt, idx) in order.iter().enumerate() {
            let deployment = candidates[*idx];
            debug!(alias, deployment = %deployment.id, attempt, "dispatching completion");

            let started = Instant::now();
            match deployment.provider.chat(request.clone()).await {
                Ok(mut response) => {
                    let completion_tokens = response.usage.as_ref().map(|u| u.completion_tokens);
                    self.latency
                        .record_success(alias, &deployment.id, started.elapsed(), completion_tokens)
                        .await;
                    response.provider.deployment = Some(format!("{alias}/{}", deployment.id));
                    response.provider.cache_hit = false;
                    self.store_response(alias, cache_key.as_deref(), &response)
                        .await;
                    return Ok(response);
                }
                Err(err) => {
                    let has_next = attempt + 1 < order.len();
                    if !err.is_retryable() || !has_next {
                        if err.is_retryable() {
                            self.latency.record_failure(alias, &deployment.id).await;
                        }
                        return Err(err);
                    }
                    warn!(
                        alias,
                        deployment = %deployment.id,
                        error = %err,
                        "deployment failed, trying next"
                    );
                    self.latency.record_failure(alias, &deployment.id).await;
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LLMError::NoDeployment {
            model: alias.to_string(),
            reason: "no deployment attempted".to_string(),
        }))
    }

    fn response_cache(&self) -> Option<&DynCacheBackend> {
        self.cache.as_ref().filter(|_| self.cache_responses)
    }

    fn eligible<'a>(
        &self,
        alias: &str,
        deployments: &'a [Deployment],
        request: &ChatRequest,
    ) -> Result<Vec<&'a Deployment>, LLMError> {
        if !self.routing.enable_pre_call_checks {
            return Ok(deployments.iter().collect());
        }

        let mut reasons = Vec::new();
        let eligible: Vec<&Deployment> = deployments
            .iter()
            .filter(|deployment| {
                match precheck::rejection_reason(
                    &deployment.capabilities(),
                    deployment.provider_type(),
                    request,
                ) {
                    Some(reason) => {
                        debug!(
                            alias,
                            deployment = %deployment.id,
                            %reason,
                            "pre-call check rejected deployment"
                        );
                        reasons.push(format!("{}: {reason}", deployment.id));
                        false
                    }
                    None => true,
                }
            })
            .collect();

        if eligible.is_empty() {
            return Err(LLMError::NoDeployment {
                model: alias.to_string(),
                reason: reasons.join("; "),
            });
        }
        Ok(eligible)
    }

    async fn cached_response(&self, alias: &str, key: Option<&str>) -> Option<ChatResponse> {
        let (cache, key) = (self.response_cache()?, key?);
        match cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<ChatResponse>(&raw) {
                Ok(mut response) => {
                    info!(alias, backend = cache.name(), "serving completion from cache");
                    response.provider.cache_hit = true;
                    Some(response)
                }
                Err(err) => {
                    warn!(alias, error = %err, "ignoring unreadable cached response");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(alias, error = %err, "response cache lookup failed");
                None
            }
        }
    }

    async fn store_response(&self, alias: &str, key: Option<&str>, response: &ChatResponse) {
        let (Some(cache), Some(key)) = (self.response_cache(), key) else {
            return;
        };
        let raw = match serde_json::to_string(response) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(alias, error = %err, "failed to encode response for cache");
                return;
            }
        };
        if let Err(err) = cache.set(key, raw, self.response_ttl).await {
            warn!(alias, error = %err, "failed to store response in cache");
        }
    }
}

/// Router 构建器
#[derive(Default)]
pub struct RouterBuilder {
    entries: Vec<RoutingEntry>,
    registered: Vec<(String, String, DynProvider)>,
    transport: Option<DynHttpTransport>,
    cache: Option<DynCacheBackend>,
    routing: RoutingConfig,
    cache_responses: bool,
    response_ttl: Option<Duration>,
    tokens: TokenCache,
}

impl RouterBuilder {
    /// 追加路由条目
    pub fn with_model_list(mut self, entries: impl IntoIterator<Item = RoutingEntry>) -> Self {
        self.entries.extend(entries);
        self
    }

    /// 直接注册一个部署 用于自定义 Provider
    pub fn register_deployment(
        mut self,
        alias: impl Into<String>,
        model: impl Into<String>,
        provider: DynProvider,
    ) -> Self {
        self.registered.push((alias.into(), model.into(), provider));
        self
    }

    /// 共享 HTTP 传输层 缺省时使用 reqwest
    pub fn with_transport(mut self, transport: DynHttpTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 缓存后端 同时用于响应缓存与延迟记录
    pub fn with_cache(mut self, cache: Option<DynCacheBackend>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    /// 开启响应缓存 `ttl = None` 表示不过期
    pub fn with_response_cache(mut self, enabled: bool, ttl: Option<Duration>) -> Self {
        self.cache_responses = enabled;
        self.response_ttl = ttl;
        self
    }

    /// 共享 Vertex 令牌缓存
    pub fn with_token_cache(mut self, tokens: TokenCache) -> Self {
        self.tokens = tokens;
        self
    }

    /// Builds providers for every entry.
    ///
    /// # Errors
    ///
    /// Fails on an unsupported model prefix, or when no transport was given and the
    /// default HTTP client cannot be created.
    pub fn build(self) -> Result<Router, LLMError> {
        let mut deployments: HashMap<String, Vec<Deployment>> = HashMap::new();

        if !self.entries.is_empty() {
            let transport = match self.transport {
                Some(transport) => transport,
                None => default_dyn_transport()?,
            };
            for entry in &self.entries {
                let provider = build_provider_from_entry(entry, transport.clone(), &self.tokens)?;
                push_deployment(
                    &mut deployments,
                    &entry.model_name,
                    &entry.params.model,
                    provider,
                );
            }
        }
        for (alias, model, provider) in self.registered {
            push_deployment(&mut deployments, &alias, &model, provider);
        }

        // 无共享后端时延迟只记录在本进程
        let latency_backend: DynCacheBackend = match &self.cache {
            Some(cache) => cache.clone(),
            None => Arc::new(MemoryCache::new(1_024)),
        };
        debug!(
            aliases = deployments.len(),
            shared_backend = self.cache.is_some(),
            "router built"
        );

        Ok(Router {
            deployments,
            latency: LatencyTracker::new(latency_backend, &self.routing),
            cache: self.cache,
            routing: self.routing,
            cache_responses: self.cache_responses,
            response_ttl: self.response_ttl,
        })
    }
}

fn push_deployment(
    deployments: &mut HashMap<String, Vec<Deployment>>,
    alias: &str,
    model: &str,
    provider: DynProvider,
) {
    let list = deployments.entry(alias.to_string()).or_default();
    list.push(Deployment {
        id: format!("{}:{model}", list.len()),
        alias: alias.to_string(),
        model: model.to_string(),
        provider,
    });
}
