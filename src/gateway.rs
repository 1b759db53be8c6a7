use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::cache::{self, DynCacheBackend};
use crate::catalog::build_model_list;
use crate::config::{Credentials, GatewayConfig};
use crate::dispatch::CompletionParams;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::http::reqwest::default_dyn_transport;
use crate::provider::vertex_anthropic::auth::TokenCache;
use crate::router::Router;
use crate::types::{ChatRequest, ChatResponse, Message};

/// Long-lived entry point for routed completions.
///
/// Holds the HTTP transport, the Vertex token cache and the cache backend; the backend
/// connects on first use and is shared by every later call. Routers depend on the
/// caller's credentials and are still built per call.
pub struct Gateway {
    config: GatewayConfig,
    transport: DynHttpTransport,
    cache: OnceCell<Option<DynCacheBackend>>,
    tokens: TokenCache,
}

impl Gateway {
    /// 使用默认 reqwest 传输层创建网关
    pub fn new(config: GatewayConfig) -> Result<Self, LLMError> {
        Self::with_transport(config, default_dyn_transport()?)
    }

    /// 使用自定义传输层创建网关
    pub fn with_transport(
        config: GatewayConfig,
        transport: DynHttpTransport,
    ) -> Result<Self, LLMError> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            cache: OnceCell::new(),
            tokens: TokenCache::new(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Connects the cache backend on first call; `None` when caching is disabled.
    ///
    /// A failed connection is not remembered, so the next call tries again.
    pub async fn cache_backend(&self) -> Result<Option<DynCacheBackend>, LLMError> {
        self.cache
            .get_or_try_init(|| async {
                let backend = cache::connect(&self.config.cache).await?;
                if let Some(backend) = &backend {
                    info!(backend = backend.name(), "cache backend ready");
                }
                Ok::<_, LLMError>(backend)
            })
            .await
            .cloned()
    }

    /// Routes `request` for `alias` over the catalog built from `creds`.
    pub async fn completion(
        &self,
        creds: &Credentials,
        alias: &str,
        request: ChatRequest,
    ) -> Result<ChatResponse, LLMError> {
        let backend = self.cache_backend().await?;
        let router = Router::builder()
            .with_model_list(build_model_list(creds, &self.config.catalog))
            .with_transport(self.transport.clone())
            .with_cache(backend)
            .with_routing(self.config.routing.clone())
            .with_response_cache(
                self.config.cache.cache_responses,
                self.config.cache.response_ttl(),
            )
            .with_token_cache(self.tokens.clone())
            .build()?;

        debug!(alias, "routing completion");
        router.completion(alias, request).await
    }

    /// Routed completion returned as the serialized completion document.
    ///
    /// # Errors
    ///
    /// Unknown alias, credential, timeout and cache-connection failures are returned
    /// unchanged.
    pub async fn chat_completion(
        &self,
        creds: &Credentials,
        alias: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<String, LLMError> {
        let response = self
            .completion(creds, alias, params.into_request(messages))
            .await?;
        serde_json::to_string(&response).map_err(|err| {
            LLMError::provider(
                "router",
                format!("failed to serialize completion response: {err}"),
            )
        })
    }
}
