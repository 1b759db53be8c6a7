//! Vertex AI 上的 Claude 接入
//!
//! 请求体与 Anthropic Messages 一致，去掉 `model` 字段并加上 `anthropic_version`，
//! 模型与区域编码在 rawPredict URL 中。

pub mod auth;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_with_headers};
use crate::provider::{LLMProvider, decode_response, json_headers};
use crate::provider::anthropic_messages::request::{build_anthropic_body, wants_json_tool};
use crate::provider::anthropic_messages::response::map_response;
use crate::provider::anthropic_messages::{
    AnthropicMessageResponse, claude_model_capabilities, parse_anthropic_error,
};
use crate::types::{CapabilityDescriptor, ChatRequest, ChatResponse};

use self::auth::{ServiceAccountKey, TokenCache};

pub const DEFAULT_LOCATION: &str = "us-east5";
const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

/// Claude on Vertex AI Provider
pub struct VertexAnthropicProvider {
    pub(crate) transport: DynHttpTransport,
    /// 服务账号 JSON 文本 调用时才解析
    pub(crate) credentials: String,
    pub(crate) model: String,
    pub(crate) project: Option<String>,
    pub(crate) location: String,
    pub(crate) base_url: Option<String>,
    pub(crate) tokens: TokenCache,
}

impl VertexAnthropicProvider {
    /// 创建 Provider `model` 为不带 `vertex_ai/` 前缀的 Claude 模型名
    pub fn new(
        transport: DynHttpTransport,
        credentials: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            credentials: credentials.into(),
            model: model.into(),
            project: None,
            location: DEFAULT_LOCATION.to_string(),
            base_url: None,
            tokens: TokenCache::new(),
        }
    }

    /// 指定 GCP 项目 缺省时使用服务账号中的 project_id
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// 指定区域
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// 覆盖 `https://{location}-aiplatform.googleapis.com`
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// 共享令牌缓存
    pub fn with_token_cache(mut self, tokens: TokenCache) -> Self {
        self.tokens = tokens;
        self
    }

    pub(crate) fn endpoint(&self, project: &str) -> String {
        let base = match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com", self.location),
        };
        format!(
            "{base}/v1/projects/{project}/locations/{}/publishers/anthropic/models/{}:rawPredict",
            self.location, self.model
        )
    }

    fn resolve_project(&self, key: &ServiceAccountKey) -> Result<String, LLMError> {
        self.project
            .clone()
            .filter(|project| !project.is_empty())
            .or_else(|| key.project_id.clone())
            .ok_or_else(|| LLMError::InvalidConfig {
                field: "vertex_project".to_string(),
                reason: "no project configured and none found in service account".to_string(),
            })
    }

    fn build_request_body(&self, request: &ChatRequest) -> Result<Value, LLMError> {
        let mut body = build_anthropic_body(request, &self.model)?;
        if let Some(obj) = body.as_object_mut() {
            obj.remove("model");
            obj.insert(
                "anthropic_version".to_string(),
                Value::String(VERTEX_ANTHROPIC_VERSION.to_string()),
            );
        }
        Ok(body)
    }
}

#[async_trait]
impl LLMProvider for VertexAnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let body = self.build_request_body(&request)?;
        let key = ServiceAccountKey::from_json(&self.credentials)?;
        let project = self.resolve_project(&key)?;
        let token = self
            .tokens
            .access_token(self.transport.as_ref(), &key)
            .await?;

        let endpoint = self.endpoint(&project);
        debug!(%endpoint, model = %self.model, "sending vertex rawPredict request");
        let response = post_json_with_headers(
            self.transport.as_ref(),
            endpoint.as_str(),
            json_headers([("Authorization", format!("Bearer {token}"))]),
            &body,
            request.options.timeout,
        )
        .await?;
        let parsed: AnthropicMessageResponse =
            decode_response(self.name(), response, parse_anthropic_error)?;
        map_response(parsed, self.name(), endpoint, wants_json_tool(&request))
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        claude_model_capabilities(&self.model)
    }

    fn name(&self) -> &'static str {
        "vertex_anthropic"
    }
}
