//! Azure OpenAI 部署接入
//!
//! 复用 OpenAI Chat 的请求体与响应映射，仅替换 endpoint、鉴权头与 api-version。

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_with_headers};
use crate::provider::openai_chat::request::{build_openai_body, is_reasoning_model};
use crate::provider::openai_chat::response::map_response;
use crate::provider::openai_chat::{
    OpenAiChatResponse, openai_model_capabilities, parse_openai_error,
};
use crate::provider::{LLMProvider, decode_response, json_headers};
use crate::types::{CapabilityDescriptor, ChatRequest, ChatResponse};

pub const DEFAULT_API_VERSION: &str = "2024-08-01-preview";

/// Azure OpenAI Provider 绑定单个部署
pub struct AzureOpenAiProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) api_base: String,
    pub(crate) api_key: String,
    pub(crate) api_version: String,
    pub(crate) deployment: String,
}

impl AzureOpenAiProvider {
    /// 创建 Provider `deployment` 同时作为上报的模型名
    pub fn new(
        transport: DynHttpTransport,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            api_base: api_base.into(),
            api_key: api_key.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            deployment: deployment.into(),
        }
    }

    /// 自定义 api-version
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!(
            "{base}/openai/deployments/{}/chat/completions?api-version={}",
            self.deployment, self.api_version
        )
    }

    fn build_request_body(&self, request: &ChatRequest) -> Result<Value, LLMError> {
        if self.api_base.trim().is_empty() {
            return Err(LLMError::InvalidConfig {
                field: "api_base".to_string(),
                reason: format!("azure deployment {} has no endpoint", self.deployment),
            });
        }
        let mut body = build_openai_body(request, &self.deployment)?;
        if let Some(obj) = body.as_object_mut() {
            // 部署由 URL 决定
            obj.remove("model");
            if !is_reasoning_model(&self.deployment) {
                if let Some(max_tokens) = obj.remove("max_completion_tokens") {
                    obj.insert("max_tokens".to_string(), max_tokens);
                }
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl LLMProvider for AzureOpenAiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let body = self.build_request_body(&request)?;
        let endpoint = self.endpoint();
        debug!(%endpoint, deployment = %self.deployment, "sending azure chat completion request");

        let response = post_json_with_headers(
            self.transport.as_ref(),
            endpoint.as_str(),
            json_headers([("api-key", self.api_key.clone())]),
            &body,
            request.options.timeout,
        )
        .await?;
        let parsed: OpenAiChatResponse =
            decode_response(self.name(), response, parse_openai_error)?;
        map_response(parsed, self.name(), endpoint)
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        openai_model_capabilities(&self.deployment)
    }

    fn name(&self) -> &'static str {
        "azure_openai"
    }
}
