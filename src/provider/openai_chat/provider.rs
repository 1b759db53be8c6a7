use async_trait::async_trait;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_with_headers};
use crate::provider::{LLMProvider, decode_response, json_headers};
use crate::types::{CapabilityDescriptor, ChatRequest, ChatResponse};

use super::error::parse_openai_error;
use super::request::build_openai_body;
use super::response::map_response;
use super::types::OpenAiChatResponse;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI Chat Completions Provider
///
/// 模型取自请求 `options.model`，为空时使用 `default_model`。
pub struct OpenAiChatProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) default_model: Option<String>,
}

impl OpenAiChatProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            default_model: None,
        }
    }

    /// 自定义 base_url 可带或不带 `/v1`
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{base}/v1/chat/completions")
    }

    fn resolve_model(&self, request: &ChatRequest) -> Result<String, LLMError> {
        request
            .options
            .model
            .as_ref()
            .or(self.default_model.as_ref())
            .cloned()
            .ok_or_else(|| LLMError::Validation {
                message: "model is required for OpenAI Chat".to_string(),
            })
    }
}

#[async_trait]
impl LLMProvider for OpenAiChatProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_openai_body(&request, &model)?;
        let endpoint = self.endpoint();
        debug!(%endpoint, %model, "sending chat completion request");

        let headers = json_headers([("Authorization", format!("Bearer {}", self.api_key))]);
        let response = post_json_with_headers(
            self.transport.as_ref(),
            endpoint.as_str(),
            headers,
            &body,
            request.options.timeout,
        )
        .await?;
        let parsed: OpenAiChatResponse =
            decode_response(self.name(), response, parse_openai_error)?;
        map_response(parsed, self.name(), endpoint)
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        openai_model_capabilities(self.default_model.as_deref().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "openai_chat"
    }
}

/// Capabilities of the OpenAI chat models the catalog routes to.
///
/// Unknown models are assumed to be current-generation chat models.
///
/// # Examples
///
/// ```
/// use llm_relay::provider::openai_chat::openai_model_capabilities;
///
/// assert_eq!(openai_model_capabilities("gpt-4").context_window, Some(8_192));
/// assert!(!openai_model_capabilities("o1-mini").supports_tools);
/// ```
pub fn openai_model_capabilities(model: &str) -> CapabilityDescriptor {
    match model {
        "gpt-4" => CapabilityDescriptor {
            supports_tools: true,
            supports_structured_output: false,
            supports_system_messages: true,
            context_window: Some(8_192),
        },
        "o1" => CapabilityDescriptor {
            supports_tools: true,
            supports_structured_output: true,
            supports_system_messages: true,
            context_window: Some(200_000),
        },
        "o1-preview" | "o1-mini" => CapabilityDescriptor {
            supports_tools: false,
            supports_structured_output: false,
            supports_system_messages: false,
            context_window: Some(128_000),
        },
        _ => CapabilityDescriptor {
            supports_tools: true,
            supports_structured_output: true,
            supports_system_messages: true,
            context_window: Some(128_000),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    fn provider(base_url: &str) -> OpenAiChatProvider {
        OpenAiChatProvider::new(default_dyn_transport().expect("transport"), "sk")
            .with_base_url(base_url)
    }

    #[test]
    fn endpoint_accepts_base_with_or_without_version() {
        for base in ["https://proxy.local", "https://proxy.local/", "https://proxy.local/v1"] {
            assert_eq!(
                provider(base).endpoint(),
                "https://proxy.local/v1/chat/completions"
            );
        }
    }

    #[test]
    fn request_model_overrides_default() {
        let provider = provider("https://api.openai.com").with_default_model("gpt-4o");
        let mut request = ChatRequest::new(Vec::new());
        assert_eq!(provider.resolve_model(&request).unwrap(), "gpt-4o");
        request.options.model = Some("o1".into());
        assert_eq!(provider.resolve_model(&request).unwrap(), "o1");
    }

    #[test]
    fn capabilities_follow_default_model() {
        let provider = provider("https://api.openai.com").with_default_model("o1-preview");
        let caps = provider.capabilities();
        assert!(!caps.supports_tools);
        assert!(!caps.supports_system_messages);
        assert_eq!(caps.context_window, Some(128_000));
    }
}
