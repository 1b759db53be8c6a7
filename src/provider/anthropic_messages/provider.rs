use async_trait::async_trait;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_with_headers};
use crate::provider::{LLMProvider, decode_response, json_headers};
use crate::types::{CapabilityDescriptor, ChatRequest, ChatResponse};

use super::error::parse_anthropic_error;
use super::request::{build_anthropic_body, wants_json_tool};
use super::response::map_response;
use super::types::AnthropicMessageResponse;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub(crate) const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages Provider
pub struct AnthropicMessagesProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) default_model: Option<String>,
}

impl AnthropicMessagesProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            default_model: None,
        }
    }

    /// 自定义 base_url 便于接入代理
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
        format!("{base}/v1/messages")
    }
}

#[async_trait]
impl LLMProvider for AnthropicMessagesProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let model = request
            .options
            .model
            .as_ref()
            .or(self.default_model.as_ref())
            .ok_or_else(|| LLMError::Validation {
                message: "model is required for Anthropic Messages".to_string(),
            })?;
        let body = build_anthropic_body(&request, model)?;
        let endpoint = self.endpoint();
        debug!(%endpoint, %model, "sending messages request");

        let headers = json_headers([
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ]);
        let response = post_json_with_headers(
            self.transport.as_ref(),
            endpoint.as_str(),
            headers,
            &body,
            request.options.timeout,
        )
        .await?;
        let parsed: AnthropicMessageResponse =
            decode_response(self.name(), response, parse_anthropic_error)?;
        map_response(parsed, self.name(), endpoint, wants_json_tool(&request))
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        claude_model_capabilities(self.default_model.as_deref().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "anthropic_messages"
    }
}

/// Claude 3.x 能力描述 结构化输出通过强制工具调用模拟
pub fn claude_model_capabilities(_model: &str) -> CapabilityDescriptor {
    CapabilityDescriptor {
        supports_tools: true,
        supports_structured_output: true,
        supports_system_messages: true,
        context_window: Some(200_000),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use serde_json::{Value, json};

    use super::*;
    use crate::http::{HttpRequest, HttpResponse, HttpTransport};
    use crate::types::Message;

    struct CannedTransport {
        status: u16,
        body: Value,
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpTransport for CannedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
            self.seen.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: self.status,
                headers: HashMap::new(),
                body: self.body.to_string().into_bytes(),
            })
        }
    }

    fn transport(status: u16, body: Value) -> Arc<CannedTransport> {
        Arc::new(CannedTransport {
            status,
            body,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn sends_api_key_and_version_headers() {
        let transport = transport(
            200,
            json!({
                "id": "msg_1",
                "model": "claude-3-5-sonnet-20240620",
                "content": [{"type": "text", "text": "hi"}],
                "stop_reason": "end_turn"
            }),
        );
        let provider = AnthropicMessagesProvider::new(transport.clone(), "sk-ant")
            .with_default_model("claude-3-5-sonnet-20240620");

        let response = provider
            .chat(ChatRequest::new(vec![Message::user("hello")]))
            .await
            .expect("chat");
        assert_eq!(response.first_text(), Some("hi"));

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].url, "https://api.anthropic.com/v1/messages");
        assert_eq!(seen[0].headers["x-api-key"], "sk-ant");
        assert_eq!(seen[0].headers["anthropic-version"], "2023-06-01");
        let body: Value = serde_json::from_slice(seen[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body["model"], json!("claude-3-5-sonnet-20240620"));
    }

    #[tokio::test]
    async fn invalid_key_is_an_auth_error() {
        let transport = transport(
            401,
            json!({"type": "error", "error": {"type": "authentication_error", "message": "invalid x-api-key"}}),
        );
        let provider = AnthropicMessagesProvider::new(transport, "")
            .with_default_model("claude-3-5-sonnet-20240620");

        let err = provider
            .chat(ChatRequest::new(vec![Message::user("hello")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::Auth { .. }), "{err:?}");
    }
}
