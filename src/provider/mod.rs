use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::LLMError;
use crate::http::HttpResponse;
use crate::types::{CapabilityDescriptor, ChatRequest, ChatResponse};

pub mod anthropic_messages;
pub mod azure_openai;
pub mod openai_chat;
pub mod vertex_anthropic;

pub use anthropic_messages::AnthropicMessagesProvider;
pub use azure_openai::AzureOpenAiProvider;
pub use openai_chat::OpenAiChatProvider;
pub use vertex_anthropic::VertexAnthropicProvider;

/// 统一的 Provider Trait 所有供应商实现该接口即可接入路由
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// 提交完整请求并等待完整响应
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError>;

    /// 描述当前模型支持的能力范围
    fn capabilities(&self) -> CapabilityDescriptor;

    /// 供应商名称
    fn name(&self) -> &'static str;
}

/// 线程安全 Provider
pub type DynProvider = Arc<dyn LLMProvider>;

/// Maps a non-2xx status and body to an error: `(provider, status, body, retry_after)`.
pub(crate) type ErrorParser = fn(&'static str, u16, &str, Option<Duration>) -> LLMError;

/// JSON 请求头 附带鉴权等额外头
pub(crate) fn json_headers<'a>(
    extra: impl IntoIterator<Item = (&'a str, String)>,
) -> HashMap<String, String> {
    let mut headers = HashMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Accept".to_string(), "application/json".to_string()),
    ]);
    headers.extend(extra.into_iter().map(|(name, value)| (name.to_string(), value)));
    headers
}

/// Checks the status and decodes the body; failures go through `parse_error`.
pub(crate) fn decode_response<T: DeserializeOwned>(
    provider: &'static str,
    response: HttpResponse,
    parse_error: ErrorParser,
) -> Result<T, LLMError> {
    let (status, success) = (response.status, response.is_success());
    let retry_after = response.retry_after();
    let text = response.into_string()?;
    if !success {
        return Err(parse_error(provider, status, &text, retry_after));
    }
    serde_json::from_str(&text).map_err(|err| {
        LLMError::provider(provider, format!("failed to parse response body: {err}"))
    })
}
