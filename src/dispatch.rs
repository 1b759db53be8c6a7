//! Completion entry points.
//!
//! [`router_completion`] routes an alias over the full model catalog and returns the
//! whole completion document as JSON text. [`direct_completion`] talks to OpenAI with
//! a raw key and returns only the first choice's text.

use std::time::Duration;

use tracing::debug;

use crate::config::{Credentials, GatewayConfig};
use crate::error::LLMError;
use crate::gateway::Gateway;
use crate::http::DynHttpTransport;
use crate::http::reqwest::default_dyn_transport;
use crate::provider::{LLMProvider, OpenAiChatProvider};
use crate::types::{ChatOptions, ChatRequest, Message, ResponseFormat, ToolDefinition};

/// Per-call generation parameters for the routed path.
///
/// Zero token limits, empty tool lists and empty response formats mean "unset";
/// [`CompletionParams::normalized`] applies that before a request is built.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_output_tokens: Option<u32>,
    pub response_format: Option<ResponseFormat>,
    pub tools: Vec<ToolDefinition>,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            timeout_secs: 600,
            max_output_tokens: None,
            response_format: None,
            tools: Vec::new(),
        }
    }
}

impl CompletionParams {
    /// Converts empty values to unset.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::dispatch::CompletionParams;
    /// use llm_relay::types::ResponseFormat;
    ///
    /// let params = CompletionParams {
    ///     max_output_tokens: Some(0),
    ///     response_format: Some(ResponseFormat::Custom(serde_json::json!({}))),
    ///     ..CompletionParams::default()
    /// }
    /// .normalized();
    /// assert_eq!(params.max_output_tokens, None);
    /// assert!(params.response_format.is_none());
    /// ```
    pub fn normalized(mut self) -> Self {
        self.max_output_tokens = self.max_output_tokens.filter(|tokens| *tokens > 0);
        self.response_format = self.response_format.filter(|format| !format.is_empty());
        self
    }

    pub(crate) fn into_request(self, messages: Vec<Message>) -> ChatRequest {
        let params = self.normalized();
        ChatRequest {
            options: ChatOptions {
                temperature: Some(params.temperature),
                max_output_tokens: params.max_output_tokens,
                timeout: timeout(params.timeout_secs),
                ..ChatOptions::default()
            },
            tools: params.tools,
            response_format: params.response_format,
            ..ChatRequest::new(messages)
        }
    }
}

fn timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Routes one completion through a freshly built gateway.
///
/// The transport, cache connection and router are rebuilt on every call; keep a
/// [`Gateway`] around to reuse them.
///
/// # Errors
///
/// Propagates configuration, cache-connection, routing and provider errors unchanged.
pub async fn router_completion(
    config: &GatewayConfig,
    creds: &Credentials,
    alias: &str,
    messages: Vec<Message>,
    params: CompletionParams,
) -> Result<String, LLMError> {
    let gateway = Gateway::new(config.clone())?;
    gateway.chat_completion(creds, alias, messages, params).await
}

/// Sends one request straight to OpenAI and returns the first choice's text.
///
/// No routing, retry or caching, and no normalization: `max_output_tokens` is sent as
/// given. A choice with null content yields `""`.
///
/// # Errors
///
/// Provider errors are returned unchanged; a response without choices is an
/// [`LLMError::Provider`].
pub async fn direct_completion(
    api_key: &str,
    model: &str,
    messages: Vec<Message>,
    temperature: f32,
    timeout_secs: u64,
    max_output_tokens: Option<u32>,
) -> Result<String, LLMError> {
    let transport = default_dyn_transport()?;
    direct_completion_with_transport(
        transport,
        api_key,
        model,
        messages,
        temperature,
        timeout_secs,
        max_output_tokens,
    )
    .await
}

/// [`direct_completion`] over a caller-supplied transport.
pub async fn direct_completion_with_transport(
    transport: DynHttpTransport,
    api_key: &str,
    model: &str,
    messages: Vec<Message>,
    temperature: f32,
    timeout_secs: u64,
    max_output_tokens: Option<u32>,
) -> Result<String, LLMError> {
    let provider = OpenAiChatProvider::new(transport, api_key).with_default_model(model);
    // 直连路径不做归一化 令牌上限原样发送
    let request = ChatRequest {
        options: ChatOptions {
            temperature: Some(temperature),
            max_output_tokens,
            timeout: timeout(timeout_secs),
            ..ChatOptions::default()
        },
        ..ChatRequest::new(messages)
    };

    debug!(model, "sending direct completion");
    let response = provider.chat(request).await?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LLMError::provider(provider.name(), "response contained no choices"))?;
    Ok(choice.message.content.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_values_become_unset() {
        let params = CompletionParams {
            max_output_tokens: Some(0),
            response_format: Some(ResponseFormat::Custom(serde_json::Value::Null)),
            ..CompletionParams::default()
        }
        .normalized();
        assert_eq!(params.max_output_tokens, None);
        assert!(params.response_format.is_none());

        let kept = CompletionParams {
            max_output_tokens: Some(256),
            response_format: Some(ResponseFormat::from_value(json!({"type": "json_object"}))),
            ..CompletionParams::default()
        }
        .normalized();
        assert_eq!(kept.max_output_tokens, Some(256));
        assert!(matches!(kept.response_format, Some(ResponseFormat::JsonObject)));
    }

    #[test]
    fn request_carries_sampling_and_timeout() {
        let request = CompletionParams {
            temperature: 0.3,
            timeout_secs: 45,
            max_output_tokens: Some(0),
            ..CompletionParams::default()
        }
        .into_request(vec![Message::user("hi")]);

        assert_eq!(request.options.temperature, Some(0.3));
        assert_eq!(request.options.timeout, Some(Duration::from_secs(45)));
        assert_eq!(request.options.max_output_tokens, None);
        assert!(request.options.model.is_none());
        assert!(request.tools.is_empty());

        let no_timeout = CompletionParams {
            timeout_secs: 0,
            ..CompletionParams::default()
        }
        .into_request(vec![Message::user("hi")]);
        assert_eq!(no_timeout.options.timeout, None);
    }
}
