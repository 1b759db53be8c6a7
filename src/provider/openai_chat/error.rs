use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{LLMError, classify_provider_error, unparsed_provider_error};

const NOT_FOUND_CODES: [&str; 2] = ["model_not_found", "DeploymentNotFound"];

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    /// OpenAI 使用字符串 部分兼容层返回数字
    #[serde(default)]
    code: Option<Value>,
}

/// Parses error responses returned by OpenAI-compatible Chat Completions endpoints.
///
/// `provider` is threaded through so Azure deployments report their own name.
pub(crate) fn parse_openai_error(
    provider: &'static str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    let Ok(ErrorEnvelope { error }) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return unparsed_provider_error(provider, status, body);
    };
    let code = error.code.and_then(|code| match code {
        Value::Null => None,
        Value::String(code) => Some(code),
        other => Some(other.to_string()),
    });
    classify_provider_error(
        provider,
        status,
        error.message.unwrap_or_else(|| "unknown error".to_string()),
        code,
        &NOT_FOUND_CODES,
        retry_after,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_auth_and_rate_limit_errors() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        match parse_openai_error("openai_chat", 401, body, None) {
            LLMError::Auth { message } => {
                assert!(message.contains("Incorrect API key provided"));
                assert!(message.contains("invalid_api_key"));
            }
            other => panic!("expected Auth error, got {other:?}"),
        }

        let body = r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#;
        match parse_openai_error("openai_chat", 429, body, Some(Duration::from_secs(7))) {
            LLMError::RateLimit {
                message,
                retry_after,
            } => {
                assert!(message.contains("Rate limit reached"));
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected RateLimit error, got {other:?}"),
        }
    }

    #[test]
    fn parse_context_length_and_missing_model() {
        let body = r#"{"error":{"message":"This model's maximum context length is 8192 tokens.","type":"invalid_request_error","code":"context_length_exceeded"}}"#;
        assert!(matches!(
            parse_openai_error("openai_chat", 400, body, None),
            LLMError::TokenLimitExceeded { .. }
        ));

        let body = r#"{"error":{"message":"The model `gpt-9` does not exist","type":"invalid_request_error","code":"model_not_found"}}"#;
        match parse_openai_error("openai_chat", 404, body, None) {
            LLMError::ModelNotFound { model, .. } => assert_eq!(model.as_deref(), Some("gpt-9")),
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn azure_missing_deployment_is_model_not_found() {
        let body = r#"{"error":{"code":"DeploymentNotFound","message":"The API deployment for this resource does not exist."}}"#;
        assert!(matches!(
            parse_openai_error("azure_openai", 404, body, None),
            LLMError::ModelNotFound { .. }
        ));
    }

    #[test]
    fn unparseable_body_falls_back_to_provider_error() {
        match parse_openai_error("azure_openai", 502, "<html>bad gateway</html>", None) {
            LLMError::Provider { provider, message } => {
                assert_eq!(provider, "azure_openai");
                assert!(message.starts_with("status 502:"));
            }
            other => panic!("expected Provider error, got {other:?}"),
        }
    }
}
