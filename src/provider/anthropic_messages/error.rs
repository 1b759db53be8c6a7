use std::time::Duration;

use serde::Deserialize;

use crate::error::{LLMError, classify_provider_error, unparsed_provider_error};

const NOT_FOUND_CODES: [&str; 2] = ["not_found", "not_found_error"];

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    /// Anthropic 的错误类别
    #[serde(default, rename = "type")]
    kind: Option<String>,
    /// Vertex 透传的 Google 错误状态
    #[serde(default)]
    status: Option<String>,
}

/// Parses error responses returned by the Anthropic Messages API, directly or via Vertex.
pub(crate) fn parse_anthropic_error(
    provider: &'static str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    let Ok(ErrorEnvelope { error }) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return unparsed_provider_error(provider, status, body);
    };
    classify_provider_error(
        provider,
        status,
        error.message.unwrap_or_else(|| "unknown error".to_string()),
        error.kind.or(error.status),
        &NOT_FOUND_CODES,
        retry_after,
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body(kind: &str, message: &str) -> String {
        json!({"type": "error", "error": {"type": kind, "message": message}}).to_string()
    }

    #[test]
    fn statuses_map_to_variants() {
        let cases = [
            (401, "authentication_error", "invalid x-api-key"),
            (403, "permission_error", "key lacks access"),
            (400, "invalid_request_error", "messages: field required"),
            (529, "overloaded_error", "Overloaded"),
        ];
        let kinds: Vec<&str> = cases
            .iter()
            .map(|(status, kind, message)| {
                let payload = body(kind, message);
                match parse_anthropic_error("anthropic_messages", *status, &payload, None) {
                    LLMError::Auth { message: m } => {
                        assert!(m.contains(message) && m.contains(kind), "{m}");
                        "auth"
                    }
                    LLMError::Validation { .. } => "validation",
                    LLMError::Provider { provider, message: m } => {
                        assert_eq!(provider, "anthropic_messages");
                        assert!(m.contains("Overloaded"));
                        "provider"
                    }
                    other => panic!("unexpected error: {other:?}"),
                }
            })
            .collect();
        assert_eq!(kinds, ["auth", "auth", "validation", "provider"]);
    }

    #[test]
    fn rate_limit_keeps_retry_after() {
        let err = parse_anthropic_error(
            "anthropic_messages",
            429,
            &body("rate_limit_error", "Number of request tokens has exceeded your rate limit"),
            Some(Duration::from_secs(2)),
        );
        assert!(matches!(
            err,
            LLMError::RateLimit { retry_after: Some(wait), .. } if wait == Duration::from_secs(2)
        ));
    }

    #[test]
    fn missing_model_and_oversized_prompt() {
        let err = parse_anthropic_error(
            "anthropic_messages",
            404,
            &body("not_found_error", "model: `claude-bogus`"),
            None,
        );
        assert!(matches!(
            err,
            LLMError::ModelNotFound { model: Some(ref m), .. } if m == "claude-bogus"
        ));

        let err = parse_anthropic_error(
            "anthropic_messages",
            400,
            &body("invalid_request_error", "prompt is too long: 210000 tokens > 200000 maximum"),
            None,
        );
        assert!(matches!(err, LLMError::TokenLimitExceeded { .. }));
    }

    #[test]
    fn vertex_google_errors_use_their_status() {
        let body = r#"{"error":{"code":403,"message":"Permission denied on resource project relay-test.","status":"PERMISSION_DENIED"}}"#;
        match parse_anthropic_error("vertex_anthropic", 403, body, None) {
            LLMError::Auth { message } => assert!(message.ends_with("(PERMISSION_DENIED)")),
            other => panic!("expected Auth error, got {other:?}"),
        }
    }

    #[test]
    fn non_json_body_keeps_status_and_text() {
        match parse_anthropic_error("vertex_anthropic", 500, "upstream connect error", None) {
            LLMError::Provider { provider, message } => {
                assert_eq!(provider, "vertex_anthropic");
                assert_eq!(message, "status 500: upstream connect error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
