use std::time::Duration;

use thiserror::Error;

/// 调用链路上的统一错误
///
/// Providers, the router and the cache backends all return this type, and the
/// dispatchers pass it to the caller as is.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Connection, DNS or body-decoding failure below the HTTP status level.
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("request timed out: {message}")]
    Timeout { message: String },
    /// 401/403, or credentials that could not be used at all.
    #[error("auth failure: {message}")]
    Auth { message: String },
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        /// From the `Retry-After` header.
        retry_after: Option<Duration>,
    },
    /// Prompt or completion larger than the model window.
    #[error("token limit exceeded: {message}")]
    TokenLimitExceeded {
        message: String,
        /// Our own estimate, when the router produced this error.
        estimated: Option<usize>,
        limit: Option<usize>,
    },
    /// The upstream rejected the request body.
    #[error("invalid request: {message}")]
    Validation { message: String },
    #[error("feature unsupported: {feature}")]
    UnsupportedFeature { feature: &'static str },
    /// Unknown routing alias, model id or Azure deployment.
    #[error("model not found: {message}")]
    ModelNotFound {
        /// Alias or model name, when one could be recovered.
        model: Option<String>,
        message: String,
    },
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
    /// Pre-call checks rejected every deployment of an alias.
    #[error("no deployment available for {model}: {reason}")]
    NoDeployment {
        model: String,
        /// One `"{deployment}: {reason}"` per rejected deployment, `; `-separated.
        reason: String,
    },
    #[error("cache backend error: {message}")]
    Cache { message: String },
    /// Anything a provider returned that fits no other variant, 5xx included.
    #[error("provider {provider} error: {message}")]
    Provider {
        /// `openai_chat`, `azure_openai`, `anthropic_messages` or `vertex_anthropic`.
        provider: &'static str,
        message: String,
    },
}

impl LLMError {
    /// 构造传输层错误
    ///
    /// ```
    /// use llm_relay::error::LLMError;
    ///
    /// let err = LLMError::transport("connection reset by peer");
    /// assert_eq!(err.to_string(), "transport error: connection reset by peer");
    /// ```
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// 构造供应商错误
    ///
    /// ```
    /// use llm_relay::error::LLMError;
    ///
    /// let err = LLMError::provider("azure_openai", "status 503: busy");
    /// assert!(err.is_retryable());
    /// ```
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Whether the router may move on to the next deployment of the same alias.
    ///
    /// Request-shaped failures (validation, token limit, unsupported feature) are final;
    /// failures tied to one deployment's endpoint, credentials or model are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation { .. }
                | Self::TokenLimitExceeded { .. }
                | Self::UnsupportedFeature { .. }
                | Self::NoDeployment { .. }
                | Self::Cache { .. }
        )
    }
}

/// Picks the variant for an error body a provider returned.
///
/// Token-limit hints win over the status code. `not_found_codes` lists the vendor codes
/// that mean an unknown model or deployment even when the status is not 404.
pub(crate) fn classify_provider_error(
    provider: &'static str,
    status: u16,
    message: String,
    code: Option<String>,
    not_found_codes: &[&str],
    retry_after: Option<Duration>,
) -> LLMError {
    let message = match &code {
        Some(code) => format!("{message} ({code})"),
        None => message,
    };
    let code = code.as_deref();

    if looks_like_token_limit_error(code, &message) {
        return LLMError::TokenLimitExceeded {
            message,
            estimated: None,
            limit: None,
        };
    }
    if status == 404 || code.is_some_and(|code| not_found_codes.contains(&code)) {
        return LLMError::ModelNotFound {
            model: extract_model_identifier(&message),
            message,
        };
    }
    match status {
        401 | 403 => LLMError::Auth { message },
        429 => LLMError::RateLimit {
            message,
            retry_after,
        },
        400 | 422 => LLMError::Validation { message },
        _ => LLMError::Provider { provider, message },
    }
}

/// Error for a non-2xx response whose body is not a recognizable error document.
pub(crate) fn unparsed_provider_error(provider: &'static str, status: u16, body: &str) -> LLMError {
    match status {
        401 | 403 => LLMError::Auth {
            message: format!("status {status}: {body}"),
        },
        429 => LLMError::RateLimit {
            message: format!("status {status}: {body}"),
            retry_after: None,
        },
        _ => LLMError::Provider {
            provider,
            message: format!("status {status}: {body}"),
        },
    }
}

fn looks_like_token_limit_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "context_length_exceeded"
                | "max_context_length_exceeded"
                | "prompt_tokens_exceeded"
                | "context_window_exceeded"
        ) {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 6] = [
        "context length",
        "context window",
        "token limit",
        "maximum output tokens",
        "max output tokens",
        "prompt is too long",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
}

/// First quoted token in the message, e.g. `` model `gpt-9` does not exist ``.
fn extract_model_identifier(message: &str) -> Option<String> {
    for delimiter in ['`', '"', '\''] {
        if let Some(value) = between_delimiters(message, delimiter) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn between_delimiters(message: &str, delimiter: char) -> Option<String> {
    let start = message.find(delimiter)? + delimiter.len_utf8();
    let rel_end = message[start..].find(delimiter)?;
    Some(message[start..start + rel_end].to_string())
}
