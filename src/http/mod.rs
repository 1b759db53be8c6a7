//! 出站 HTTP 抽象
//!
//! Providers and the Vertex token exchange only ever POST, so the request model stays
//! small; tests swap in their own [`HttpTransport`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::LLMError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
}

/// 出站请求
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Whole-request deadline; `None` leaves only the client's connect timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    fn post(url: impl Into<String>, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), content_type.to_string())]),
            body: Some(body),
            timeout: None,
        }
    }

    /// POST with an already encoded JSON body.
    ///
    /// ```
    /// use llm_relay::http::HttpRequest;
    ///
    /// let url = "https://api.openai.com/v1/chat/completions";
    /// let request = HttpRequest::post_json(url, b"{}".to_vec());
    /// assert_eq!(request.headers["Content-Type"], "application/json");
    /// assert!(request.timeout.is_none());
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self::post(url, "application/json", body)
    }

    /// POST with `fields` form-urlencoded, as the OAuth token endpoint expects.
    ///
    /// ```
    /// use llm_relay::http::HttpRequest;
    ///
    /// let fields = [("a", "1 2"), ("b", "x&y")];
    /// let request = HttpRequest::post_form("https://oauth2.googleapis.com/token", &fields);
    /// assert_eq!(request.body.as_deref(), Some(&b"a=1+2&b=x%26y"[..]));
    /// ```
    pub fn post_form(url: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().copied())
            .finish();
        Self::post(url, "application/x-www-form-urlencoded", body.into_bytes())
    }

    /// Replaces every header, `Content-Type` included.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// 完整读取后的响应
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Body as UTF-8 text; invalid bytes are a [`LLMError::Transport`].
    pub fn into_string(self) -> Result<String, LLMError> {
        String::from_utf8(self.body)
            .map_err(|err| LLMError::transport(format!("response body is not UTF-8: {err}")))
    }

    /// Wait suggested by a numeric `Retry-After` header.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use llm_relay::http::HttpResponse;
    ///
    /// let response = HttpResponse {
    ///     status: 429,
    ///     headers: [("retry-after".to_string(), " 12 ".to_string())].into(),
    ///     body: Vec::new(),
    /// };
    /// assert_eq!(response.retry_after(), Some(Duration::from_secs(12)));
    /// ```
    pub fn retry_after(&self) -> Option<Duration> {
        // HTTP 日期格式不解析
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
            .and_then(|(_, value)| value.trim().parse().ok())
            .map(Duration::from_secs)
    }

    /// Whether the status code is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests for providers and the token exchange.
///
/// ```
/// # use async_trait::async_trait;
/// # use llm_relay::error::LLMError;
/// # use llm_relay::http::{HttpRequest, HttpResponse, HttpTransport};
/// /// Answers every call with the same completion document.
/// struct Canned(&'static str);
///
/// #[async_trait]
/// impl HttpTransport for Canned {
///     async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
///         Ok(HttpResponse { status: 200, headers: Default::default(), body: self.0.as_bytes().to_vec() })
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let response = Canned(r#"{"choices":[]}"#)
///     .send(HttpRequest::post_json("https://example.test", Vec::new()))
///     .await
///     .unwrap();
/// assert!(response.is_success());
/// # });
/// ```
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Resolves once the full body is read. Non-2xx statuses are not errors here;
    /// connection failures are [`LLMError::Transport`] and deadlines [`LLMError::Timeout`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError>;
}

pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Encodes `body` as JSON and POSTs it with `headers` and `timeout`.
///
/// An unencodable body is an [`LLMError::Validation`] and nothing is sent.
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<HttpResponse, LLMError> {
    let payload = serde_json::to_vec(body).map_err(|err| LLMError::Validation {
        message: format!("failed to encode request body: {err}"),
    })?;
    let request = HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_timeout(timeout);
    transport.send(request).await
}

pub mod reqwest;
