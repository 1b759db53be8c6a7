use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::trace;

use crate::error::LLMError;

use super::{DynHttpTransport, HttpMethod, HttpRequest, HttpResponse, HttpTransport};

const USER_AGENT: &str = concat!("llm-relay/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// reqwest 传输层 连接池由 Client 内部维护 可在多个 Provider 间共享
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client with a crate user agent and a connect timeout; request deadlines come
    /// from each [`HttpRequest`].
    pub fn default_client() -> Result<Self, LLMError> {
        Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map(Self::new)
            .map_err(|err| LLMError::transport(format!("failed to create reqwest client: {err}")))
    }
}

fn header_map(headers: impl IntoIterator<Item = (String, String)>) -> Result<HeaderMap, LLMError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| LLMError::transport(format!("invalid header name {name}: {err}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|err| LLMError::transport(format!("invalid header value for {name}: {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn classify(err: reqwest::Error) -> LLMError {
    if err.is_timeout() {
        LLMError::Timeout {
            message: err.to_string(),
        }
    } else if err.is_connect() {
        LLMError::transport(format!("connection failed: {err}"))
    } else {
        LLMError::transport(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let method = match request.method {
            HttpMethod::Post => Method::POST,
        };
        trace!(%method, url = %request.url, "sending http request");

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(header_map(request.headers)?);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(classify)?.to_vec();
        trace!(status, bytes = body.len(), "received http response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// 默认共享传输层
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
