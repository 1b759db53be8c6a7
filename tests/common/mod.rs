#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use llm_relay::LLMError;
use llm_relay::config::{CacheBackendKind, CacheConfig, GatewayConfig};
use llm_relay::http::{HttpRequest, HttpResponse, HttpTransport};
use serde_json::{Value, json};

/// 按 URL 片段返回预设响应 并记录所有请求
pub struct MockTransport {
    routes: Vec<(String, u16, Value)>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn route(mut self, url_fragment: &str, status: u16, body: Value) -> Self {
        self.routes.push((url_fragment.to_string(), status, body));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, url_fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.url.contains(url_fragment))
            .count()
    }

    pub fn last_json_body(&self, url_fragment: &str) -> Value {
        let request = self
            .requests()
            .into_iter()
            .rev()
            .find(|request| request.url.contains(url_fragment))
            .expect("request sent");
        serde_json::from_slice(request.body.as_deref().expect("body")).expect("json body")
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        let (status, body) = self
            .routes
            .iter()
            .find(|(fragment, _, _)| url.contains(fragment.as_str()))
            .map(|(_, status, body)| (*status, body.clone()))
            .unwrap_or_else(|| (404, json!({"error": {"message": format!("no route for {url}")}})));
        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: serde_json::to_vec(&body).unwrap(),
        })
    }
}

pub fn openai_completion(texts: &[&str]) -> Value {
    let choices: Vec<Value> = texts
        .iter()
        .enumerate()
        .map(|(index, text)| {
            json!({
                "index": index,
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            })
        })
        .collect();
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_730_000_000,
        "model": "gpt-4o-2024-08-06",
        "choices": choices,
        "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
    })
}

pub fn anthropic_message(text: &str) -> Value {
    json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "model": "claude-3-5-sonnet-v2-20241022",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 12, "output_tokens": 4}
    })
}

pub fn memory_gateway_config() -> GatewayConfig {
    GatewayConfig {
        cache: CacheConfig {
            backend: CacheBackendKind::Memory,
            ..CacheConfig::default()
        },
        ..GatewayConfig::default()
    }
}
