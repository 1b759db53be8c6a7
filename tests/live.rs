use std::env;

use dotenvy::dotenv;
use llm_relay::config::{CacheBackendKind, Credentials, GatewayConfig};
use llm_relay::{CompletionParams, Message, direct_completion, router_completion};

fn load_env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[tokio::test]
#[ignore = "requires a valid OpenAI API key"]
async fn direct_completion_live() {
    let _ = dotenv();
    let Some(api_key) = load_env_var("OPENAI_API_KEY") else {
        eprintln!("skip live test: OPENAI_API_KEY missing");
        return;
    };
    let model = load_env_var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());

    let text = direct_completion(
        &api_key,
        &model,
        vec![
            Message::system("Answer with a single word."),
            Message::user("What colour is the sky on a clear day?"),
        ],
        0.0,
        60,
        Some(16),
    )
    .await
    .expect("direct completion should succeed");
    assert!(text.to_lowercase().contains("blue"), "unexpected answer: {text}");
}

#[tokio::test]
#[ignore = "requires a valid OpenAI API key"]
async fn router_completion_live() {
    let _ = dotenv();
    let Some(api_key) = load_env_var("OPENAI_API_KEY") else {
        eprintln!("skip live test: OPENAI_API_KEY missing");
        return;
    };

    // 未配置 REDIS_HOST 时退回进程内缓存
    let mut config = GatewayConfig::from_env().expect("config");
    if load_env_var("REDIS_HOST").is_none() {
        config.cache.backend = CacheBackendKind::Memory;
    }

    let raw = router_completion(
        &config,
        &Credentials::new().with("openai", api_key),
        "gpt-4o",
        vec![Message::user("Reply with the word ok.")],
        CompletionParams {
            temperature: 0.0,
            timeout_secs: 60,
            ..CompletionParams::default()
        },
    )
    .await
    .expect("routed completion should succeed");

    let document: serde_json::Value = serde_json::from_str(&raw).expect("json document");
    let content = document["choices"][0]["message"]["content"]
        .as_str()
        .expect("text content");
    assert!(content.to_lowercase().contains("ok"), "unexpected answer: {content}");
}
