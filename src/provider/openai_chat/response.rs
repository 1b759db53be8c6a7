use crate::error::LLMError;
use crate::types::{
    ChatResponse, Choice, ChoiceMessage, FunctionCall, ProviderMetadata, Role, TokenUsage,
    ToolCall,
};

use super::types::{OpenAiChatResponse, WireContent, WireMessage, WireToolCall, WireUsage};

/// 将 Chat Completions 响应映射为统一的 completion 文档
///
/// 除 `choices` 中的非函数工具调用外 其余字段原样保留。
pub(crate) fn map_response(
    resp: OpenAiChatResponse,
    provider: &'static str,
    endpoint: String,
) -> Result<ChatResponse, LLMError> {
    let choices = resp
        .choices
        .into_iter()
        .map(|choice| {
            Ok(Choice {
                index: choice.index,
                message: convert_message(choice.message, provider)?,
                finish_reason: choice.finish_reason.map(Into::into),
            })
        })
        .collect::<Result<Vec<_>, LLMError>>()?;

    let mut mapped = ChatResponse::empty(resp.model);
    if !resp.object.is_empty() {
        mapped.object = resp.object;
    }
    mapped.id = resp.id;
    mapped.created = resp.created;
    mapped.choices = choices;
    mapped.usage = resp.usage.map(convert_usage);
    mapped.provider = ProviderMetadata {
        provider: provider.to_string(),
        endpoint: Some(endpoint),
        ..ProviderMetadata::default()
    };
    Ok(mapped)
}

fn convert_message(
    message: WireMessage,
    provider: &'static str,
) -> Result<ChoiceMessage, LLMError> {
    let content = match message.content {
        Some(WireContent::Text(text)) => Some(text),
        Some(WireContent::Parts(parts)) => {
            let text: String = parts
                .into_iter()
                .filter(|part| part.kind == "text")
                .filter_map(|part| part.text)
                .collect();
            (!text.is_empty()).then_some(text)
        }
        None => message.refusal,
    };
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| convert_tool_call(call, provider))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ChoiceMessage {
        role: message.role.map(Role).unwrap_or_else(Role::assistant),
        content,
        tool_calls,
    })
}

pub(crate) fn convert_usage(usage: WireUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage
            .total_tokens
            .unwrap_or(usage.prompt_tokens + usage.completion_tokens),
    }
}

fn convert_tool_call(call: WireToolCall, provider: &'static str) -> Result<ToolCall, LLMError> {
    if call.kind != "function" {
        return Err(LLMError::provider(
            provider,
            format!("unsupported tool type {}", call.kind),
        ));
    }
    Ok(ToolCall {
        id: call.id,
        kind: call.kind,
        function: FunctionCall {
            name: call.function.name,
            arguments: call.function.arguments,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FinishReason;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> OpenAiChatResponse {
        serde_json::from_value(value).expect("valid fixture")
    }

    #[test]
    fn map_response_text_only() {
        let resp = parse(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello world"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }));
        let mapped = map_response(
            resp,
            "openai_chat",
            "https://api.openai.com/v1/chat/completions".into(),
        )
        .expect("map_response should succeed");

        assert_eq!(mapped.id, "chatcmpl-1");
        assert_eq!(mapped.model, "gpt-4o-2024-08-06");
        assert_eq!(mapped.first_text(), Some("hello world"));
        assert_eq!(mapped.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(mapped.provider.provider, "openai_chat");
        assert_eq!(
            mapped.provider.endpoint.as_deref(),
            Some("https://api.openai.com/v1/chat/completions")
        );
        let usage = mapped.usage.expect("usage should be present");
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn map_response_with_tool_calls_keeps_raw_arguments() {
        let resp = parse(json!({
            "id": "chatcmpl-2",
            "object": "chat.completion",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"location\":\"Boston, MA\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }));

        let mapped = map_response(resp, "openai_chat", "endpoint".into()).expect("map");
        let message = &mapped.choices[0].message;
        assert_eq!(message.content, None);
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].function.name, "get_weather");
        assert_eq!(
            message.tool_calls[0].arguments_value()["location"],
            json!("Boston, MA")
        );
        assert_eq!(
            mapped.choices[0].finish_reason,
            Some(FinishReason::ToolCalls)
        );
        assert_eq!(mapped.created, 0);
    }

    #[test]
    fn parts_content_is_joined_and_missing_total_is_derived() {
        let resp = parse(json!({
            "id": "x",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": [
                    {"type": "text", "text": "foo"},
                    {"type": "other", "blob": 1},
                    {"type": "text", "text": "bar"}
                ]},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 2, "completion_tokens": 3}
        }));
        let mapped = map_response(resp, "openai_chat", "endpoint".into()).expect("map");
        assert_eq!(mapped.first_text(), Some("foobar"));
        assert_eq!(mapped.object, "chat.completion");
        assert_eq!(mapped.usage.map(|u| u.total_tokens), Some(5));
    }

    #[test]
    fn refusal_fills_missing_content() {
        let resp = parse(json!({
            "id": "x",
            "model": "o1-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": null, "refusal": "I can't help with that.", "tool_calls": null},
                "finish_reason": "stop"
            }]
        }));
        let mapped = map_response(resp, "openai_chat", "endpoint".into()).expect("map");
        assert_eq!(mapped.first_text(), Some("I can't help with that."));
        assert!(mapped.choices[0].message.tool_calls.is_empty());
    }

    #[test]
    fn non_function_tool_call_is_rejected() {
        let resp = parse(json!({
            "id": "x",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "tool_calls": [{"id": "c", "type": "custom"}]},
                "finish_reason": "tool_calls"
            }]
        }));
        assert!(matches!(
            map_response(resp, "openai_chat", "endpoint".into()),
            Err(LLMError::Provider { .. })
        ));
    }
}
