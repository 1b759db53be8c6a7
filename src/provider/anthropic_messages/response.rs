use crate::error::LLMError;
use crate::types::{
    ChatResponse, Choice, ChoiceMessage, FinishReason, ProviderMetadata, Role, TokenUsage,
    ToolCall,
};

use super::request::JSON_TOOL_NAME;
use super::types::{AnthropicMessageResponse, AnthropicUsage, ContentBlock};

/// 将 Messages 响应映射为 completion 文档
///
/// `json_mode` 为真时 `json_tool_call` 的输入被还原为文本内容。
pub(crate) fn map_response(
    resp: AnthropicMessageResponse,
    provider: &'static str,
    endpoint: String,
    json_mode: bool,
) -> Result<ChatResponse, LLMError> {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut json_answered = false;

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                let input = if input.is_null() {
                    serde_json::json!({})
                } else {
                    input
                };
                if json_mode && name == JSON_TOOL_NAME {
                    json_answered = true;
                    texts.push(input.to_string());
                } else {
                    tool_calls.push(ToolCall::function(id, name, &input));
                }
            }
            ContentBlock::Other => {}
        }
    }

    let finish_reason = resp.stop_reason.as_deref().map(|reason| {
        if json_answered && reason == "tool_use" {
            FinishReason::Stop
        } else {
            convert_finish_reason(reason)
        }
    });

    // 结构化输出只保留工具给出的 JSON
    let content = if json_answered {
        texts.pop()
    } else if texts.is_empty() {
        None
    } else {
        Some(texts.join(""))
    };

    Ok(ChatResponse {
        id: resp.id.unwrap_or_default(),
        model: resp.model,
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: Role::assistant(),
                content,
                tool_calls,
            },
            finish_reason,
        }],
        usage: resp.usage.map(convert_usage),
        provider: ProviderMetadata {
            provider: provider.to_string(),
            endpoint: Some(endpoint),
            ..ProviderMetadata::default()
        },
        ..ChatResponse::empty("")
    })
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        other => FinishReason::Other(other.to_string()),
    }
}

pub(crate) fn convert_usage(usage: AnthropicUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
    }
}
