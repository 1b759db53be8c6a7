use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{
    ChatRequest, ContentPart, Message, ResponseFormat, TextContent, ToolChoice, ToolDefinition,
    ToolResult,
};

/// Messages API 要求显式 max_tokens 调用方未设置时使用该值
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

/// 结构化输出借助强制调用该工具实现
pub(crate) const JSON_TOOL_NAME: &str = "json_tool_call";

/// 构建 Anthropic Messages 请求体
pub(crate) fn build_anthropic_body(request: &ChatRequest, model: &str) -> Result<Value, LLMError> {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));

    // 1. system 折叠为顶层 system，其余进入 messages
    let mut system_texts = Vec::new();
    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(text) = message.text() {
                    system_texts.push(text);
                }
            }
            _ => messages.push(convert_message(message)?),
        }
    }

    if messages.is_empty() {
        return Err(LLMError::Validation {
            message: "Anthropic Messages request requires at least one user/assistant message"
                .to_string(),
        });
    }
    body.insert("messages".to_string(), Value::Array(messages));

    if !system_texts.is_empty() {
        body.insert(
            "system".to_string(),
            Value::String(system_texts.join("\n\n")),
        );
    }

    // 2. 采样与生成控制参数
    let max_tokens = request
        .options
        .max_output_tokens
        .unwrap_or(DEFAULT_MAX_TOKENS);
    body.insert("max_tokens".to_string(), Value::from(max_tokens));
    if let Some(temperature) = request.options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }

    // 3. tools 与 tool_choice，结构化输出会追加一个强制工具
    let mut tools = convert_tools(&request.tools);
    let mut tool_choice = request.tool_choice.as_ref().and_then(convert_tool_choice);
    if let Some(format) = &request.response_format {
        if let Some(schema) = json_schema_for(format)? {
            tools.push(json!({
                "name": JSON_TOOL_NAME,
                "description": "Respond with a JSON object matching this schema.",
                "input_schema": schema
            }));
            tool_choice = Some(json!({ "type": "tool", "name": JSON_TOOL_NAME }));
        }
    }
    if !tools.is_empty() {
        body.insert("tools".to_string(), Value::Array(tools));
    }
    if let Some(choice) = tool_choice {
        body.insert("tool_choice".to_string(), choice);
    }

    // 4. 透传额外 provider 配置，例如 stop_sequences 等
    for (k, v) in &request.options.extra {
        body.insert(k.clone(), v.clone());
    }

    Ok(Value::Object(body))
}

/// Whether the request asks for JSON output that is emulated with [`JSON_TOOL_NAME`].
pub(crate) fn wants_json_tool(request: &ChatRequest) -> bool {
    matches!(
        request.response_format,
        Some(ResponseFormat::JsonObject | ResponseFormat::JsonSchema { .. })
    )
}

fn json_schema_for(format: &ResponseFormat) -> Result<Option<Value>, LLMError> {
    match format {
        ResponseFormat::Text => Ok(None),
        ResponseFormat::JsonObject => Ok(Some(json!({ "type": "object" }))),
        ResponseFormat::JsonSchema { json_schema } => Ok(Some(
            json_schema
                .get("schema")
                .cloned()
                .unwrap_or_else(|| json!({ "type": "object" })),
        )),
        ResponseFormat::Custom(_) if format.is_empty() => Ok(None),
        ResponseFormat::Custom(_) => Err(LLMError::UnsupportedFeature {
            feature: "anthropic_custom_response_format",
        }),
    }
}

fn convert_message(message: &Message) -> Result<Value, LLMError> {
    let mut obj = Map::new();

    // Anthropic 仅支持 user / assistant 角色，tool 结果以 user 身份回传
    let role = match message.role.as_str() {
        "assistant" => "assistant",
        _ => "user",
    };
    obj.insert("role".to_string(), Value::String(role.to_string()));

    let content_blocks: Vec<Value> = message.content.iter().map(convert_content_part).collect();
    if content_blocks.is_empty() {
        return Err(LLMError::Validation {
            message: "message must contain at least one content part".to_string(),
        });
    }

    obj.insert("content".to_string(), Value::Array(content_blocks));
    Ok(Value::Object(obj))
}

fn convert_content_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text(TextContent { text }) => json!({
            "type": "text",
            "text": text
        }),
        ContentPart::ToolCall(call) => json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.function.name,
            "input": call.arguments_value()
        }),
        ContentPart::ToolResult(ToolResult {
            call_id,
            output,
            is_error,
        }) => {
            let content_value = match output {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            json!({
                "type": "tool_result",
                "tool_use_id": call_id,
                "content": content_value,
                "is_error": is_error
            })
        }
        ContentPart::Data { data } => data.clone(),
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| json!({ "type": "object" }))
            })
        })
        .collect()
}

fn convert_tool_choice(choice: &ToolChoice) -> Option<Value> {
    match choice {
        ToolChoice::Auto => Some(json!({ "type": "auto" })),
        ToolChoice::Any => Some(json!({ "type": "any" })),
        ToolChoice::Tool { name } => Some(json!({ "type": "tool", "name": name })),
        // Anthropic Messages 未提供显式 "none" 选项 不设置 tool_choice
        ToolChoice::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatOptions, Role, ToolCall};

    #[test]
    fn build_body_with_basic_text_message() {
        let request = ChatRequest {
            options: ChatOptions {
                max_output_tokens: Some(256),
                temperature: Some(0.5),
                ..ChatOptions::default()
            },
            ..ChatRequest::new(vec![Message::user("Hello, Claude")])
        };

        let body = build_anthropic_body(&request, "claude-3-5-sonnet-20240620").expect("build");

        assert_eq!(body["model"], json!("claude-3-5-sonnet-20240620"));
        assert_eq!(body["max_tokens"], json!(256));
        assert_eq!(body["temperature"], json!(0.5));
        assert!(body.get("stream").is_none());

        let messages = body["messages"].as_array().expect("messages should be array");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], json!("user"));
        assert_eq!(
            messages[0]["content"][0],
            json!({ "type": "text", "text": "Hello, Claude" })
        );
    }

    #[test]
    fn fold_system_messages_and_default_max_tokens() {
        let request = ChatRequest::new(vec![
            Message::system("你是一个有帮助的助手。"),
            Message::new(Role("developer".to_string()), "请用简体中文回答。"),
            Message::user("你好！"),
        ]);

        let body = build_anthropic_body(&request, "claude-3-5-sonnet-20240620").expect("build");

        let system = body["system"].as_str().expect("system should be string");
        assert!(system.contains("你是一个有帮助的助手。"));
        assert!(system.contains("请用简体中文回答。"));
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["max_tokens"], json!(DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn only_system_messages_is_a_validation_error() {
        let request = ChatRequest::new(vec![Message::system("rules only")]);
        assert!(matches!(
            build_anthropic_body(&request, "claude-3-5-sonnet-20240620"),
            Err(LLMError::Validation { .. })
        ));
    }

    #[test]
    fn json_schema_format_forces_json_tool() {
        let request = ChatRequest {
            response_format: Some(ResponseFormat::JsonSchema {
                json_schema: json!({
                    "name": "answer",
                    "schema": {"type": "object", "properties": {"n": {"type": "integer"}}}
                }),
            }),
            ..ChatRequest::new(vec![Message::user("give me a number")])
        };
        assert!(wants_json_tool(&request));

        let body = build_anthropic_body(&request, "claude-3-5-sonnet-20240620").expect("build");
        let tools = body["tools"].as_array().expect("tools");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], json!(JSON_TOOL_NAME));
        assert_eq!(
            tools[0]["input_schema"]["properties"]["n"]["type"],
            json!("integer")
        );
        assert_eq!(
            body["tool_choice"],
            json!({ "type": "tool", "name": JSON_TOOL_NAME })
        );
    }

    #[test]
    fn tool_traffic_maps_to_tool_use_and_tool_result_blocks() {
        let request = ChatRequest::new(vec![
            Message::user("weather?"),
            Message {
                role: Role::assistant(),
                name: None,
                content: vec![ContentPart::ToolCall(ToolCall::function(
                    Some("toolu_1".into()),
                    "get_weather",
                    &json!({"city": "Paris"}),
                ))],
            },
            Message {
                role: Role::tool(),
                name: None,
                content: vec![ContentPart::ToolResult(ToolResult {
                    call_id: Some("toolu_1".into()),
                    output: json!("sunny"),
                    is_error: false,
                })],
            },
        ]);

        let body = build_anthropic_body(&request, "claude-3-5-sonnet-20240620").expect("build");
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages[1]["content"][0]["type"], json!("tool_use"));
        assert_eq!(messages[1]["content"][0]["input"]["city"], json!("Paris"));
        assert_eq!(messages[2]["role"], json!("user"));
        assert_eq!(messages[2]["content"][0]["tool_use_id"], json!("toolu_1"));
        assert_eq!(messages[2]["content"][0]["content"], json!("sunny"));
    }
}
