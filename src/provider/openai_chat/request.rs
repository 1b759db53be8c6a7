use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{
    ChatRequest, ContentPart, Message, ResponseFormat, TextContent, ToolCall, ToolChoice,
    ToolDefinition,
};

/// 构建 Chat Completions 请求体
pub(crate) fn build_openai_body(request: &ChatRequest, model: &str) -> Result<Value, LLMError> {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        Value::Array(convert_messages(&request.messages, model)?),
    );

    // o1 系列只接受默认采样温度
    if let Some(temperature) = request.options.temperature {
        if !is_reasoning_model(model) {
            body.insert("temperature".to_string(), Value::from(temperature));
        }
    }
    if let Some(max_tokens) = request.options.max_output_tokens {
        body.insert("max_completion_tokens".to_string(), Value::from(max_tokens));
    }
    if !request.tools.is_empty() {
        body.insert("tools".to_string(), Value::Array(convert_tools(&request.tools)));
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("tool_choice".to_string(), convert_tool_choice(choice));
    }
    if let Some(format) = &request.response_format {
        body.insert(
            "response_format".to_string(),
            convert_response_format(format),
        );
    }
    for (k, v) in &request.options.extra {
        body.insert(k.clone(), v.clone());
    }
    Ok(Value::Object(body))
}

/// o1 family models reject `temperature` and treat system prompts differently.
pub(crate) fn is_reasoning_model(model: &str) -> bool {
    model == "o1" || model.starts_with("o1-")
}

fn system_role_for(model: &str) -> &'static str {
    match model {
        "o1" => "developer",
        m if is_reasoning_model(m) => "user",
        _ => "system",
    }
}

fn convert_messages(messages: &[Message], model: &str) -> Result<Vec<Value>, LLMError> {
    let system_role = system_role_for(model);
    messages
        .iter()
        .map(|message| convert_message(message, system_role))
        .collect()
}

fn convert_message(message: &Message, system_role: &str) -> Result<Value, LLMError> {
    let mut obj = Map::new();
    let role = match message.role.as_str() {
        "system" => system_role,
        other => other,
    };
    obj.insert("role".to_string(), Value::String(role.to_string()));
    if let Some(name) = &message.name {
        obj.insert("name".to_string(), Value::String(name.clone()));
    }

    let mut content_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for part in &message.content {
        match part {
            ContentPart::ToolCall(call) => tool_calls.push(convert_tool_call(call)),
            ContentPart::ToolResult(result) => tool_results.push(result),
            ContentPart::Text(TextContent { text }) => {
                content_parts.push(json!({"type": "text", "text": text}))
            }
            ContentPart::Data { data } => content_parts.push(data.clone()),
        }
    }

    if message.role.as_str() == "tool" {
        if tool_results.len() > 1 {
            return Err(LLMError::Validation {
                message: "tool role expects a single ToolResult content".to_string(),
            });
        }
        if let Some(result) = tool_results.first() {
            let content_string = match &result.output {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            obj.insert(
                "tool_call_id".to_string(),
                Value::String(result.call_id.clone().ok_or_else(|| LLMError::Validation {
                    message: "tool message missing call_id".to_string(),
                })?),
            );
            obj.insert("content".to_string(), Value::String(content_string));
        } else {
            obj.insert("content".to_string(), collapse_content(content_parts));
        }
    } else {
        obj.insert("content".to_string(), collapse_content(content_parts));
        if !tool_calls.is_empty() {
            obj.insert("tool_calls".to_string(), Value::Array(tool_calls));
        }
    }

    Ok(Value::Object(obj))
}

/// 纯文本内容折叠为字符串 兼容不接受 parts 数组的模型
fn collapse_content(parts: Vec<Value>) -> Value {
    if parts.is_empty() {
        return Value::Null;
    }
    let all_text = parts
        .iter()
        .all(|part| part.get("type").and_then(Value::as_str) == Some("text"));
    if all_text {
        let text = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        Value::String(text)
    } else {
        Value::Array(parts)
    }
}

fn convert_tool_call(call: &ToolCall) -> Value {
    let mut obj = Map::new();
    if let Some(id) = &call.id {
        obj.insert("id".to_string(), Value::String(id.clone()));
    }
    obj.insert("type".to_string(), Value::String("function".to_string()));
    obj.insert(
        "function".to_string(),
        json!({
            "name": call.function.name,
            "arguments": call.function.arguments
        }),
    );
    Value::Object(obj)
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema
                }
            })
        })
        .collect()
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".to_string()),
        ToolChoice::Any => Value::String("required".to_string()),
        ToolChoice::None => Value::String("none".to_string()),
        ToolChoice::Tool { name } => json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

fn convert_response_format(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::Text => json!({ "type": "text" }),
        ResponseFormat::JsonObject => json!({ "type": "json_object" }),
        ResponseFormat::JsonSchema { json_schema } => {
            json!({ "type": "json_schema", "json_schema": json_schema })
        }
        ResponseFormat::Custom(value) => value.clone(),
    }
}
