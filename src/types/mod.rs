//! 请求与响应的统一数据模型
//!
//! Each provider translates [`ChatRequest`] into its own wire body. Every provider maps
//! its reply into [`ChatResponse`], which serializes as an OpenAI Chat Completions
//! document whichever vendor answered.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `system`, `user`, `assistant` or `tool`; kept as a string so unknown roles pass through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn user() -> Self {
        Self("user".to_string())
    }

    pub fn assistant() -> Self {
        Self("assistant".to_string())
    }

    pub fn tool() -> Self {
        Self("tool".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 一条对话消息
///
/// ```
/// use llm_relay::types::{Message, Role};
///
/// let msg = Message::system("Reply in French.");
/// assert_eq!(msg.role, Role::system());
/// assert_eq!(msg.text().as_deref(), Some("Reply in French."));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// OpenAI `name` field; other providers drop it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

impl Message {
    /// 单段文本消息
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            name: None,
            content: vec![ContentPart::Text(TextContent { text: text.into() })],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::system(), text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::user(), text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::assistant(), text)
    }

    /// Text parts joined with `\n`; `None` when the message has no text.
    pub fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(TextContent { text }) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }
}

/// 消息内容片段
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text(TextContent),
    /// A call the assistant made in an earlier turn.
    ToolCall(ToolCall),
    /// Output sent back under the `tool` role.
    ToolResult(ToolResult),
    /// Provider-native part, copied into the body unchanged.
    Data { data: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

/// Function tool offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema of the arguments; `None` sends an empty object schema.
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// Tool call in the OpenAI `tool_calls[]` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    /// Always `function` for the providers this crate talks to.
    #[serde(rename = "type", default = "default_tool_call_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn default_tool_call_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Builds a function call from structured arguments.
    pub fn function(id: Option<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id,
            kind: default_tool_call_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    /// Parses the argument string, falling back to a JSON string when it is not JSON.
    pub fn arguments_value(&self) -> Value {
        serde_json::from_str(&self.function.arguments)
            .unwrap_or_else(|_| Value::String(self.function.arguments.clone()))
    }
}

/// Function name and JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments serialized as a JSON string, as OpenAI reports them.
    #[serde(default)]
    pub arguments: String,
}

/// 工具执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// `id` of the [`ToolCall`] this answers.
    pub call_id: Option<String>,
    pub output: Value,
    #[serde(default)]
    pub is_error: bool,
}

/// Provider-neutral completion request.
///
/// ```
/// use llm_relay::types::{ChatOptions, ChatRequest, Message};
///
/// let request = ChatRequest {
///     options: ChatOptions { max_output_tokens: Some(256), ..Default::default() },
///     ..ChatRequest::new(vec![Message::user("Name three rivers.")])
/// };
/// assert!(request.tools.is_empty());
/// assert_eq!(request.options.max_output_tokens, Some(256));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub options: ChatOptions,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    /// Request with default options and no tools.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            options: ChatOptions::default(),
            tools: Vec::new(),
            tool_choice: None,
            response_format: None,
        }
    }
}

/// 采样与调用参数 未设置的字段不会出现在请求体中
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatOptions {
    /// Model identifier; the router clears it so each deployment sends its own.
    pub model: Option<String>,
    /// Dropped for o1-family models, which reject it.
    pub temperature: Option<f32>,
    /// `max_completion_tokens` on OpenAI, `max_tokens` on Azure and Anthropic.
    pub max_output_tokens: Option<u32>,
    /// Deadline for the whole HTTP exchange.
    pub timeout: Option<Duration>,
    /// Merged into the top level of the wire body.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    /// At least one tool call (`required` on OpenAI).
    Any,
    None,
    Tool { name: String },
}

/// 输出格式要求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    /// JSON Schema in the OpenAI `json_schema` envelope (`name`, `schema`, `strict`).
    JsonSchema { json_schema: Value },
    /// Any other descriptor; sent as is to OpenAI-style providers.
    #[serde(untagged)]
    Custom(Value),
}

impl ResponseFormat {
    /// An empty custom descriptor (`{}` or `null`) carries no formatting request.
    pub fn is_empty(&self) -> bool {
        match self {
            ResponseFormat::Custom(Value::Null) => true,
            ResponseFormat::Custom(Value::Object(map)) => map.is_empty(),
            _ => false,
        }
    }

    /// Reads an OpenAI `response_format` object.
    ///
    /// ```
    /// # use llm_relay::types::ResponseFormat;
    /// # use serde_json::json;
    /// let format = ResponseFormat::from_value(json!({"type": "json_object"}));
    /// assert!(matches!(format, ResponseFormat::JsonObject));
    /// assert!(ResponseFormat::from_value(json!({})).is_empty());
    /// ```
    pub fn from_value(value: Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("text") => ResponseFormat::Text,
            Some("json_object") => ResponseFormat::JsonObject,
            Some("json_schema") if value.get("json_schema").is_some() => {
                ResponseFormat::JsonSchema {
                    json_schema: value["json_schema"].clone(),
                }
            }
            _ => ResponseFormat::Custom(value),
        }
    }
}

/// Completion document in the OpenAI Chat Completions shape, plus routing metadata.
///
/// ```
/// use llm_relay::types::{ChatResponse, Choice, ChoiceMessage, FinishReason};
///
/// let response = ChatResponse {
///     choices: vec![Choice {
///         index: 0,
///         message: ChoiceMessage::assistant_text("Bonjour"),
///         finish_reason: Some(FinishReason::Stop),
///     }],
///     ..ChatResponse::empty("claude-3-5-sonnet-20240620")
/// };
/// let json = serde_json::to_value(&response).unwrap();
/// assert_eq!(json["object"], "chat.completion");
/// assert_eq!(response.first_text(), Some("Bonjour"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    /// Model id as the provider reported it, which may be more specific than the one sent.
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub provider: ProviderMetadata,
}

impl ChatResponse {
    /// 空响应骨架
    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            object: "chat.completion".to_string(),
            created: 0,
            model: model.into(),
            choices: Vec::new(),
            usage: None,
            provider: ProviderMetadata::default(),
        }
    }

    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Assistant message carried by a [`Choice`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChoiceMessage {
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::assistant(),
            content: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// OpenAI 口径的用量 Anthropic 的 input/output 映射到 prompt/completion
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Stop reason, serialized as the bare OpenAI string. Anthropic reasons are mapped
/// by the provider before they get here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl From<String> for FinishReason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other(value),
        }
    }
}

impl From<FinishReason> for String {
    fn from(value: FinishReason) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(other) => other.as_str(),
        };
        f.write_str(s)
    }
}

/// 调用来源
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// [`LLMProvider::name`](crate::provider::LLMProvider::name) of the provider that answered.
    pub provider: String,
    pub endpoint: Option<String>,
    /// `"{alias}/{deployment id}"`, set by the router.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    /// Set when the router answered from the response cache.
    #[serde(default)]
    pub cache_hit: bool,
}

/// What a deployment's model accepts; the router's pre-call checks read it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilityDescriptor {
    pub supports_tools: bool,
    /// JSON object / JSON schema output.
    pub supports_structured_output: bool,
    pub supports_system_messages: bool,
    /// Prompt window in tokens; `None` skips the size check.
    pub context_window: Option<usize>,
}

/// Tokenizer family used for prompt-size estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAI,
    Anthropic,
}

/// 粗略的 token 估算 仅用于上下文窗口检查
///
/// ASCII text is counted in fixed-size chunks and every other character as one token,
/// which over-counts CJK slightly and keeps the window check on the safe side.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    ascii_chars_per_token: f64,
}

// 每条消息的角色与分隔开销 以及回复的起始标记
const TOKENS_PER_MESSAGE: usize = 3;
const REPLY_PRIMING_TOKENS: usize = 3;
const TOKENS_PER_TOOL: usize = 8;
const JSON_MODE_TOKENS: usize = 20;

impl TokenEstimator {
    pub fn new(provider_type: ProviderType) -> Self {
        let ascii_chars_per_token = match provider_type {
            ProviderType::OpenAI => 4.0,
            ProviderType::Anthropic => 3.5,
        };
        Self {
            ascii_chars_per_token,
        }
    }

    pub fn estimate_text(&self, text: &str) -> usize {
        let (ascii, other) = text.chars().fold((0usize, 0usize), |(ascii, other), ch| {
            if ch.is_ascii() {
                (ascii + 1, other)
            } else {
                (ascii, other + 1)
            }
        });
        (ascii as f64 / self.ascii_chars_per_token).ceil() as usize + other
    }

    /// Prompt-side estimate for a whole request.
    ///
    /// ```
    /// use llm_relay::types::{ChatRequest, Message, ProviderType, TokenEstimator};
    ///
    /// let request = ChatRequest::new(vec![
    ///     Message::system("Be terse."),
    ///     Message::user("Why is the sky blue?"),
    /// ]);
    /// let estimate = TokenEstimator::new(ProviderType::OpenAI).estimate_request(&request);
    /// assert!(estimate.messages > 0);
    /// assert_eq!(estimate.tools, 0);
    /// assert_eq!(estimate.total(), estimate.messages);
    /// ```
    pub fn estimate_request(&self, request: &ChatRequest) -> TokenEstimate {
        let messages = REPLY_PRIMING_TOKENS
            + request
                .messages
                .iter()
                .map(|message| {
                    TOKENS_PER_MESSAGE
                        + message
                            .content
                            .iter()
                            .map(|part| self.estimate_part(part))
                            .sum::<usize>()
                })
                .sum::<usize>();

        let tools = request
            .tools
            .iter()
            .map(|tool| {
                TOKENS_PER_TOOL
                    + self.estimate_text(&tool.name)
                    + tool
                        .description
                        .as_deref()
                        .map_or(0, |text| self.estimate_text(text))
                    + tool
                        .input_schema
                        .as_ref()
                        .map_or(0, |schema| self.estimate_text(&schema.to_string()))
            })
            .sum();

        let response_format = match &request.response_format {
            None | Some(ResponseFormat::Text) => 0,
            Some(ResponseFormat::JsonObject) => JSON_MODE_TOKENS,
            Some(ResponseFormat::JsonSchema { json_schema: value })
            | Some(ResponseFormat::Custom(value)) => self.estimate_text(&value.to_string()),
        };

        TokenEstimate {
            messages,
            tools,
            response_format,
        }
    }

    fn estimate_part(&self, part: &ContentPart) -> usize {
        match part {
            ContentPart::Text(TextContent { text }) => self.estimate_text(text),
            ContentPart::ToolCall(call) => {
                self.estimate_text(&call.function.name)
                    + self.estimate_text(&call.function.arguments)
            }
            ContentPart::ToolResult(result) => self.estimate_text(&result.output.to_string()),
            ContentPart::Data { data } => self.estimate_text(&data.to_string()),
        }
    }
}

/// Estimated prompt tokens, split by where they come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    /// Message content plus per-message framing.
    pub messages: usize,
    pub tools: usize,
    pub response_format: usize,
}

impl TokenEstimate {
    pub fn total(&self) -> usize {
        self.messages + self.tools + self.response_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ascii_is_chunked_and_other_scripts_count_per_char() {
        let openai = TokenEstimator::new(ProviderType::OpenAI);
        assert_eq!(openai.estimate_text(""), 0);
        assert_eq!(openai.estimate_text("abcdefgh"), 2);
        assert_eq!(openai.estimate_text("abcde"), 2);
        assert_eq!(openai.estimate_text("你好"), 2);

        let claude = TokenEstimator::new(ProviderType::Anthropic);
        let text = "word ".repeat(100);
        assert!(claude.estimate_text(&text) > openai.estimate_text(&text));
    }

    #[test]
    fn request_estimate_counts_framing_tools_and_format() {
        let estimator = TokenEstimator::new(ProviderType::OpenAI);
        let mut request = ChatRequest::new(vec![Message::user("abcd"), Message::assistant("abcd")]);
        let plain = estimator.estimate_request(&request);
        assert_eq!(plain.messages, REPLY_PRIMING_TOKENS + 2 * (TOKENS_PER_MESSAGE + 1));
        assert_eq!(plain.total(), plain.messages);

        request.tools.push(ToolDefinition {
            name: "lookup".into(),
            description: None,
            input_schema: None,
        });
        request.response_format = Some(ResponseFormat::JsonObject);
        let with_extras = estimator.estimate_request(&request);
        assert_eq!(with_extras.tools, TOKENS_PER_TOOL + 2);
        assert_eq!(with_extras.response_format, JSON_MODE_TOKENS);
        assert_eq!(with_extras.total(), plain.total() + TOKENS_PER_TOOL + 2 + JSON_MODE_TOKENS);
    }

    #[test]
    fn finish_reason_serializes_as_plain_string() {
        assert_eq!(
            serde_json::to_value(FinishReason::ToolCalls).unwrap(),
            json!("tool_calls")
        );
        let parsed: FinishReason = serde_json::from_value(json!("end_turn")).unwrap();
        assert_eq!(parsed, FinishReason::Other("end_turn".to_string()));
    }

    #[test]
    fn response_serializes_in_completion_shape() {
        let response = ChatResponse {
            id: "chatcmpl-1".to_string(),
            created: 42,
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage::assistant_text("hi"),
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Some(TokenUsage {
                prompt_tokens: 3,
                completion_tokens: 1,
                total_tokens: 4,
            }),
            ..ChatResponse::empty("gpt-4o")
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["object"], json!("chat.completion"));
        assert_eq!(value["choices"][0]["message"]["role"], json!("assistant"));
        assert_eq!(value["choices"][0]["message"]["content"], json!("hi"));
        assert_eq!(value["choices"][0]["finish_reason"], json!("stop"));
        assert!(value["choices"][0]["message"].get("tool_calls").is_none());
        assert_eq!(value["usage"]["total_tokens"], json!(4));
    }

    #[test]
    fn tool_call_arguments_parse_back_to_json() {
        let call = ToolCall::function(
            Some("call_1".into()),
            "get_weather",
            &json!({"location": "Boston, MA"}),
        );
        assert_eq!(call.kind, "function");
        assert_eq!(call.arguments_value()["location"], json!("Boston, MA"));

        let broken = ToolCall {
            function: FunctionCall {
                name: "x".into(),
                arguments: "not json".into(),
            },
            ..call
        };
        assert_eq!(broken.arguments_value(), json!("not json"));
    }

    #[test]
    fn custom_response_format_serializes_as_given() {
        let bare = ResponseFormat::from_value(json!("json_object"));
        assert!(matches!(bare, ResponseFormat::Custom(_)));
        assert_eq!(serde_json::to_value(&bare).unwrap(), json!("json_object"));

        let object = ResponseFormat::from_value(json!({"type": "grammar", "rule": "x"}));
        assert_eq!(
            serde_json::to_value(&object).unwrap(),
            json!({"type": "grammar", "rule": "x"})
        );
        assert_eq!(
            serde_json::to_value(ResponseFormat::JsonObject).unwrap(),
            json!({"type": "json_object"})
        );
    }

    #[test]
    fn empty_custom_response_format_is_empty() {
        assert!(ResponseFormat::Custom(json!({})).is_empty());
        assert!(ResponseFormat::Custom(Value::Null).is_empty());
        assert!(!ResponseFormat::JsonObject.is_empty());
        assert!(
            !ResponseFormat::from_value(json!({
                "type": "json_schema",
                "json_schema": {"name": "answer", "schema": {"type": "object"}}
            }))
            .is_empty()
        );
    }
}
