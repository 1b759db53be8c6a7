//! Anthropic Messages 接入
//!
//! 请求体构建与响应映射同时被 Vertex AI 上的 Claude 复用。

mod error;
mod provider;
pub(crate) mod request;
pub(crate) mod response;
mod types;

pub(crate) use error::parse_anthropic_error;
pub use provider::{AnthropicMessagesProvider, claude_model_capabilities};
pub(crate) use types::AnthropicMessageResponse;
