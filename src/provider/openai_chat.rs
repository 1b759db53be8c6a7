//! OpenAI Chat Completions 接入
//!
//! 请求体构建、响应映射与错误解析同时被 Azure OpenAI 复用，两者仅 endpoint 与鉴权头不同。

mod error;
mod provider;
pub(crate) mod request;
pub(crate) mod response;
mod types;

pub(crate) use error::parse_openai_error;
pub use provider::{OpenAiChatProvider, openai_model_capabilities};
pub(crate) use types::OpenAiChatResponse;
