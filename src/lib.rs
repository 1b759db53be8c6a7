//! 模型目录 多供应商路由与 OpenAI 直连调用

pub mod cache;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod http;
pub mod provider;
pub mod router;
pub mod types;

pub use catalog::build_model_list;
pub use config::{Credentials, GatewayConfig, RoutingEntry};
pub use dispatch::{
    CompletionParams, direct_completion, direct_completion_with_transport, router_completion,
};
pub use error::LLMError;
pub use gateway::Gateway;
pub use provider::LLMProvider;
pub use router::Router;
pub use types::*;
