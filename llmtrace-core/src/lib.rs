pub mod config;
pub mod db;
pub mod debug;
pub mod error;
pub mod llm;
pub mod models;
pub mod providers;

pub use config::LlmTraceConfig;
pub use debug::DebugConfig;
pub use error::LlmTraceError;
pub use llm::{ChatClient, ChatCompletionRequest, ChatCompletionResponse, ChatError};
pub use providers::{ProviderRegistry, ResolvedProvider};
