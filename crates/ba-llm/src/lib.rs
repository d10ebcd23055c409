//! Backend adapters for the BA assistant.
//!
//! Every adapter implements [`ba_core::ChatAdapter`]:
//!
//! - direct API: [`AnthropicAdapter`], [`GeminiAdapter`],
//!   [`OpenAiCompatAdapter`] (OpenAI and DeepSeek)
//! - agent mode: [`AgentLoopAdapter`] (in-process loop over a direct
//!   adapter) and [`ClaudeCliAdapter`] (Claude CLI from the warm pool)
//!
//! [`Backend::from_config`] picks one from the loaded configuration.

pub mod agent_loop;
pub mod anthropic;
pub mod claude_cli;
pub mod error;
pub mod factory;
pub mod gemini;
pub mod http;
pub mod openai_compat;
pub mod retry;
pub mod sse;

pub use agent_loop::{AgentLoopAdapter, AgentTool, AgentToolbox};
pub use anthropic::AnthropicAdapter;
pub use claude_cli::ClaudeCliAdapter;
pub use error::{ProviderError, Result};
pub use factory::Backend;
pub use gemini::GeminiAdapter;
pub use openai_compat::OpenAiCompatAdapter;
pub use retry::RetryPolicy;
