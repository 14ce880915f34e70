//! `conduit-llm` — LLM provider abstraction, prompt cache tiers, routing
//! with fallback profiles, and daily spend quotas.

pub mod anthropic;
pub mod error;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod quota;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use error::{LlmError, Result};
pub use openai::OpenAiProvider;
pub use prompt::{PromptBuilder, SessionInfo, SystemPrompt};
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, Role};
pub use quota::QuotaTracker;
pub use router::{ProviderRouter, ProviderSlot};
