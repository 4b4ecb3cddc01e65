// LLM abstraction layer

pub mod provider;
pub mod chat_completions;

#[cfg(test)]
pub(crate) mod scripted;

pub use provider::*;
pub use crate::types::{LLMMessage, LLMRequest, LLMResponse, TokenUsage};
