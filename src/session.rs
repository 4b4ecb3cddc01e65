//! Session / history tracking
//!
//! Counts completed interactions and keeps a short FIFO history of the latest
//! exchanges. Once the interaction cap is reached every query is refused until
//! [`Session::reset`] is called.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::types::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl ConversationTurn {
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    interaction_count: u32,
    max_interactions: u32,
    max_history: usize,
    history: VecDeque<ConversationTurn>,
}

impl Session {
    pub fn new(max_interactions: u32, max_history: usize) -> Self {
        Self {
            interaction_count: 0,
            max_interactions,
            max_history,
            history: VecDeque::with_capacity(max_history + 2),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.max_interactions, config.max_history_entries)
    }

    pub fn interaction_count(&self) -> u32 {
        self.interaction_count
    }

    pub fn max_interactions(&self) -> u32 {
        self.max_interactions
    }

    pub fn history(&self) -> &VecDeque<ConversationTurn> {
        &self.history
    }

    /// Err(BudgetExceeded) once the interaction cap is reached
    pub fn ensure_capacity(&self) -> AppResult<()> {
        if self.interaction_count >= self.max_interactions {
            return Err(AppError::BudgetExceeded(format!(
                "interaction limit of {} reached",
                self.max_interactions
            )));
        }
        Ok(())
    }

    /// Append a user/assistant pair, evicting the oldest entries beyond the cap
    pub fn record_exchange(&mut self, query: &str, response: &str) {
        self.history.push_back(ConversationTurn::now(Role::User, query));
        self.history.push_back(ConversationTurn::now(Role::Assistant, response));
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
        self.interaction_count += 1;
    }

    pub fn reset(&mut self) {
        self.interaction_count = 0;
        self.history.clear();
    }

    /// Plain-text transcript for prompt context
    pub fn transcript(&self) -> String {
        self.history
            .iter()
            .map(|turn| match turn.role {
                Role::User => format!("用户: {}", turn.content),
                Role::Assistant => format!("助手: {}", turn.content),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
