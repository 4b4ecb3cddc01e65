// Scripted adapter for exercising the agent pipeline without a network

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::llm::provider::{LLMAdapter, LLM};
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse};

/// Replays canned replies in order; `Err` entries become provider failures
pub(crate) struct ScriptedAdapter {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Arc<Mutex<Vec<LLMRequest>>>,
}

impl ScriptedAdapter {
    pub(crate) fn new(replies: Vec<Result<&str, &str>>) -> (Self, Arc<Mutex<Vec<LLMRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let adapter = Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            requests: Arc::clone(&requests),
        };
        (adapter, requests)
    }

    /// Build an `LLM` around the script, returning the request log alongside
    pub(crate) fn llm(replies: Vec<Result<&str, &str>>) -> (LLM, Arc<Mutex<Vec<LLMRequest>>>) {
        let (adapter, requests) = Self::new(replies);
        (LLM::from_adapter("scripted", Box::new(adapter)), requests)
    }
}

#[async_trait]
impl LLMAdapter for ScriptedAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(LLMResponse {
                content,
                finish_reason: "stop".to_string(),
                usage: None,
            }),
            Some(Err(message)) => Err(AppError::ProviderUnavailable(message)),
            None => Err(AppError::ProviderUnavailable("script exhausted".to_string())),
        }
    }

    async fn list_models(&self) -> AppResult<Vec<String>> {
        Ok(vec!["scripted-model".to_string()])
    }
}
