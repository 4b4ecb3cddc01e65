//! Stage orchestrator
//!
//! Drives one query through the stage list under a turn budget. Every
//! failure mode ends in an explicit [`PipelineOutcome::NeedsFallback`] which
//! [`Orchestrator::process_query`] resolves with the direct two-call path, so
//! callers always get text back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::agents::direct;
use crate::agents::stages::{
    continuation_prompt, default_pipeline, has_terminate_marker, strip_markers, PipelineStage, StageKind,
};
use crate::config::{Config, ModelConfig};
use crate::knowledge::{format_bullets, RetrievalResult, Retriever};
use crate::llm::LLM;
use crate::tools;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    Provider { stage: &'static str, error: String },
    EmptyResponse { stage: &'static str },
    TooShort { chars: usize },
    /// Pipeline ended without any LLM-produced text
    NoContent,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Provider { stage, error } => write!(f, "{} failed: {}", stage, error),
            FallbackReason::EmptyResponse { stage } => write!(f, "{} returned an empty reply", stage),
            FallbackReason::TooShort { chars } => write!(f, "answer too short ({} chars)", chars),
            FallbackReason::NoContent => write!(f, "no stage produced an answer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed(String),
    /// Turn budget ran out before the stage produced anything
    BudgetExhausted,
    NeedsFallback(FallbackReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Answer(String),
    NeedsFallback(FallbackReason),
}

/// Per-query transient state, never persisted
#[derive(Debug, Clone)]
pub struct OrchestrationSession {
    pub id: Uuid,
    pub query: String,
    pub history: String,
    pub retrieved: Vec<RetrievalResult>,
    outputs: HashMap<&'static str, String>,
    last_output: Option<String>,
    turns_used: u32,
    max_turns: u32,
    terminated: bool,
}

impl OrchestrationSession {
    pub fn new(query: impl Into<String>, history: impl Into<String>, max_turns: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            history: history.into(),
            retrieved: Vec::new(),
            outputs: HashMap::new(),
            last_output: None,
            turns_used: 0,
            max_turns,
            terminated: false,
        }
    }

    pub fn output(&self, kind: StageKind) -> Option<&str> {
        self.outputs.get(kind.slot()).map(String::as_str)
    }

    /// Latest text produced by an LLM stage
    pub fn last_output(&self) -> Option<&str> {
        self.last_output.as_deref()
    }

    pub fn turns_used(&self) -> u32 {
        self.turns_used
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Claim one LLM exchange from the budget
    pub fn consume_turn(&mut self) -> AppResult<()> {
        if self.turns_used >= self.max_turns {
            return Err(AppError::BudgetExceeded(format!(
                "turn budget of {} used up",
                self.max_turns
            )));
        }
        self.turns_used += 1;
        Ok(())
    }

    fn record(&mut self, stage: &PipelineStage, text: String) {
        if stage.uses_llm {
            self.last_output = Some(text.clone());
        }
        self.outputs.insert(stage.kind.slot(), text);
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "query" => Some(self.query.as_str()),
            "history" if self.history.is_empty() => Some("（无）"),
            "history" => Some(self.history.as_str()),
            other => self.outputs.get(other).map(String::as_str),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub top_k: usize,
    pub max_turns: u32,
    pub max_stage_attempts: u32,
    pub min_response_chars: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.llm.model.clone(),
            top_k: config.knowledge.top_k,
            max_turns: config.session.max_turns,
            max_stage_attempts: config.session.max_stage_attempts,
            min_response_chars: config.session.min_response_chars,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Orchestrator {
    llm: Arc<LLM>,
    retriever: Arc<Retriever>,
    stages: Vec<PipelineStage>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(llm: Arc<LLM>, retriever: Arc<Retriever>, settings: OrchestratorSettings) -> Self {
        Self {
            llm,
            retriever,
            stages: default_pipeline(),
            settings,
        }
    }

    pub fn with_stages(mut self, stages: Vec<PipelineStage>) -> Self {
        self.stages = stages;
        self
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn llm(&self) -> &Arc<LLM> {
        &self.llm
    }

    /// Answer `query`; never fails, the worst case is an error message string
    pub async fn process_query(&self, query: &str, history: &str, model: &ModelConfig) -> String {
        let mut session = OrchestrationSession::new(query, history, self.settings.max_turns);
        let span = tracing::info_span!("query", session_id = %session.id);

        async {
            info!(query_len = query.chars().count(), stages = self.stages.len(), "Processing query");
            match self.run_pipeline(&mut session, model).await {
                PipelineOutcome::Answer(answer) => {
                    info!(turns_used = session.turns_used(), answer_len = answer.len(), "Pipeline answered");
                    answer
                }
                PipelineOutcome::NeedsFallback(reason) => {
                    warn!(%reason, turns_used = session.turns_used(), "Pipeline needs fallback");
                    self.fallback(&session, model).await
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn run_pipeline(&self, session: &mut OrchestrationSession, model: &ModelConfig) -> PipelineOutcome {
        for stage in &self.stages {
            if session.is_terminated() {
                break;
            }
            info!(stage = stage.name, turns_used = session.turns_used(), "Entering stage");

            match self.run_stage(stage, session, model).await {
                StageOutcome::Completed(text) => session.record(stage, text),
                StageOutcome::BudgetExhausted => {
                    warn!(stage = stage.name, max_turns = self.settings.max_turns, "Turn budget exhausted");
                    session.terminated = true;
                }
                StageOutcome::NeedsFallback(reason) => return PipelineOutcome::NeedsFallback(reason),
            }
        }

        let Some(last) = session.last_output() else {
            return PipelineOutcome::NeedsFallback(FallbackReason::NoContent);
        };
        let answer = strip_markers(last);
        let chars = answer.chars().count();
        if chars < self.settings.min_response_chars {
            return PipelineOutcome::NeedsFallback(FallbackReason::TooShort { chars });
        }
        PipelineOutcome::Answer(answer)
    }

    async fn run_stage(
        &self,
        stage: &PipelineStage,
        session: &mut OrchestrationSession,
        model: &ModelConfig,
    ) -> StageOutcome {
        if !stage.uses_llm {
            return match stage.kind {
                StageKind::Retrieval => StageOutcome::Completed(self.retrieval_context(session).await),
                _ => StageOutcome::Completed(stage.render(|key| session.lookup(key))),
            };
        }

        let marker = stage.completion_marker();
        let mut messages = vec![LLMMessage::user(stage.render(|key| session.lookup(key)))];
        let mut produced: Vec<String> = Vec::new();

        for attempt in 1..=self.settings.max_stage_attempts.max(1) {
            if session.consume_turn().is_err() {
                if produced.is_empty() {
                    return StageOutcome::BudgetExhausted;
                }
                session.terminated = true;
                break;
            }

            let request = LLMRequest::with_model_config(
                self.llm.provider_name(),
                self.settings.model.clone(),
                messages.clone(),
                model,
            )
            .system(stage.system_prompt);

            let reply = match self.llm.create_chat_completion(&request).await {
                Ok(response) => response.content.trim().to_string(),
                Err(e) => {
                    error!(stage = stage.name, attempt, error = %e, "Stage LLM call failed");
                    return StageOutcome::NeedsFallback(FallbackReason::Provider {
                        stage: stage.name,
                        error: e.to_string(),
                    });
                }
            };

            if reply.is_empty() {
                if produced.is_empty() {
                    return StageOutcome::NeedsFallback(FallbackReason::EmptyResponse { stage: stage.name });
                }
                break;
            }

            let done = stage.is_complete(&reply);
            if has_terminate_marker(&reply) {
                session.terminated = true;
            }
            produced.push(reply.clone());
            if done || session.is_terminated() {
                break;
            }

            debug!(stage = stage.name, attempt, "Reply lacks completion marker, asking to continue");
            messages.push(LLMMessage::assistant(reply));
            messages.push(LLMMessage::user(continuation_prompt(marker)));
        }

        StageOutcome::Completed(strip_markers(&produced.join("\n")))
    }

    /// Bulleted retrieval block, plus a sequence check when the query carries one
    async fn retrieval_context(&self, session: &mut OrchestrationSession) -> String {
        let results = self.retriever.retrieve(&session.query, self.settings.top_k).await;
        info!(results = results.len(), "Knowledge retrieved");

        let mut context = format_bullets(&results);
        if let Some(report) = tools::sequence_report(&session.query) {
            context.push_str("\n\n");
            context.push_str(&report);
        }
        session.retrieved = results;
        context
    }

    /// Direct two-call answer, then the error message as last resort
    pub async fn fallback(&self, session: &OrchestrationSession, model: &ModelConfig) -> String {
        let knowledge = if session.retrieved.is_empty() {
            format_bullets(&self.retriever.retrieve(&session.query, self.settings.top_k).await)
        } else {
            format_bullets(&session.retrieved)
        };

        match direct::answer(&self.llm, &self.settings.model, &session.query, &knowledge, model).await {
            Ok(answer) => {
                info!(answer_len = answer.len(), "Direct fallback answered");
                answer
            }
            Err(e) => {
                error!(error = %e, "Direct fallback failed");
                let matches = self
                    .retriever
                    .retrieve_by_keywords(&session.query, self.settings.top_k)
                    .await;
                direct::error_response(&e, &matches)
            }
        }
    }
}
