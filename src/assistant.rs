//! Assistant facade
//!
//! Owns the knowledge store, the orchestrator and the conversation session,
//! and exposes the operations the command line drives.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::agents::{Orchestrator, OrchestratorSettings};
use crate::config::{Config, ModelConfig};
use crate::embeddings::Embedder;
use crate::knowledge::{KnowledgeRecord, KnowledgeStore, RetrievalMode, Retriever};
use crate::llm::{LLMProviderConfig, LLM};
use crate::session::Session;
use crate::types::{AppError, AppResult};

/// Returned instead of an answer once the interaction cap is reached
pub const INTERACTION_LIMIT_MESSAGE: &str = "已达到最大交互次数。请输入 reset 重新开始对话。";

const EMPTY_QUERY_MESSAGE: &str = "请输入问题。";

#[derive(Debug, Clone, Serialize)]
pub struct AssistantStatus {
    pub interaction_count: u32,
    pub max_interactions: u32,
    pub history_len: usize,
    pub provider: String,
    pub model: String,
    pub model_config: ModelConfig,
    pub top_k: usize,
    pub record_count: usize,
    pub embedding_backend: String,
    pub stages: Vec<String>,
}

impl fmt::Display for AssistantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "交互次数: {}/{}", self.interaction_count, self.max_interactions)?;
        writeln!(f, "历史记录: {} 条", self.history_len)?;
        writeln!(f, "模型: {} ({})", self.model, self.provider)?;
        writeln!(
            f,
            "参数: temperature={} top_p={} max_tokens={} frequency_penalty={} presence_penalty={}",
            self.model_config.temperature,
            self.model_config.top_p,
            self.model_config.max_tokens,
            self.model_config.frequency_penalty,
            self.model_config.presence_penalty
        )?;
        writeln!(f, "知识库: {} 条记录, top_k={}, 嵌入: {}", self.record_count, self.top_k, self.embedding_backend)?;
        write!(f, "流程阶段: {}", self.stages.join(" → "))
    }
}

pub struct Assistant {
    config: Config,
    model: ModelConfig,
    embedder: Arc<Embedder>,
    retriever: Arc<Retriever>,
    orchestrator: Orchestrator,
    session: Session,
}

impl Assistant {
    pub async fn from_config(config: Config) -> AppResult<Self> {
        let timeout = Duration::from_secs(config.llm.timeout_secs);
        let embedder = Arc::new(Embedder::from_config(&config.embedding, timeout)?);
        let store = KnowledgeStore::open(config.knowledge.db_path.clone(), Arc::clone(&embedder)).await?;

        let mode = RetrievalMode::from_id(&config.knowledge.retrieval_mode).ok_or_else(|| {
            AppError::Config(format!("Unsupported retrieval mode: {}", config.knowledge.retrieval_mode))
        })?;
        let retriever = Arc::new(Retriever::new(Arc::new(store), Arc::clone(&embedder), mode));
        let llm = Arc::new(LLM::new(LLMProviderConfig::from_config(&config.llm))?);

        info!(
            provider = llm.provider_name(),
            model = %config.llm.model,
            embedding = embedder.backend_name(),
            "Assistant initialized"
        );
        Ok(Self::with_components(config, llm, embedder, retriever))
    }

    /// Assemble from pre-built parts
    pub fn with_components(config: Config, llm: Arc<LLM>, embedder: Arc<Embedder>, retriever: Arc<Retriever>) -> Self {
        let orchestrator = Orchestrator::new(llm, Arc::clone(&retriever), OrchestratorSettings::from_config(&config));
        Self {
            model: config.model.clone(),
            session: Session::from_config(&config.session),
            config,
            embedder,
            retriever,
            orchestrator,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        self.retriever.store()
    }

    /// Answer a query and record the exchange; refuses once the interaction cap is hit
    pub async fn process_query(&mut self, query: &str) -> String {
        let query = query.trim();
        if query.is_empty() {
            return EMPTY_QUERY_MESSAGE.to_string();
        }
        if let Err(e) = self.session.ensure_capacity() {
            info!(error = %e, "Refusing query");
            return INTERACTION_LIMIT_MESSAGE.to_string();
        }

        let answer = self
            .orchestrator
            .process_query(query, &self.session.transcript(), &self.model)
            .await;
        self.session.record_exchange(query, &answer);
        answer
    }

    pub fn reset(&mut self) {
        self.session.reset();
        info!("Conversation reset");
    }

    pub async fn get_status(&self) -> AssistantStatus {
        AssistantStatus {
            interaction_count: self.session.interaction_count(),
            max_interactions: self.session.max_interactions(),
            history_len: self.session.history().len(),
            provider: self.orchestrator.llm().provider_name().to_string(),
            model: self.orchestrator.settings().model.clone(),
            model_config: self.model.clone(),
            top_k: self.config.knowledge.top_k,
            record_count: self.store().len().await,
            embedding_backend: self.embedder.backend_name().to_string(),
            stages: self.orchestrator.stages().iter().map(|s| s.name.to_string()).collect(),
        }
    }

    /// Change one sampling parameter for subsequent queries
    pub fn update_model_config(&mut self, key: &str, value: &str) -> AppResult<()> {
        self.model.set(key, value)?;
        info!(key, value, "Model parameter updated");
        Ok(())
    }

    pub async fn add_knowledge(&self, kind: &str, tags: Vec<String>, content: &str) -> AppResult<KnowledgeRecord> {
        let content = content.trim();
        if kind.trim().is_empty() || content.is_empty() {
            return Err(AppError::InvalidRequest(
                "knowledge type and content must not be empty".to_string(),
            ));
        }
        self.store().add(kind.trim(), tags, content).await
    }

    /// Ask the chat endpoint for its model listing
    pub async fn check_connectivity(&self) -> AppResult<Vec<String>> {
        match self.orchestrator.llm().list_models().await {
            Ok(models) => {
                info!(models = models.len(), "LLM endpoint reachable");
                Ok(models)
            }
            Err(e) => {
                warn!(error = %e, "LLM endpoint check failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedAdapter;
    use mockito::Matcher;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.knowledge.db_path = dir.path().join("knowledge_db.json");
        config.embedding.provider = "hash".to_string();
        config
    }

    async fn scripted_assistant(config: Config, replies: Vec<Result<&str, &str>>) -> Assistant {
        let embedder = Arc::new(Embedder::hashed(config.embedding.dimension));
        let store = KnowledgeStore::open(config.knowledge.db_path.clone(), Arc::clone(&embedder))
            .await
            .unwrap();
        let retriever = Arc::new(Retriever::new(Arc::new(store), Arc::clone(&embedder), RetrievalMode::Vector));
        let (llm, _) = ScriptedAdapter::llm(replies);
        Assistant::with_components(config, Arc::new(llm), embedder, retriever)
    }

    #[tokio::test]
    async fn test_interaction_cap_and_reset() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.session.max_interactions = 2;
        let mut assistant = scripted_assistant(config, vec![]).await;

        for _ in 0..2 {
            let answer = assistant.process_query("蛋白质结构预测流程").await;
            assert!(answer.starts_with("API错误: "));
        }
        assert_eq!(assistant.session().interaction_count(), 2);

        let refused = assistant.process_query("再问一次").await;
        assert_eq!(refused, INTERACTION_LIMIT_MESSAGE);
        assert_eq!(assistant.session().interaction_count(), 2);
        assert_eq!(assistant.session().history().len(), 4);

        assistant.reset();
        assert_eq!(assistant.session().interaction_count(), 0);
        assert!(assistant.session().history().is_empty());
        assert_ne!(assistant.process_query("蛋白质结构预测流程").await, INTERACTION_LIMIT_MESSAGE);
    }

    #[tokio::test]
    async fn test_empty_query_is_not_counted() {
        let dir = TempDir::new().unwrap();
        let mut assistant = scripted_assistant(test_config(&dir), vec![]).await;
        assert_eq!(assistant.process_query("   ").await, EMPTY_QUERY_MESSAGE);
        assert_eq!(assistant.session().interaction_count(), 0);
    }

    #[tokio::test]
    async fn test_http_500_falls_back_to_direct_answer() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;

        let staged = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("STAGE_DONE".to_string()))
            .with_status(500)
            .with_body(r#"{"error":{"message":"upstream failure"}}"#)
            .expect(1)
            .create_async()
            .await;
        let direct = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("基于以下知识".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"直接回答：先验证序列有效性，再调用AlphaFold2预测结构，最后展示3D结构。"},"finish_reason":"stop"}]}"#,
            )
            .expect(2)
            .create_async()
            .await;

        let mut config = test_config(&dir);
        config.llm.api_key = "test-key".to_string();
        config.llm.base_url = Some(server.url());
        let mut assistant = Assistant::from_config(config).await.unwrap();

        let answer = assistant.process_query("蛋白质结构预测流程").await;

        assert_eq!(answer, "直接回答：先验证序列有效性，再调用AlphaFold2预测结构，最后展示3D结构。");
        assert_eq!(assistant.session().interaction_count(), 1);
        staged.assert_async().await;
        direct.assert_async().await;
    }

    #[tokio::test]
    async fn test_add_knowledge_extends_store_and_matrix() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let dimension = config.embedding.dimension;
        let assistant = Assistant::from_config(config).await.unwrap();

        let record = assistant
            .add_knowledge(
                "fragment",
                vec!["可视化".to_string(), "PyMOL".to_string()],
                "使用PyMOL渲染蛋白质三维结构",
            )
            .await
            .unwrap();

        assert_eq!(record.id, 5);
        let matrix = assistant.store().rebuild_vectors().await.unwrap();
        assert_eq!(matrix.len(), 5);
        assert!(matrix.iter().all(|row| row.len() == dimension));
        assert_eq!(assistant.get_status().await.record_count, 5);
    }

    #[tokio::test]
    async fn test_add_knowledge_rejects_empty_content() {
        let dir = TempDir::new().unwrap();
        let assistant = scripted_assistant(test_config(&dir), vec![]).await;
        let result = assistant.add_knowledge("fragment", vec![], "  ").await;
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_update_model_config_and_status() {
        let dir = TempDir::new().unwrap();
        let mut assistant = scripted_assistant(test_config(&dir), vec![]).await;

        assistant.update_model_config("temperature", "0.3").unwrap();
        assert!(assistant.update_model_config("unknown", "1").is_err());
        assert!(assistant.update_model_config("max_tokens", "lots").is_err());

        let status = assistant.get_status().await;
        assert!((status.model_config.temperature - 0.3).abs() < 1e-6);
        assert_eq!(status.record_count, 4);
        assert_eq!(status.stages.len(), 4);
        assert_eq!(status.embedding_backend, "hash-fallback");

        let rendered = status.to_string();
        assert!(rendered.contains("交互次数: 0/5"));
        assert!(rendered.contains("Knowledge_Retriever → Research_Assistant"));
    }

    #[tokio::test]
    async fn test_check_connectivity_lists_models() {
        let dir = TempDir::new().unwrap();
        let assistant = scripted_assistant(test_config(&dir), vec![]).await;
        assert_eq!(assistant.check_connectivity().await.unwrap(), vec!["scripted-model"]);
    }
}
