use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::types::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm: LLMConfig,
    pub model: ModelConfig,
    pub embedding: EmbeddingConfig,
    pub knowledge: KnowledgeConfig,
    pub session: SessionConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

/// Sampling parameters sent with every chat completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1024,
            frequency_penalty: 0.1,
            presence_penalty: 0.1,
        }
    }
}

impl ModelConfig {
    pub const KEYS: [&'static str; 5] = [
        "temperature",
        "top_p",
        "max_tokens",
        "frequency_penalty",
        "presence_penalty",
    ];

    /// Update a single parameter from its textual form (`param key=value`)
    pub fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        let value = value.trim();
        match key.trim() {
            "temperature" => self.temperature = parse_in_range(key, value, 0.0, 2.0)?,
            "top_p" => self.top_p = parse_in_range(key, value, 0.0, 1.0)?,
            "frequency_penalty" => self.frequency_penalty = parse_in_range(key, value, -2.0, 2.0)?,
            "presence_penalty" => self.presence_penalty = parse_in_range(key, value, -2.0, 2.0)?,
            "max_tokens" => {
                let tokens: u32 = value.parse().map_err(|_| {
                    AppError::InvalidRequest(format!("max_tokens must be a positive integer, got '{}'", value))
                })?;
                if tokens == 0 {
                    return Err(AppError::InvalidRequest("max_tokens must be greater than zero".to_string()));
                }
                self.max_tokens = tokens;
            }
            other => {
                return Err(AppError::InvalidRequest(format!(
                    "Unknown model parameter '{}' (expected one of: {})",
                    other,
                    Self::KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }
}

fn parse_in_range(key: &str, value: &str, min: f32, max: f32) -> AppResult<f32> {
    let parsed: f32 = value
        .parse()
        .map_err(|_| AppError::InvalidRequest(format!("{} must be a number, got '{}'", key, value)))?;
    if !(min..=max).contains(&parsed) {
        return Err(AppError::InvalidRequest(format!(
            "{} must be between {} and {}, got {}",
            key, min, max, parsed
        )));
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// "remote" or "hash"
    pub provider: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    pub db_path: PathBuf,
    pub top_k: usize,
    /// "vector" or "keyword"
    pub retrieval_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub max_interactions: u32,
    pub max_history_entries: usize,
    pub max_turns: u32,
    pub max_stage_attempts: u32,
    pub min_response_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub enabled: bool,
    pub char_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LLMConfig {
                provider: "deepseek".to_string(),
                api_key: String::new(),
                base_url: None,
                model: "deepseek-chat".to_string(),
                timeout_secs: 30,
            },
            model: ModelConfig::default(),
            embedding: EmbeddingConfig {
                provider: "hash".to_string(),
                api_key: String::new(),
                base_url: "https://api.openai.com/v1".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
            },
            knowledge: KnowledgeConfig {
                db_path: PathBuf::from("./data/knowledge_db.json"),
                top_k: 3,
                retrieval_mode: "vector".to_string(),
            },
            session: SessionConfig {
                max_interactions: 5,
                max_history_entries: 8,
                max_turns: 8,
                max_stage_attempts: 2,
                min_response_chars: 20,
            },
            stream: StreamConfig {
                enabled: true,
                char_delay_ms: 15,
            },
            logging: LoggingConfig {
                filter: "bioflow_assistant=info".to_string(),
                log_dir: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let provider = env::var("LLM_PROVIDER").unwrap_or(defaults.llm.provider);
        let api_key = env::var("LLM_API_KEY")
            .or_else(|_| match provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY"),
                _ => env::var("DEEPSEEK_API_KEY"),
            })
            .unwrap_or_default();

        Ok(Self {
            llm: LLMConfig {
                provider,
                api_key,
                base_url: env::var("LLM_BASE_URL").ok(),
                model: env::var("LLM_MODEL").unwrap_or(defaults.llm.model),
                timeout_secs: env::var("LLM_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
            },
            model: ModelConfig {
                temperature: env::var("LLM_TEMPERATURE")
                    .unwrap_or_else(|_| "0.7".to_string())
                    .parse()?,
                top_p: env::var("LLM_TOP_P")
                    .unwrap_or_else(|_| "0.9".to_string())
                    .parse()?,
                max_tokens: env::var("LLM_MAX_TOKENS")
                    .unwrap_or_else(|_| "1024".to_string())
                    .parse()?,
                frequency_penalty: env::var("LLM_FREQUENCY_PENALTY")
                    .unwrap_or_else(|_| "0.1".to_string())
                    .parse()?,
                presence_penalty: env::var("LLM_PRESENCE_PENALTY")
                    .unwrap_or_else(|_| "0.1".to_string())
                    .parse()?,
            },
            embedding: EmbeddingConfig {
                provider: env::var("EMBEDDING_PROVIDER").unwrap_or(defaults.embedding.provider),
                api_key: env::var("EMBEDDING_API_KEY").unwrap_or_default(),
                base_url: env::var("EMBEDDING_BASE_URL").unwrap_or(defaults.embedding.base_url),
                model: env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding.model),
                dimension: env::var("EMBEDDING_DIMENSION")
                    .unwrap_or_else(|_| "384".to_string())
                    .parse()?,
            },
            knowledge: KnowledgeConfig {
                db_path: env::var("KNOWLEDGE_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.knowledge.db_path),
                top_k: env::var("RETRIEVAL_TOP_K")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()?,
                retrieval_mode: env::var("RETRIEVAL_MODE").unwrap_or(defaults.knowledge.retrieval_mode),
            },
            session: SessionConfig {
                max_interactions: env::var("MAX_INTERACTION_COUNT")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                max_history_entries: env::var("MAX_HISTORY_ENTRIES")
                    .unwrap_or_else(|_| "8".to_string())
                    .parse()?,
                max_turns: env::var("MAX_TURNS")
                    .unwrap_or_else(|_| "8".to_string())
                    .parse()?,
                max_stage_attempts: env::var("MAX_STAGE_ATTEMPTS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()?,
                min_response_chars: env::var("MIN_RESPONSE_CHARS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
            },
            stream: StreamConfig {
                enabled: env::var("STREAM_ENABLED")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()?,
                char_delay_ms: env::var("STREAM_CHAR_DELAY_MS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()?,
            },
            logging: LoggingConfig {
                filter: env::var("RUST_LOG").unwrap_or(defaults.logging.filter),
                log_dir: env::var("LOG_DIR").ok().map(PathBuf::from),
            },
        })
    }
}
