// Bioflow Assistant - retrieval-augmented multi-agent assistant for bioinformatics workflows

pub mod config;
pub mod types;
pub mod llm;
pub mod embeddings;
pub mod knowledge;
pub mod agents;
pub mod session;
pub mod streaming;
pub mod tools;     // Protein sequence validation helpers
pub mod assistant;
pub mod cli;
pub mod utils;

// Re-exports for convenience
pub use assistant::{Assistant, AssistantStatus};
pub use config::Config;
pub use types::{AppError, AppResult};
