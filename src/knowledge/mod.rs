// Knowledge store and retrieval

pub mod record;
pub mod retriever;
pub mod store;

pub use record::{default_records, KnowledgeRecord, KnowledgeType};
pub use retriever::{format_bullets, RetrievalMode, RetrievalResult, Retriever};
pub use store::{KnowledgeSnapshot, KnowledgeStore};
