// Embeddings: remote backend, exact-text cache and deterministic fallback

pub mod fallback;
pub mod provider;
pub mod remote;

pub use fallback::{hashed_embedding, l2_normalize};
pub use provider::{EmbeddingBackend, Embedder};
pub use remote::RemoteEmbeddingBackend;
