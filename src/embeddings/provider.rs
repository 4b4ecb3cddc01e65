use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::embeddings::fallback::hashed_embedding;
use crate::embeddings::remote::RemoteEmbeddingBackend;
use crate::types::{AppError, AppResult};

/// A source of genuine embeddings that may fail
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;

    fn name(&self) -> &str;
}

/// Embedding provider used by the knowledge store and the retriever.
///
/// [`Embedder::embed`] never fails: backend errors, unreachable endpoints and
/// wrongly-sized vectors are logged and replaced by [`hashed_embedding`].
/// Callers that must tell genuine vectors from fallback ones use
/// [`Embedder::embed_checked`]. Successful backend results are cached by exact
/// text for the lifetime of the provider.
pub struct Embedder {
    backend: Option<Box<dyn EmbeddingBackend>>,
    dimension: usize,
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl Embedder {
    pub fn new(backend: Option<Box<dyn EmbeddingBackend>>, dimension: usize) -> Self {
        Self {
            backend,
            dimension,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Provider that only ever takes the deterministic path
    pub fn hashed(dimension: usize) -> Self {
        Self::new(None, dimension)
    }

    pub fn from_config(config: &EmbeddingConfig, timeout: Duration) -> AppResult<Self> {
        let backend: Option<Box<dyn EmbeddingBackend>> = match config.provider.as_str() {
            "remote" => Some(Box::new(RemoteEmbeddingBackend::new(
                &config.api_key,
                config.base_url.clone(),
                config.model.clone(),
                timeout,
            )?)),
            "hash" | "none" => None,
            other => {
                return Err(AppError::Config(format!(
                    "Unsupported embedding provider: {}",
                    other
                )))
            }
        };
        Ok(Self::new(backend, config.dimension))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn backend_name(&self) -> &str {
        self.backend.as_ref().map(|b| b.name()).unwrap_or("hash-fallback")
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Genuine backend vector only. Fails when no backend is configured, the
    /// call fails, or the vector has the wrong dimension.
    pub async fn embed_checked(&self, text: &str) -> AppResult<Vec<f32>> {
        let Some(backend) = &self.backend else {
            return Err(AppError::ProviderUnavailable(
                "no embedding backend configured".to_string(),
            ));
        };

        if let Some(cached) = self.cache.lock().await.get(text) {
            return Ok(cached.clone());
        }

        let vector = backend.embed(text).await?;
        if vector.len() != self.dimension {
            return Err(AppError::MalformedResponse(format!(
                "{} returned {} dimensions, expected {}",
                backend.name(),
                vector.len(),
                self.dimension
            )));
        }

        self.cache
            .lock()
            .await
            .insert(text.to_string(), vector.clone());
        Ok(vector)
    }

    /// Backend vector when available, otherwise [`hashed_embedding`]
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        match self.embed_checked(text).await {
            Ok(vector) => vector,
            Err(e) => {
                if self.has_backend() {
                    warn!(error = %e, backend = self.backend_name(), "Embedding unavailable, using hashed fallback");
                }
                self.fallback(text)
            }
        }
    }

    pub fn fallback(&self, text: &str) -> Vec<f32> {
        hashed_embedding(text, self.dimension)
    }

    pub async fn cached_entries(&self) -> usize {
        let size = self.cache.lock().await.len();
        debug!(size, "Embedding cache size");
        size
    }
}
