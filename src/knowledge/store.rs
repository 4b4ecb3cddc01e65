//! Knowledge Store
//!
//! Holds the tagged workflow records and their embedding matrix. The file on
//! disk is a pretty-printed JSON array rewritten wholesale on every mutation.
//!
//! Readers clone an `Arc<KnowledgeSnapshot>` and never observe a partially
//! rebuilt matrix: rebuilds construct a fresh snapshot and swap it in. Writers
//! (`add`, `rebuild_vectors`) are serialized by a single writer lock.
//!
//! Only backend vectors are persisted. A record the backend could not embed
//! gets a hashed row in the snapshot matrix and stays unembedded on disk, so
//! the next rebuild asks the backend again.
//!
//! Every rebuild walks the whole store, which is fine for a corpus of a few
//! dozen records but is not incremental.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::embeddings::Embedder;
use crate::knowledge::record::{default_records, KnowledgeRecord, KnowledgeType};
use crate::types::AppResult;

/// Immutable view of the store: records and row-aligned embeddings
#[derive(Debug, Clone, Default)]
pub struct KnowledgeSnapshot {
    pub records: Vec<KnowledgeRecord>,
    /// Row `i` is the embedding of `records[i]`
    pub matrix: Vec<Vec<f32>>,
    /// Rows holding hashed fallback vectors instead of backend ones
    pub fallback_rows: usize,
}

impl KnowledgeSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Cosine scores over this matrix are meaningless when any row is hashed
    pub fn is_degraded(&self) -> bool {
        self.fallback_rows > 0
    }
}

pub struct KnowledgeStore {
    path: PathBuf,
    embedder: Arc<Embedder>,
    snapshot: RwLock<Arc<KnowledgeSnapshot>>,
    writer: Mutex<()>,
}

impl KnowledgeStore {
    /// Load (or seed) the store at `path` and build its embedding matrix
    pub async fn open(path: impl Into<PathBuf>, embedder: Arc<Embedder>) -> AppResult<Self> {
        let path = path.into();
        let records = Self::load(&path).await?;
        let store = Self {
            path,
            embedder,
            snapshot: RwLock::new(Arc::new(KnowledgeSnapshot::default())),
            writer: Mutex::new(()),
        };

        let _guard = store.writer.lock().await;
        store.rebuild_from(records).await?;
        drop(_guard);

        info!(
            path = %store.path.display(),
            records = store.len().await,
            "Knowledge store ready"
        );
        Ok(store)
    }

    /// Read persisted records, seeding and persisting the default set if the file is missing
    pub async fn load(path: &Path) -> AppResult<Vec<KnowledgeRecord>> {
        if fs::try_exists(path).await? {
            let content = fs::read_to_string(path).await?;
            let records: Vec<KnowledgeRecord> = serde_json::from_str(&content)?;
            debug!(count = records.len(), "Loaded knowledge records");
            return Ok(records);
        }

        info!(path = %path.display(), "No knowledge file found, seeding defaults");
        let records = default_records();
        Self::persist(path, &records).await?;
        Ok(records)
    }

    async fn persist(path: &Path, records: &[KnowledgeRecord]) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(records)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> Arc<KnowledgeSnapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.len()
    }

    pub async fn records(&self) -> Vec<KnowledgeRecord> {
        self.snapshot().await.records.clone()
    }

    /// Append a record with the next free id, persist, and rebuild the matrix
    pub async fn add(
        &self,
        kind: impl Into<KnowledgeType>,
        tags: Vec<String>,
        content: impl Into<String>,
    ) -> AppResult<KnowledgeRecord> {
        let _guard = self.writer.lock().await;

        let mut records = self.snapshot().await.records.clone();
        let id = records.iter().map(|r| r.id).max().map_or(1, |max| max + 1);
        let record = KnowledgeRecord {
            id,
            kind: kind.into(),
            tags,
            content: content.into(),
            embedding: None,
        };
        records.push(record.clone());
        Self::persist(&self.path, &records).await?;

        self.rebuild_from(records).await?;
        info!(id, kind = %record.kind, "Added knowledge record");
        Ok(record)
    }

    /// Embed every record lacking a correctly-sized backend vector; returns the matrix in record order
    pub async fn rebuild_vectors(&self) -> AppResult<Vec<Vec<f32>>> {
        let _guard = self.writer.lock().await;
        let records = self.snapshot().await.records.clone();
        let snapshot = self.rebuild_from(records).await?;
        Ok(snapshot.matrix.clone())
    }

    // Caller must hold the writer lock
    async fn rebuild_from(&self, mut records: Vec<KnowledgeRecord>) -> AppResult<Arc<KnowledgeSnapshot>> {
        let dimension = self.embedder.dimension();
        let mut matrix = Vec::with_capacity(records.len());
        let mut embedded = 0usize;
        let mut fallback_rows = 0usize;

        for record in records.iter_mut() {
            if record.has_embedding_of(dimension) {
                matrix.push(record.embedding.clone().unwrap_or_default());
                continue;
            }

            let text = record.embedding_text();
            match self.embedder.embed_checked(&text).await {
                Ok(vector) => {
                    record.embedding = Some(vector.clone());
                    matrix.push(vector);
                    embedded += 1;
                }
                Err(e) => {
                    if self.embedder.has_backend() {
                        warn!(id = record.id, error = %e, "Record not embedded, using hashed row until next rebuild");
                    }
                    matrix.push(self.embedder.fallback(&text));
                    fallback_rows += 1;
                }
            }
        }

        if embedded > 0 {
            Self::persist(&self.path, &records).await?;
        }

        let snapshot = Arc::new(KnowledgeSnapshot {
            records,
            matrix,
            fallback_rows,
        });
        *self.snapshot.write().await = Arc::clone(&snapshot);
        debug!(rows = snapshot.matrix.len(), embedded, fallback_rows, "Rebuilt embedding matrix");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{hashed_embedding, EmbeddingBackend};
    use crate::types::AppError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    const DIM: usize = 32;

    async fn open_store(dir: &TempDir) -> KnowledgeStore {
        let path = dir.path().join("data").join("knowledge_db.json");
        KnowledgeStore::open(path, Arc::new(Embedder::hashed(DIM)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_seeds_defaults_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.matrix.len(), 4);
        assert!(snapshot.matrix.iter().all(|row| row.len() == DIM));

        // hashed rows live only in memory
        assert_eq!(snapshot.fallback_rows, 4);
        let on_disk = KnowledgeStore::load(store.path()).await.unwrap();
        assert_eq!(on_disk.len(), 4);
        assert!(on_disk.iter().all(|r| r.embedding.is_none()));
    }

    #[tokio::test]
    async fn test_add_assigns_next_id_and_rebuilds() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let record = store
            .add("fragment", vec!["测试".to_string()], "新内容")
            .await
            .unwrap();
        assert_eq!(record.id, 5);
        assert_eq!(record.kind, KnowledgeType::Fragment);

        let matrix = store.rebuild_vectors().await.unwrap();
        assert_eq!(matrix.len(), 5);
        assert!(matrix.iter().all(|row| row.len() == DIM));

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.records.len(), snapshot.matrix.len());
        assert_eq!(snapshot.records[4].content, "新内容");
    }

    #[tokio::test]
    async fn test_reopen_keeps_added_records() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            store.add("fragment", vec![], "第五条").await.unwrap();
        }
        let store = open_store(&dir).await;
        let records = store.records().await;
        assert_eq!(records.len(), 5);
        assert_eq!(records[4].id, 5);
    }

    #[tokio::test]
    async fn test_add_to_empty_store_starts_at_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.json");
        tokio::fs::write(&path, "[]").await.unwrap();

        let store = KnowledgeStore::open(&path, Arc::new(Embedder::hashed(DIM)))
            .await
            .unwrap();
        assert_eq!(store.len().await, 0);

        let record = store.add("protein_workflow", vec![], "首条").await.unwrap();
        assert_eq!(record.id, 1);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_reembedded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.json");
        let mut records = default_records();
        records[0].embedding = Some(vec![1.0, 0.0]);
        tokio::fs::write(&path, serde_json::to_string(&records).unwrap())
            .await
            .unwrap();

        let store = KnowledgeStore::open(&path, Arc::new(Embedder::hashed(DIM)))
            .await
            .unwrap();
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.matrix[0].len(), DIM);
    }

    #[tokio::test]
    async fn test_readers_keep_old_snapshot_across_add() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let before = store.snapshot().await;
        store.add("fragment", vec![], "并发读取").await.unwrap();

        assert_eq!(before.records.len(), 4);
        assert_eq!(before.matrix.len(), 4);
        assert_eq!(store.snapshot().await.matrix.len(), 5);
    }

    /// Backend that can be switched off and back on
    struct SwitchableBackend {
        online: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EmbeddingBackend for SwitchableBackend {
        async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(AppError::ProviderUnavailable("connection refused".to_string()));
            }
            let mut v = vec![0.0f32; DIM];
            v[text.chars().count() % DIM] = 1.0;
            Ok(v)
        }

        fn name(&self) -> &str {
            "switchable"
        }
    }

    fn switchable_embedder(online: &Arc<AtomicBool>) -> Arc<Embedder> {
        let backend = SwitchableBackend {
            online: Arc::clone(online),
        };
        Arc::new(Embedder::new(Some(Box::new(backend)), DIM))
    }

    #[tokio::test]
    async fn test_outage_vectors_are_replaced_after_recovery() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.json");
        let online = Arc::new(AtomicBool::new(false));

        let store = KnowledgeStore::open(&path, switchable_embedder(&online))
            .await
            .unwrap();
        let snapshot = store.snapshot().await;
        let text = snapshot.records[0].embedding_text();
        assert!(snapshot.is_degraded());
        assert_eq!(snapshot.matrix[0], hashed_embedding(&text, DIM));
        let on_disk = KnowledgeStore::load(&path).await.unwrap();
        assert!(on_disk.iter().all(|r| r.embedding.is_none()));

        online.store(true, Ordering::SeqCst);
        let mut expected = vec![0.0f32; DIM];
        expected[text.chars().count() % DIM] = 1.0;

        let matrix = store.rebuild_vectors().await.unwrap();
        assert_eq!(matrix[0], expected);
        assert!(!store.snapshot().await.is_degraded());
        drop(store);

        let reopened = KnowledgeStore::open(&path, switchable_embedder(&online))
            .await
            .unwrap();
        assert_eq!(reopened.snapshot().await.matrix[0], expected);
        let on_disk = KnowledgeStore::load(&path).await.unwrap();
        assert_eq!(on_disk[0].embedding.as_deref(), Some(expected.as_slice()));
    }
}
