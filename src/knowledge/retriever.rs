//! Retriever
//!
//! Ranks the knowledge store against a query. The primary path embeds the
//! query and scores every matrix row by cosine similarity. A tag/word overlap
//! score is used instead whenever that path cannot produce backend-quality
//! scores: keyword mode is configured, the store holds hashed rows, the query
//! embedding fails, or the matrix is unusable.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embeddings::Embedder;
use crate::knowledge::record::KnowledgeType;
use crate::knowledge::store::{KnowledgeSnapshot, KnowledgeStore};
use crate::types::{AppError, AppResult};

/// Ceiling for keyword-overlap scores, keeps them below confident vector matches
const KEYWORD_SCORE_CAP: f32 = 0.9;
const KEYWORD_SCORE_SCALE: f32 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub id: u64,
    pub content: String,
    /// In [0, 1]
    pub similarity: f32,
    #[serde(rename = "type")]
    pub kind: KnowledgeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    Vector,
    Keyword,
}

impl RetrievalMode {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "vector" => Some(RetrievalMode::Vector),
            "keyword" => Some(RetrievalMode::Keyword),
            _ => None,
        }
    }
}

pub struct Retriever {
    store: Arc<KnowledgeStore>,
    embedder: Arc<Embedder>,
    mode: RetrievalMode,
}

impl Retriever {
    pub fn new(store: Arc<KnowledgeStore>, embedder: Arc<Embedder>, mode: RetrievalMode) -> Self {
        Self { store, embedder, mode }
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// Top `top_k` records by descending similarity; ties keep store order
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Vec<RetrievalResult> {
        let snapshot = self.store.snapshot().await;
        if snapshot.is_empty() || top_k == 0 {
            return Vec::new();
        }

        if self.mode == RetrievalMode::Keyword {
            return keyword_rank(&snapshot, query, top_k);
        }
        if snapshot.is_degraded() {
            debug!(
                fallback_rows = snapshot.fallback_rows,
                "Store holds hashed rows, using keyword overlap"
            );
            return keyword_rank(&snapshot, query, top_k);
        }

        let query_vector = match self.embedder.embed_checked(query).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "Query embedding unavailable, using keyword overlap");
                return keyword_rank(&snapshot, query, top_k);
            }
        };
        match vector_rank(&snapshot, &query_vector, top_k) {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Vector retrieval unavailable, using keyword overlap");
                keyword_rank(&snapshot, query, top_k)
            }
        }
    }

    /// Keyword-overlap ranking against the current snapshot
    pub async fn retrieve_by_keywords(&self, query: &str, top_k: usize) -> Vec<RetrievalResult> {
        let snapshot = self.store.snapshot().await;
        keyword_rank(&snapshot, query, top_k)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn vector_rank(
    snapshot: &KnowledgeSnapshot,
    query_vector: &[f32],
    top_k: usize,
) -> AppResult<Vec<RetrievalResult>> {
    if snapshot.matrix.is_empty() {
        return Err(AppError::EmptyCorpus);
    }
    if snapshot.matrix.len() != snapshot.records.len() {
        return Err(AppError::MalformedResponse(format!(
            "embedding matrix has {} rows for {} records",
            snapshot.matrix.len(),
            snapshot.records.len()
        )));
    }
    if let Some(row) = snapshot.matrix.iter().find(|row| row.len() != query_vector.len()) {
        return Err(AppError::MalformedResponse(format!(
            "query dimension {} does not match stored dimension {}",
            query_vector.len(),
            row.len()
        )));
    }

    let scores: Vec<f32> = snapshot
        .matrix
        .iter()
        .map(|row| cosine_similarity(query_vector, row))
        .collect();
    debug!(?scores, "Vector similarities");

    Ok(take_top(snapshot, scores.into_iter().enumerate().collect(), top_k))
}

/// +1 per tag found in the query, +0.5 if any query word occurs in the content,
/// then divided by 3 and capped at 0.9.
pub fn keyword_score(query_lower: &str, query_words: &[&str], tags: &[String], content: &str) -> f32 {
    let tag_hits = tags
        .iter()
        .filter(|tag| !tag.is_empty() && query_lower.contains(&tag.to_lowercase()))
        .count() as f32;

    let content_lower = content.to_lowercase();
    let word_bonus = if query_words.iter().any(|w| content_lower.contains(w)) {
        0.5
    } else {
        0.0
    };

    ((tag_hits + word_bonus) / KEYWORD_SCORE_SCALE).min(KEYWORD_SCORE_CAP)
}

/// Records with a positive overlap score only
pub fn keyword_rank(snapshot: &KnowledgeSnapshot, query: &str, top_k: usize) -> Vec<RetrievalResult> {
    let query_lower = query.to_lowercase();
    let query_words: Vec<&str> = query_lower.split_whitespace().collect();

    let scores: Vec<(usize, f32)> = snapshot
        .records
        .iter()
        .map(|r| keyword_score(&query_lower, &query_words, &r.tags, &r.content))
        .enumerate()
        .filter(|(_, score)| *score > 0.0)
        .collect();

    take_top(snapshot, scores, top_k)
}

/// `ranked` pairs a record index with its score
fn take_top(snapshot: &KnowledgeSnapshot, mut ranked: Vec<(usize, f32)>, top_k: usize) -> Vec<RetrievalResult> {
    // sort_by is stable, so equal scores keep store order
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    ranked
        .into_iter()
        .take(top_k)
        .map(|(idx, score)| {
            let record = &snapshot.records[idx];
            RetrievalResult {
                id: record.id,
                content: record.content.clone(),
                similarity: if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 },
                kind: record.kind.clone(),
            }
        })
        .collect()
}

/// Bulleted knowledge block injected into stage prompts
pub fn format_bullets(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return "未找到相关信息".to_string();
    }
    results
        .iter()
        .map(|r| format!("• {} (相似度: {:.3})", r.content, r.similarity))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{l2_normalize, EmbeddingBackend};
    use crate::knowledge::record::{default_records, KnowledgeRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    const DIM: usize = 512;

    /// Bag-of-characters backend: texts sharing characters point the same way
    struct CharBagBackend;

    #[async_trait]
    impl EmbeddingBackend for CharBagBackend {
        async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
            let mut v = vec![0.0f32; DIM];
            for c in text.to_lowercase().chars().filter(|c| c.is_alphanumeric()) {
                v[c as usize % DIM] += 1.0;
            }
            l2_normalize(&mut v);
            Ok(v)
        }

        fn name(&self) -> &str {
            "char-bag"
        }
    }

    /// Char-bag vectors while online, connection errors otherwise
    struct SwitchableBackend {
        online: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EmbeddingBackend for SwitchableBackend {
        async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(AppError::ProviderUnavailable("connection refused".to_string()));
            }
            CharBagBackend.embed(text).await
        }

        fn name(&self) -> &str {
            "switchable"
        }
    }

    async fn retriever(dir: &TempDir, mode: RetrievalMode) -> Retriever {
        let embedder = Arc::new(Embedder::new(Some(Box::new(CharBagBackend)), DIM));
        let store = KnowledgeStore::open(dir.path().join("kb.json"), Arc::clone(&embedder))
            .await
            .unwrap();
        Retriever::new(Arc::new(store), embedder, mode)
    }

    fn position(results: &[RetrievalResult], id: u64) -> usize {
        results.iter().position(|r| r.id == id).unwrap_or(usize::MAX)
    }

    #[tokio::test]
    async fn test_protein_query_prefers_protein_workflow_by_vector() {
        let dir = TempDir::new().unwrap();
        let retriever = retriever(&dir, RetrievalMode::Vector).await;

        let results = retriever.retrieve("蛋白质结构预测流程", 4).await;
        assert_eq!(results.len(), 4);
        assert!(position(&results, 1) < position(&results, 4));
    }

    #[tokio::test]
    async fn test_protein_query_prefers_protein_workflow_by_keyword() {
        let dir = TempDir::new().unwrap();
        let retriever = retriever(&dir, RetrievalMode::Keyword).await;

        let results = retriever.retrieve("蛋白质结构预测流程", 4).await;
        let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!((results[0].similarity - 2.0 / 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hash_only_embedder_ranks_by_keywords() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(Embedder::hashed(384));
        let store = KnowledgeStore::open(dir.path().join("kb.json"), Arc::clone(&embedder))
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::new(store), embedder, RetrievalMode::Vector);

        let results = retriever.retrieve("蛋白质结构预测流程", 4).await;
        let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!((results[0].similarity - 2.0 / 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_embedding_failure_uses_keywords() {
        let dir = TempDir::new().unwrap();
        let online = Arc::new(AtomicBool::new(true));
        let backend = SwitchableBackend {
            online: Arc::clone(&online),
        };
        let embedder = Arc::new(Embedder::new(Some(Box::new(backend)), DIM));
        let store = KnowledgeStore::open(dir.path().join("kb.json"), Arc::clone(&embedder))
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::new(store), embedder, RetrievalMode::Vector);
        assert!(!retriever.store().snapshot().await.is_degraded());

        online.store(false, Ordering::SeqCst);
        let results = retriever.retrieve("BLAST 基因注释", 4).await;
        let snapshot = retriever.store().snapshot().await;
        assert_eq!(results, keyword_rank(&snapshot, "BLAST 基因注释", 4));
        assert_eq!(results[0].id, 4);
    }

    #[test]
    fn test_keyword_rank_drops_unmatched_records() {
        let snapshot = KnowledgeSnapshot {
            records: default_records(),
            ..Default::default()
        };
        let results = keyword_rank(&snapshot, "BLAST", 3);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 4);
        assert!((results[0].similarity - 0.5 / 3.0).abs() < 1e-6);

        assert!(keyword_rank(&snapshot, "cryo-EM", 3).is_empty());
    }

    #[tokio::test]
    async fn test_results_bounded_and_sorted() {
        let dir = TempDir::new().unwrap();
        let retriever = retriever(&dir, RetrievalMode::Vector).await;

        for top_k in 0..6 {
            let results = retriever.retrieve("BLAST 基因注释", top_k).await;
            assert!(results.len() <= top_k);
            assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));
            assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.similarity)));
        }
    }

    #[tokio::test]
    async fn test_empty_store_returns_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.json");
        tokio::fs::write(&path, "[]").await.unwrap();
        let embedder = Arc::new(Embedder::hashed(DIM));
        let store = KnowledgeStore::open(&path, Arc::clone(&embedder)).await.unwrap();
        let retriever = Retriever::new(Arc::new(store), embedder, RetrievalMode::Vector);

        assert!(retriever.retrieve("anything", 3).await.is_empty());
    }

    #[test]
    fn test_keyword_score_rules() {
        let tags = vec!["PDB".to_string(), "结构预测".to_string()];
        let query = "下载 pdb 文件";
        let words: Vec<&str> = query.split_whitespace().collect();

        // one tag hit plus a content word hit
        let score = keyword_score(query, &words, &tags, "提供 PDB 文件下载");
        assert!((score - 1.5 / 3.0).abs() < 1e-6);

        // capped at 0.9
        let many: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let score = keyword_score("abcd", &["abcd"], &many, "abcd");
        assert!((score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_vector_rank_ties_keep_store_order() {
        let snapshot = KnowledgeSnapshot {
            records: default_records(),
            matrix: vec![vec![1.0, 0.0]; 4],
            fallback_rows: 0,
        };
        let results = vector_rank(&snapshot, &[1.0, 0.0], 4).unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_vector_rank_dimension_mismatch() {
        let snapshot = KnowledgeSnapshot {
            records: vec![KnowledgeRecord::new(1, "fragment", &[], "x")],
            matrix: vec![vec![1.0, 0.0, 0.0]],
            fallback_rows: 0,
        };
        assert!(matches!(
            vector_rank(&snapshot, &[1.0, 0.0], 1),
            Err(AppError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_format_bullets() {
        assert_eq!(format_bullets(&[]), "未找到相关信息");
        let results = vec![RetrievalResult {
            id: 3,
            content: "使用AlphaFold2".to_string(),
            similarity: 0.5,
            kind: KnowledgeType::Fragment,
        }];
        assert_eq!(format_bullets(&results), "• 使用AlphaFold2 (相似度: 0.500)");
    }
}
