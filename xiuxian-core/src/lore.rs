//! Semantic lore retrieval for grounding generated scenes.
//!
//! The [`LoreStore`] reads every markdown/text document under a directory
//! into an in-memory vector index at startup and answers top-k
//! nearest-neighbor queries by cosine similarity. A missing or empty
//! directory makes the store unavailable, not broken: generation degrades
//! to a generic context string instead of failing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error from an embedding provider.
#[derive(Debug, Error)]
#[error("embedding error: {0}")]
pub struct EmbedError(pub String);

/// Generate vector embeddings from text.
///
/// The production implementation is the OpenAI client; tests use a stub.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

#[async_trait]
impl Embedder for openai::OpenAi {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        openai::OpenAi::embed(self, texts)
            .await
            .map_err(|e| EmbedError(e.to_string()))
    }
}

/// Errors from a lore query.
#[derive(Debug, Error)]
pub enum LoreError {
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),
}

/// One retrieved document.
#[derive(Debug, Clone)]
pub struct LoreHit {
    /// Full document content.
    pub content: String,
    /// Path of the document relative to the lore directory.
    pub source: String,
    /// Cosine similarity against the query, in [-1, 1].
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexedDoc {
    content: String,
    source: String,
    embedding: Vec<f32>,
}

/// An in-memory semantic index over a directory of lore documents.
///
/// Read-mostly after construction; safe to share behind an `Arc` across
/// concurrent turns.
pub struct LoreStore {
    embedder: Arc<dyn Embedder>,
    docs: Vec<IndexedDoc>,
}

impl LoreStore {
    /// Build the index from every `.md` and `.txt` file under `dir`,
    /// recursively. Never fails: a missing directory, unreadable files,
    /// or an embedding failure all produce an unavailable (empty) store.
    pub async fn build(dir: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Self {
        let dir = dir.as_ref();
        let documents = collect_documents(dir).await;

        if documents.is_empty() {
            tracing::info!(dir = %dir.display(), "no lore documents found, store unavailable");
            return Self {
                embedder,
                docs: Vec::new(),
            };
        }

        let texts: Vec<String> = documents.iter().map(|(_, content)| content.clone()).collect();
        let embeddings = match embedder.embed(&texts).await {
            Ok(embeddings) if embeddings.len() == documents.len() => embeddings,
            Ok(_) => {
                tracing::warn!("embedder returned a mismatched batch, store unavailable");
                return Self {
                    embedder,
                    docs: Vec::new(),
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to embed lore documents, store unavailable");
                return Self {
                    embedder,
                    docs: Vec::new(),
                };
            }
        };

        let docs = documents
            .into_iter()
            .zip(embeddings)
            .map(|((source, content), embedding)| IndexedDoc {
                content,
                source,
                embedding,
            })
            .collect::<Vec<_>>();

        tracing::info!(count = docs.len(), "lore index built");
        Self { embedder, docs }
    }

    /// Whether any documents are indexed.
    pub fn is_available(&self) -> bool {
        !self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// The `k` documents nearest to `query_text`, best first. Ties keep
    /// index order, so results are stable for a given index.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<LoreHit>, LoreError> {
        if self.docs.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = self
            .embedder
            .embed(std::slice::from_ref(&query_text.to_string()))
            .await?;
        let query = query
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError("embedder returned no vector for query".to_string()))?;

        let mut scored: Vec<(usize, f32)> = self
            .docs
            .iter()
            .enumerate()
            .map(|(i, doc)| (i, cosine_similarity(&query, &doc.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, score)| LoreHit {
                content: self.docs[i].content.clone(),
                source: self.docs[i].source.clone(),
                score,
            })
            .collect())
    }
}

/// Recursively gather `(relative path, content)` pairs for every markdown
/// or plain-text file under `root`. Unreadable entries are skipped with a
/// warning.
async fn collect_documents(root: &Path) -> Vec<(String, String)> {
    let mut documents = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if dir == root {
                    tracing::info!(dir = %root.display(), error = %e, "lore directory not readable");
                } else {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping lore subdirectory");
                }
                continue;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let is_lore = path
                .extension()
                .map(|ext| ext == "md" || ext == "txt")
                .unwrap_or(false);
            if !is_lore {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let source = path
                        .strip_prefix(root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .to_string();
                    documents.push((source, content));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable lore file");
                }
            }
        }
    }

    // Deterministic index order regardless of directory walk order.
    documents.sort_by(|a, b| a.0.cmp(&b.0));
    documents
}

/// Cosine similarity between two vectors, with a zero-magnitude guard.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut mag_a = 0.0_f32;
    let mut mag_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Embeds each text as a character histogram so similar strings get
    /// similar vectors without a model.
    struct HistogramEmbedder;

    #[async_trait]
    impl Embedder for HistogramEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0_f32; 26];
                    for c in t.chars().flat_map(|c| c.to_lowercase()) {
                        if c.is_ascii_lowercase() {
                            v[(c as u8 - b'a') as usize] += 1.0;
                        }
                    }
                    v
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError("service down".to_string()))
        }
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_zero_magnitude_guard() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_missing_directory_is_unavailable_not_fatal() {
        let store = LoreStore::build("/definitely/not/here", Arc::new(HistogramEmbedder)).await;
        assert!(!store.is_available());
        let hits = store.search("anything", 2).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_embed_failure_during_build_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sect.md"), "The Azure Cloud Sect").unwrap();

        let store = LoreStore::build(dir.path(), Arc::new(FailingEmbedder)).await;
        assert!(!store.is_available());
    }

    #[tokio::test]
    async fn test_build_and_search_ranks_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("swords.md"), "sword sword sword blade").unwrap();
        std::fs::write(dir.path().join("pills.md"), "pill alchemy cauldron elixir").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/more_swords.txt"), "sword blade edge").unwrap();
        std::fs::write(dir.path().join("ignored.png"), "binary").unwrap();

        let store = LoreStore::build(dir.path(), Arc::new(HistogramEmbedder)).await;
        assert_eq!(store.len(), 3);

        let hits = store.search("sword blade", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert!(hits.iter().all(|h| h.content.contains("sword")));
    }

    #[tokio::test]
    async fn test_source_is_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("realms")).unwrap();
        std::fs::write(dir.path().join("realms/mortal.md"), "the mortal realm").unwrap();

        let store = LoreStore::build(dir.path(), Arc::new(HistogramEmbedder)).await;
        let hits = store.search("mortal realm", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].source.ends_with("mortal.md"));
        assert!(!hits[0].source.starts_with('/'));
    }
}
