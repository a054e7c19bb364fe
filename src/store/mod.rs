//! Storage abstraction for the knowledge index and generated artifacts.
//!
//! The [`Store`] trait holds everything the pipeline persists: embedding
//! records, generated test cases and generated scripts. Two backends are
//! provided:
//!
//! - [`memory::InMemoryStore`]: process-local, used by tests and one-shot runs.
//! - [`sqlite::SqliteStore`]: SQLite via sqlx, survives restarts.
//!
//! Vector search is brute-force cosine similarity in both backends; the
//! final ordering is always produced by [`rank`] so the backends agree on
//! ties.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::error::Result;
use crate::models::{EmbeddingRecord, ScoredChunk, ScriptArtifact, StoreCounts, TestCase};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`append`](Store::append) | Add a batch of records, all or nothing |
/// | [`replace`](Store::replace) | Clear everything and insert a batch, all or nothing |
/// | [`vector_search`](Store::vector_search) | Top-k cosine similarity over all records |
/// | [`put_test_cases`](Store::put_test_cases) | Upsert test cases by id |
/// | [`put_script`](Store::put_script) | Store a generated script |
/// | [`counts`](Store::counts) | Row counts, from which the phase is derived |
#[async_trait]
pub trait Store: Send + Sync {
    /// Append records. Either every record becomes visible or none does.
    async fn append(&self, records: Vec<EmbeddingRecord>) -> Result<()>;

    /// Drop all records, test cases and scripts, then insert `records`,
    /// in one atomic step.
    async fn replace(&self, records: Vec<EmbeddingRecord>) -> Result<()>;

    async fn record_count(&self) -> Result<usize>;

    /// Dimensionality of the stored vectors, `None` while empty.
    async fn dims(&self) -> Result<Option<usize>>;

    /// The `k` records most similar to `query`, ordered by [`rank`].
    async fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Remove all records, test cases and scripts.
    async fn clear(&self) -> Result<()>;

    async fn put_test_cases(&self, cases: &[TestCase]) -> Result<()>;

    async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>>;

    /// All stored test cases in insertion order.
    async fn list_test_cases(&self) -> Result<Vec<TestCase>>;

    async fn put_script(&self, script: &ScriptArtifact) -> Result<()>;

    async fn counts(&self) -> Result<StoreCounts>;

    /// Release backend resources. Further calls may fail.
    async fn close(&self);
}

/// Order candidates by descending score, then `source_id` ascending, then
/// `chunk_index` ascending, and keep the first `k`.
pub fn rank(mut candidates: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(compare_hits);
    candidates.truncate(k);
    candidates
}

fn compare_hits(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk.source_id.cmp(&b.chunk.source_id))
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn hit(source: &str, index: usize, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                text: format!("{}#{}", source, index),
                source_id: source.to_string(),
                chunk_index: index,
                word_count: 1,
                overlap_with_predecessor: 0,
            },
            score,
        }
    }

    #[test]
    fn rank_orders_by_score_then_provenance() {
        let ranked = rank(
            vec![
                hit("b.txt", 0, 0.5),
                hit("a.md", 2, 0.5),
                hit("a.md", 1, 0.5),
                hit("c.pdf", 0, 0.9),
                hit("d.json", 0, -0.2),
            ],
            4,
        );
        let order: Vec<(&str, usize)> = ranked
            .iter()
            .map(|h| (h.chunk.source_id.as_str(), h.chunk.chunk_index))
            .collect();
        assert_eq!(
            order,
            vec![("c.pdf", 0), ("a.md", 1), ("a.md", 2), ("b.txt", 0)]
        );
    }

    #[test]
    fn rank_with_k_larger_than_input() {
        assert_eq!(rank(vec![hit("a", 0, 0.1)], 10).len(), 1);
        assert!(rank(vec![hit("a", 0, 0.1)], 0).is_empty());
    }
}
