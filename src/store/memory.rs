//! In-memory [`Store`] implementation.
//!
//! All state lives behind one `tokio::sync::RwLock`, so every operation is
//! atomic with respect to the others. Vector search is brute-force cosine
//! similarity over all stored vectors.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{rank, Store};
use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{EmbeddingRecord, ScoredChunk, ScriptArtifact, StoreCounts, TestCase};

#[derive(Default)]
struct State {
    records: Vec<EmbeddingRecord>,
    test_cases: Vec<TestCase>,
    scripts: Vec<ScriptArtifact>,
}

/// Process-local store, lost on exit.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn append(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        self.state.write().await.records.extend(records);
        Ok(())
    }

    async fn replace(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        let mut state = self.state.write().await;
        *state = State {
            records,
            ..State::default()
        };
        Ok(())
    }

    async fn record_count(&self) -> Result<usize> {
        Ok(self.state.read().await.records.len())
    }

    async fn dims(&self) -> Result<Option<usize>> {
        Ok(self
            .state
            .read()
            .await
            .records
            .first()
            .map(|r| r.vector.len()))
    }

    async fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let state = self.state.read().await;
        let candidates = state
            .records
            .iter()
            .map(|record| ScoredChunk {
                chunk: record.chunk.clone(),
                score: cosine_similarity(query, &record.vector),
            })
            .collect();
        Ok(rank(candidates, k))
    }

    async fn clear(&self) -> Result<()> {
        *self.state.write().await = State::default();
        Ok(())
    }

    async fn put_test_cases(&self, cases: &[TestCase]) -> Result<()> {
        let mut state = self.state.write().await;
        for case in cases {
            match state.test_cases.iter().position(|c| c.id == case.id) {
                Some(i) => state.test_cases[i] = case.clone(),
                None => state.test_cases.push(case.clone()),
            }
        }
        Ok(())
    }

    async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>> {
        Ok(self
            .state
            .read()
            .await
            .test_cases
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn list_test_cases(&self) -> Result<Vec<TestCase>> {
        Ok(self.state.read().await.test_cases.clone())
    }

    async fn put_script(&self, script: &ScriptArtifact) -> Result<()> {
        self.state.write().await.scripts.push(script.clone());
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let state = self.state.read().await;
        Ok(StoreCounts {
            records: state.records.len(),
            test_cases: state.test_cases.len(),
            scripts: state.scripts.len(),
        })
    }

    async fn close(&self) {}
}
