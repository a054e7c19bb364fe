//! The knowledge index: embedded chunks plus the locking discipline around
//! them.
//!
//! Writers are serialized by a mutex. Embedding happens before the write
//! gate is taken, so readers are only blocked for the store commit. The
//! gate is a read/write lock: retrieval holds it for reading across its
//! emptiness check, query embedding and search, which means a concurrent
//! add or rebuild is observed either entirely or not at all.
//!
//! Every rebuild and clear advances the index epoch. Generated artifacts are
//! committed against the epoch their context was retrieved in, so output
//! from a request that straddled a reset is dropped instead of landing in
//! the new index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{
    Chunk, EmbeddingRecord, Phase, ScoredChunk, ScriptArtifact, StoreCounts, TestCase,
};
use crate::store::Store;

pub struct KnowledgeIndex {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    gate: RwLock<()>,
    writer: Mutex<()>,
    epoch: AtomicU64,
}

impl KnowledgeIndex {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
            gate: RwLock::new(()),
            writer: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed and append `chunks`. Either all of them become visible or none.
    ///
    /// Returns the number of records added.
    pub async fn add(&self, chunks: Vec<Chunk>) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let records = self.embed_chunks(chunks).await?;
        if records.is_empty() {
            return Ok(0);
        }

        let _gate = self.gate.write().await;
        if let (Some(expected), Some(first)) = (self.store.dims().await?, records.first()) {
            check_dims(expected, first.vector.len())?;
        }
        let added = records.len();
        self.store.append(records).await?;
        tracing::info!(records = added, "index updated");
        Ok(added)
    }

    /// Replace the whole index with `chunks`, dropping generated artifacts.
    ///
    /// If embedding fails the previous index is left untouched.
    pub async fn rebuild(&self, chunks: Vec<Chunk>) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let records = self.embed_chunks(chunks).await?;
        let added = records.len();

        let _gate = self.gate.write().await;
        self.store.replace(records).await?;
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(records = added, epoch, "index rebuilt");
        Ok(added)
    }

    /// Remove every record and artifact.
    pub async fn clear(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let _gate = self.gate.write().await;
        self.store.clear().await?;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Current epoch; advanced by [`rebuild`](Self::rebuild) and
    /// [`clear`](Self::clear), never by [`add`](Self::add).
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Store `cases` unless the index was rebuilt or cleared since `epoch`.
    pub async fn commit_test_cases(&self, epoch: u64, cases: &[TestCase]) -> Result<()> {
        let _gate = self.gate.read().await;
        self.check_epoch(epoch)?;
        self.store.put_test_cases(cases).await
    }

    /// Store `script` unless the index was rebuilt or cleared since `epoch`.
    pub async fn commit_script(&self, epoch: u64, script: &ScriptArtifact) -> Result<()> {
        let _gate = self.gate.read().await;
        self.check_epoch(epoch)?;
        self.store.put_script(script).await
    }

    fn check_epoch(&self, started: u64) -> Result<()> {
        let current = self.epoch();
        if current != started {
            tracing::warn!(
                started,
                current,
                "discarding output generated against a replaced index"
            );
            return Err(Error::IndexChanged);
        }
        Ok(())
    }

    /// Embed `query` and return the `k` nearest records.
    ///
    /// Fails with [`Error::EmptyIndex`] when nothing has been indexed; `k = 0`
    /// against a non-empty index yields an empty list.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let _gate = self.gate.read().await;

        let Some(expected) = self.store.dims().await? else {
            return Err(Error::EmptyIndex);
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(Error::EmbeddingService)?;
        check_dims(expected, vector.len())?;

        self.store.vector_search(&vector, k).await
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        self.store.counts().await
    }

    pub async fn phase(&self) -> Result<Phase> {
        Ok(self.counts().await?.phase())
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddingRecord>> {
        let mut records = Vec::with_capacity(chunks.len());
        let mut dims: Option<usize> = None;

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(Error::EmbeddingService)?;

            for (chunk, vector) in batch.iter().zip(vectors) {
                let expected = *dims.get_or_insert(vector.len());
                check_dims(expected, vector.len())?;
                records.push(EmbeddingRecord {
                    chunk: chunk.clone(),
                    vector,
                });
            }
            tracing::debug!(embedded = records.len(), total = chunks.len(), "embedding batch done");
        }

        Ok(records)
    }
}

fn check_dims(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::DimensionMismatch { expected, actual });
    }
    Ok(())
}
