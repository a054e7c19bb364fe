//! The three boundary operations: `build_index`, `generate_test_cases` and
//! `generate_script`.
//!
//! [`Pipeline`] owns the knowledge index and both generators. The CLI and
//! the HTTP server are thin wrappers over it.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::chunk::{chunk_text, ChunkConfig};
use crate::config::{Config, RetrievalConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{Error, Result};
use crate::generation::{create_generator, Generator};
use crate::index::KnowledgeIndex;
use crate::models::{Phase, RetrievalResult, ScriptArtifact, SourceDocument, StoreCounts, TestCase};
use crate::parse::normalize;
use crate::retrieve::retrieve;
use crate::script::{ScriptSettings, ScriptSynthesizer};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::testcases::{GenerationSettings, TestCaseGenerator};

/// Outcome of [`Pipeline::build_index`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks_added: usize,
}

/// Tunables that are not tied to a particular service.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub batch_size: usize,
    pub generation: GenerationSettings,
    pub script: ScriptSettings,
    /// k used for script context when the caller gives none.
    pub script_k: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunking: ChunkConfig::default(),
            retrieval: RetrievalConfig::default(),
            batch_size: 64,
            generation: GenerationSettings::default(),
            script: ScriptSettings::default(),
            script_k: 2,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        let generation = GenerationSettings {
            max_tokens: config.generation.max_tokens,
            temperature: config.generation.temperature,
            max_context_chars: config.generation.max_context_chars,
        };
        Self {
            chunking: config.chunking.chunk_config(),
            retrieval: config.retrieval.clone(),
            batch_size: config.embedding.batch_size,
            generation,
            script: ScriptSettings {
                framework: config.script.framework,
                max_markup_chars: config.script.max_markup_chars,
                max_selectors: config.script.max_selectors,
                max_context_chars: config.script.max_context_chars,
                max_tokens: config.generation.max_tokens,
                temperature: config.generation.temperature,
            },
            script_k: config.script.context_k,
        }
    }
}

pub struct Pipeline {
    index: KnowledgeIndex,
    test_cases: TestCaseGenerator,
    scripts: ScriptSynthesizer,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            index: KnowledgeIndex::new(store, embedder, settings.batch_size),
            test_cases: TestCaseGenerator::new(generator.clone(), settings.generation),
            scripts: ScriptSynthesizer::new(generator, settings.script),
            settings,
        }
    }

    /// Open the configured SQLite store and service providers.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = SqliteStore::open(config).await?;
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Ok(Self::new(
            Arc::new(store),
            embedder,
            generator,
            PipelineSettings::from_config(config),
        ))
    }

    pub fn index(&self) -> &KnowledgeIndex {
        &self.index
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Parse, chunk and index `documents` as one batch.
    ///
    /// Every document is parsed and chunked before any embedding call, so a
    /// bad document or a repeated source id fails the whole batch with
    /// [`Error::IndexBuild`] and leaves the index unchanged. With `rebuild`, the batch replaces the
    /// index and all generated artifacts.
    pub async fn build_index(
        &self,
        documents: Vec<SourceDocument>,
        rebuild: bool,
    ) -> Result<BuildReport> {
        let mut seen = HashSet::new();
        let mut chunks = Vec::new();
        for doc in &documents {
            if !seen.insert(doc.source_id.as_str()) {
                return Err(Error::IndexBuild {
                    source_id: doc.source_id.clone(),
                    source: Box::new(Error::DuplicateSource(doc.source_id.clone())),
                });
            }
            let prepared = normalize(doc.format, &doc.content)
                .and_then(|text| chunk_text(&text, &doc.source_id, self.settings.chunking))
                .map_err(|e| Error::IndexBuild {
                    source_id: doc.source_id.clone(),
                    source: Box::new(e),
                })?;
            tracing::debug!(source_id = %doc.source_id, chunks = prepared.len(), "document chunked");
            chunks.extend(prepared);
        }

        let chunks_added = if rebuild {
            self.index.rebuild(chunks).await?
        } else {
            self.index.add(chunks).await?
        };

        Ok(BuildReport {
            documents: documents.len(),
            chunks_added,
        })
    }

    /// Top-k retrieval with `k` clamped into `[1, max_k]`.
    pub async fn search(&self, query: &str, k: Option<usize>) -> Result<RetrievalResult> {
        retrieve(&self.index, query, self.settings.retrieval.clamp_k(k)).await
    }

    /// Generate grounded test cases and persist them for later script
    /// requests.
    ///
    /// Fails with [`Error::IndexChanged`] and stores nothing if the index is
    /// rebuilt or reset before the cases are committed.
    pub async fn generate_test_cases(
        &self,
        request: &str,
        context_k: Option<usize>,
        max_context_chars: Option<usize>,
    ) -> Result<Vec<TestCase>> {
        let k = self.settings.retrieval.clamp_k(context_k);
        let budget = max_context_chars.unwrap_or(self.settings.generation.max_context_chars);
        let epoch = self.index.epoch();
        let cases = self
            .test_cases
            .generate_with_budget(&self.index, request, k, budget)
            .await?;
        self.index.commit_test_cases(epoch, &cases).await?;
        Ok(cases)
    }

    /// Synthesize and persist a script for a previously generated test case.
    pub async fn generate_script(
        &self,
        test_case_id: &str,
        page_markup: &str,
        context_k: Option<usize>,
    ) -> Result<ScriptArtifact> {
        if page_markup.trim().is_empty() {
            return Err(Error::MissingMarkup);
        }
        let epoch = self.index.epoch();
        let test_case = self
            .index
            .store()
            .get_test_case(test_case_id)
            .await?
            .ok_or_else(|| Error::UnknownTestCase(test_case_id.to_string()))?;

        let k = self
            .settings
            .retrieval
            .clamp_k(Some(context_k.unwrap_or(self.settings.script_k)));
        let artifact = self
            .scripts
            .synthesize(&self.index, &test_case, page_markup, k)
            .await?;
        self.index.commit_script(epoch, &artifact).await?;
        Ok(artifact)
    }

    pub async fn list_test_cases(&self) -> Result<Vec<TestCase>> {
        self.index.store().list_test_cases().await
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        self.index.counts().await
    }

    pub async fn phase(&self) -> Result<Phase> {
        self.index.phase().await
    }

    /// Drop the index and every artifact; the phase returns to `EMPTY`.
    pub async fn reset(&self) -> Result<()> {
        self.index.clear().await?;
        tracing::info!("index reset");
        Ok(())
    }

    pub async fn close(&self) {
        self.index.close().await;
    }
}
