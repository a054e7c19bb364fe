//! Core data models that flow through the pipeline.
//!
//! Documents are parsed into [`Chunk`]s, chunks are embedded into
//! [`EmbeddingRecord`]s owned by the index, retrieval yields a
//! [`RetrievalResult`], and generation produces [`TestCase`]s and
//! [`ScriptArtifact`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::parse::DocumentFormat;

/// An uploaded artifact before normalization.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Unique per uploaded artifact (usually the file name).
    pub source_id: String,
    pub format: DocumentFormat,
    pub content: Vec<u8>,
}

impl SourceDocument {
    pub fn new(source_id: impl Into<String>, format: DocumentFormat, content: Vec<u8>) -> Self {
        Self {
            source_id: source_id.into(),
            format,
            content,
        }
    }
}

/// An overlapping word window of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    /// 0-based position within the source document.
    pub chunk_index: usize,
    pub word_count: usize,
    /// Number of leading words shared with the previous chunk.
    pub overlap_with_predecessor: usize,
}

/// A chunk with its embedding vector, as held by the index.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    pub fn source_id(&self) -> &str {
        &self.chunk.source_id
    }

    pub fn chunk_index(&self) -> usize {
        self.chunk.chunk_index
    }
}

/// A retrieved chunk and its cosine similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Top-k chunks for a query, ordered by descending score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Distinct source ids among the hits.
    pub fn source_ids(&self) -> BTreeSet<&str> {
        self.hits.iter().map(|h| h.chunk.source_id.as_str()).collect()
    }
}

/// The document(s) a test case claims to be derived from.
///
/// Models emit a single file name most of the time and a list occasionally;
/// both shapes are accepted on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    One(String),
    Many(Vec<String>),
}

impl SourceRef {
    pub fn ids(&self) -> Vec<&str> {
        match self {
            SourceRef::One(id) => vec![id.as_str()],
            SourceRef::Many(ids) => ids.iter().map(String::as_str).collect(),
        }
    }
}

/// A structured, document-grounded test case.
///
/// Serializes to the wire shape
/// `{id, title, scenario, steps, expected, based_on}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub title: String,
    pub scenario: String,
    pub steps: Vec<String>,
    pub expected: String,
    #[serde(rename = "based_on")]
    pub grounded_in: SourceRef,
}

/// A generated automation script for one test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptArtifact {
    pub id: String,
    pub text: String,
    /// Id of the [`TestCase`] the script automates.
    pub based_on: String,
    pub framework: String,
    pub generated_at: DateTime<Utc>,
}

/// Process-wide lifecycle of the knowledge index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Empty,
    Indexed,
    TestCasesReady,
    ScriptReady,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Empty => "EMPTY",
            Phase::Indexed => "INDEXED",
            Phase::TestCasesReady => "TEST_CASES_READY",
            Phase::ScriptReady => "SCRIPT_READY",
        };
        f.write_str(s)
    }
}

/// Row counts of the persistent store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub records: usize,
    pub test_cases: usize,
    pub scripts: usize,
}

impl StoreCounts {
    pub fn phase(&self) -> Phase {
        if self.records == 0 {
            Phase::Empty
        } else if self.scripts > 0 {
            Phase::ScriptReady
        } else if self.test_cases > 0 {
            Phase::TestCasesReady
        } else {
            Phase::Indexed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_wire_shape_uses_based_on() {
        let tc = TestCase {
            id: "TC001".into(),
            title: "Apply code".into(),
            scenario: "User applies SAVE15".into(),
            steps: vec!["Open cart".into(), "Enter code".into()],
            expected: "Total drops by 15%".into(),
            grounded_in: SourceRef::One("product_specs.md".into()),
        };
        let v = serde_json::to_value(&tc).unwrap();
        assert_eq!(v["based_on"], "product_specs.md");
        assert!(v.get("grounded_in").is_none());
    }

    #[test]
    fn source_ref_accepts_both_shapes() {
        let one: SourceRef = serde_json::from_str("\"a.md\"").unwrap();
        let many: SourceRef = serde_json::from_str("[\"a.md\", \"b.txt\"]").unwrap();
        assert_eq!(one.ids(), vec!["a.md"]);
        assert_eq!(many.ids(), vec!["a.md", "b.txt"]);
    }

    #[test]
    fn phase_follows_counts() {
        let mut c = StoreCounts::default();
        assert_eq!(c.phase(), Phase::Empty);
        c.records = 4;
        assert_eq!(c.phase(), Phase::Indexed);
        c.test_cases = 2;
        assert_eq!(c.phase(), Phase::TestCasesReady);
        c.scripts = 1;
        assert_eq!(c.phase(), Phase::ScriptReady);
        assert_eq!(Phase::TestCasesReady.to_string(), "TEST_CASES_READY");
    }
}
