//! Top-k retrieval over the knowledge index.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::index::KnowledgeIndex;
use crate::models::RetrievalResult;

/// Embed `query` with the index's embedder and return the `k` most similar
/// chunks across all documents.
///
/// Results are ordered by descending cosine similarity, ties broken by
/// ascending `(source_id, chunk_index)`. Fewer than `k` hits come back when
/// the index holds fewer records. Fails with
/// [`Error::EmptyIndex`](crate::error::Error::EmptyIndex) before anything
/// has been indexed.
pub async fn retrieve(index: &KnowledgeIndex, query: &str, k: usize) -> Result<RetrievalResult> {
    let hits = index.search(query, k).await?;
    tracing::debug!(query, k, hits = hits.len(), "retrieved");
    Ok(RetrievalResult {
        query: query.to_string(),
        hits,
    })
}

/// Retrieved chunks rendered for a prompt, with the sources that made it in.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub text: String,
    /// Source ids whose chunk text appears in `text`.
    pub sources: BTreeSet<String>,
}

impl PromptContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Render hits as `### Source: <id>` blocks in rank order until
/// `max_chars` characters are used. A block that does not fit is cut at the
/// budget; it still counts as supplied if any of its text made it in.
pub fn assemble_context(result: &RetrievalResult, max_chars: usize) -> PromptContext {
    let mut context = PromptContext::default();
    let mut used = 0usize;

    for hit in &result.hits {
        let header = format!("### Source: {}\n", hit.chunk.source_id);
        let block = format!("{}{}\n\n", header, hit.chunk.text);
        let block_chars = block.chars().count();
        let remaining = max_chars.saturating_sub(used);

        if block_chars <= remaining {
            context.text.push_str(&block);
            used += block_chars;
        } else {
            if remaining > header.chars().count() {
                context.text.extend(block.chars().take(remaining));
                context.sources.insert(hit.chunk.source_id.clone());
            }
            break;
        }
        context.sources.insert(hit.chunk.source_id.clone());
    }

    context
}
