//! Deterministic stand-ins for the external services.
//!
//! Useful for exercising the pipeline without network calls or model
//! downloads: [`HashEmbedder`] produces bag-of-words vectors so texts that
//! share words are similar, [`FailingEmbedder`] always reports an exhausted
//! quota, and [`ScriptedGenerator`] replays queued completions while
//! recording every prompt it receives.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::embedding::Embedder;
use crate::error::ServiceError;
use crate::generation::{GenerationRequest, Generator};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Bag-of-words embedder: each lowercase alphanumeric token adds 1.0 to a
/// bucket chosen by an FNV-1a hash.
#[derive(Clone)]
pub struct HashEmbedder {
    dims: usize,
    poison: Option<String>,
    calls: Arc<Mutex<usize>>,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            poison: None,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Fail with a transport error for any batch containing `word`.
    pub fn failing_on(mut self, word: impl Into<String>) -> Self {
        self.poison = Some(word.into());
        self
    }

    /// Number of `embed` calls made so far.
    pub fn calls(&self) -> usize {
        *locked(&self.calls)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = fnv1a(&token.to_lowercase()) as usize % self.dims;
            v[bucket] += 1.0;
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        *locked(&self.calls) += 1;
        if let Some(word) = &self.poison {
            if texts.iter().any(|t| t.contains(word.as_str())) {
                return Err(ServiceError::transport("hash-bow", "connection reset"));
            }
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Always fails with [`ServiceError::Quota`].
pub struct FailingEmbedder {
    retry_after: Option<Duration>,
}

impl FailingEmbedder {
    pub fn new(retry_after: Option<Duration>) -> Self {
        Self { retry_after }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        8
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Err(ServiceError::Quota {
            provider: "failing".to_string(),
            message: "quota exceeded".to_string(),
            retry_after: self.retry_after,
        })
    }
}

/// Replays queued completions in order.
///
/// When the queue is exhausted every call fails with
/// [`ServiceError::InvalidResponse`].
#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    responses: Arc<Mutex<VecDeque<Result<String, ServiceError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        locked(&self.responses).push_back(Ok(text.into()));
        self
    }

    pub fn with_error(self, error: ServiceError) -> Self {
        locked(&self.responses).push_back(Err(error));
        self
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        locked(&self.prompts).clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, ServiceError> {
        locked(&self.prompts).push(request.prompt.to_string());
        locked(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::invalid("scripted", "no scripted response left")))
    }
}
