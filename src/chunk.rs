//! Overlapping word-window chunker.
//!
//! Splits a normalized text body into windows of `window_words` words,
//! advancing by `window_words - overlap_words` each step. The window that
//! reaches the end of the text is the last one and may be shorter than
//! `window_words`, never longer.
//!
//! For W words with the default 350/80 configuration this yields
//! `ceil((W - 80) / 270)` chunks when `W >= 350`, one chunk when
//! `0 < W < 350`, and none for empty text. Consecutive chunks always share
//! exactly `overlap_words` words.
//!
//! [`WordWindows`] is lazy and restartable: it owns the split word list and
//! hands out a fresh iterator on every call to [`WordWindows::iter`].

use crate::error::{Error, Result};
use crate::models::Chunk;

pub const DEFAULT_WINDOW_WORDS: usize = 350;
pub const DEFAULT_OVERLAP_WORDS: usize = 80;

/// Window geometry for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub window_words: usize,
    pub overlap_words: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            window_words: DEFAULT_WINDOW_WORDS,
            overlap_words: DEFAULT_OVERLAP_WORDS,
        }
    }
}

impl ChunkConfig {
    /// Fails unless `window_words > overlap_words`.
    pub fn new(window_words: usize, overlap_words: usize) -> Result<Self> {
        let config = Self {
            window_words,
            overlap_words,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_words <= self.overlap_words {
            return Err(Error::InvalidChunkConfig {
                window: self.window_words,
                overlap: self.overlap_words,
            });
        }
        Ok(())
    }

    /// Words the window start advances per chunk.
    pub fn stride(&self) -> usize {
        self.window_words - self.overlap_words
    }
}

/// The planned windows over one document.
#[derive(Debug, Clone)]
pub struct WordWindows<'a> {
    words: Vec<&'a str>,
    source_id: &'a str,
    config: ChunkConfig,
}

/// Plan the chunks of `text` without materializing any of them.
pub fn chunk_words<'a>(
    text: &'a str,
    source_id: &'a str,
    config: ChunkConfig,
) -> Result<WordWindows<'a>> {
    config.validate()?;
    Ok(WordWindows {
        words: text.split_whitespace().collect(),
        source_id,
        config,
    })
}

/// Chunk `text` eagerly into owned [`Chunk`]s.
pub fn chunk_text(text: &str, source_id: &str, config: ChunkConfig) -> Result<Vec<Chunk>> {
    Ok(chunk_words(text, source_id, config)?.iter().collect())
}

impl<'a> WordWindows<'a> {
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Number of chunks the plan yields.
    pub fn len(&self) -> usize {
        let n = self.words.len();
        let window = self.config.window_words;
        if n == 0 {
            0
        } else if n <= window {
            1
        } else {
            (n - self.config.overlap_words).div_ceil(self.config.stride())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> WindowIter<'_, 'a> {
        WindowIter {
            plan: self,
            start: 0,
            index: 0,
            done: self.words.is_empty(),
        }
    }
}

impl<'p, 'a> IntoIterator for &'p WordWindows<'a> {
    type Item = Chunk;
    type IntoIter = WindowIter<'p, 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the chunks of a [`WordWindows`] plan.
#[derive(Debug, Clone)]
pub struct WindowIter<'p, 'a> {
    plan: &'p WordWindows<'a>,
    start: usize,
    index: usize,
    done: bool,
}

impl Iterator for WindowIter<'_, '_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let words = &self.plan.words;
        let config = self.plan.config;
        let end = (self.start + config.window_words).min(words.len());
        let window = &words[self.start..end];

        let chunk = Chunk {
            text: window.join(" "),
            source_id: self.plan.source_id.to_string(),
            chunk_index: self.index,
            word_count: window.len(),
            overlap_with_predecessor: if self.index == 0 {
                0
            } else {
                config.overlap_words
            },
        };

        if end == words.len() {
            self.done = true;
        } else {
            self.start += config.stride();
            self.index += 1;
        }
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.done {
            0
        } else {
            self.plan.len() - self.index
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for WindowIter<'_, '_> {}
