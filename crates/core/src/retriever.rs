//! Supplementary-context retrieval for challenges that ship reference text.
//!
//! Some challenges give the responder a body of "company data" to draw from.
//! The store chunks that text once at load time and answers queries with the
//! most relevant chunks. Absence or failure of the context feature is never
//! fatal to a session: the challenge simply runs without it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

/// Default number of snippets returned per query.
const DEFAULT_TOP_K: usize = 2;

/// Target chunk size in characters; chunks break on sentence boundaries.
const CHUNK_SIZE: usize = 500;

/// A scored piece of supplementary context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub content: String,
    pub relevance: i64,
}

/// Query side of the supplementary-context feature.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Returns the most relevant snippets for the given text, best first.
    async fn query(&self, text: &str) -> Result<Vec<Snippet>>;
}

/// In-memory snippet store with fuzzy relevance scoring.
pub struct SnippetStore {
    chunks: Vec<String>,
    source: String,
    top_k: usize,
}

impl SnippetStore {
    /// Builds a store from literal context text.
    pub fn from_text(text: &str) -> Self {
        Self {
            chunks: chunk_text(text, CHUNK_SIZE),
            source: text.to_string(),
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Builds a store from a challenge's context declaration: a `.txt` path
    /// is read from disk, anything else is treated as the literal text.
    pub fn load(path_or_text: &str) -> Result<Self> {
        if path_or_text.ends_with(".txt") {
            let text = std::fs::read_to_string(path_or_text)
                .with_context(|| format!("failed to read context file '{path_or_text}'"))?;
            Ok(Self::from_text(&text))
        } else {
            Ok(Self::from_text(path_or_text))
        }
    }

    /// The full source text, used as scanner context for the challenge.
    pub fn source_text(&self) -> &str {
        &self.source
    }
}

#[async_trait]
impl KnowledgeRetriever for SnippetStore {
    async fn query(&self, text: &str) -> Result<Vec<Snippet>> {
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<Snippet> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                matcher.fuzzy_match(chunk, text).map(|relevance| Snippet {
                    content: chunk.clone(),
                    relevance,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.relevance.cmp(&a.relevance));
        scored.truncate(self.top_k);
        Ok(scored)
    }
}

/// Packs sentences greedily into chunks of approximately `chunk_size` chars.
fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in text
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        if !current.is_empty() && current.len() + sentence.len() > chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
