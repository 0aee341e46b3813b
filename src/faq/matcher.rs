use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::faq::FaqError;
use crate::faq::embedder::{Embedder, cosine_similarity};
use crate::faq::preprocess::preprocess;

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const FALLBACK_REPLY: &str = "Sorry, I don't understand. Can you rephrase?";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

/// Read a JSON array of `{question, answer}` objects.
pub fn load_faq(path: &Path) -> Result<Vec<FaqEntry>, FaqError> {
    let bytes = std::fs::read(path).map_err(|source| FaqError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let entries: Vec<FaqEntry> = serde_json::from_slice(&bytes)?;
    tracing::info!(count = entries.len(), path = %path.display(), "loaded FAQ");
    Ok(entries)
}

/// Nearest-question lookup over a static FAQ.
///
/// Question embeddings are computed once in [`FaqMatcher::new`].
pub struct FaqMatcher {
    entries: Vec<FaqEntry>,
    embeddings: Vec<Vec<f32>>,
    embedder: Arc<dyn Embedder>,
    threshold: f32,
}

impl FaqMatcher {
    pub fn new(entries: Vec<FaqEntry>, embedder: Arc<dyn Embedder>) -> Result<Self, FaqError> {
        let questions: Vec<String> = entries.iter().map(|e| preprocess(&e.question)).collect();
        let embeddings = embedder.embed_batch(&questions)?;
        Ok(Self {
            entries,
            embeddings,
            embedder,
            threshold: DEFAULT_THRESHOLD,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index and cosine score of the most similar question, `None` for an empty FAQ.
    pub fn best_match(&self, text: &str) -> Result<Option<(usize, f32)>, FaqError> {
        let query = self.embedder.embed(&preprocess(text))?;
        Ok(self
            .embeddings
            .iter()
            .map(|q| cosine_similarity(&query, q))
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((i, score)),
            }))
    }

    /// Answer of the best question, or the fallback reply below the threshold.
    pub fn reply(&self, text: &str) -> Result<String, FaqError> {
        match self.best_match(text)? {
            Some((idx, score)) if score >= self.threshold => {
                tracing::debug!(idx, score, "FAQ match");
                Ok(self.entries[idx].answer.clone())
            }
            best => {
                tracing::debug!(?best, "no FAQ match above threshold");
                Ok(FALLBACK_REPLY.to_string())
            }
        }
    }
}
