//! FAQ matching: embed every stored question once, answer with the closest one.

mod embedder;
mod matcher;
mod preprocess;
#[cfg(feature = "onnx")]
mod sentence;

pub use embedder::{
    DEFAULT_DIMENSION, Embedder, HashingEmbedder, cosine_similarity, mean_pool, normalize,
};
pub use matcher::{DEFAULT_THRESHOLD, FALLBACK_REPLY, FaqEntry, FaqMatcher, load_faq};
pub use preprocess::{lemmatize, preprocess, tokenize};
#[cfg(feature = "onnx")]
pub use sentence::SentenceEmbedder;

#[derive(Debug, thiserror::Error)]
pub enum FaqError {
    #[error("cannot read FAQ file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid FAQ file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[cfg(feature = "onnx")]
    #[error(transparent)]
    Model(#[from] ort::Error),
}
