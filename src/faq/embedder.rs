//! Sentence embedding seam.

use ndarray::ArrayView2;

use crate::faq::FaqError;

/// Turns text into a fixed-size vector; similar texts should land close in cosine space.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, FaqError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, FaqError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

pub const DEFAULT_DIMENSION: usize = 384;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Signed feature hashing of words and character trigrams.
///
/// Needs no model files. Trigrams give partial credit to inflections and
/// typos that whole-word features miss.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, FaqError> {
        if dimension == 0 {
            return Err(FaqError::Embedding("dimension must be positive".to_string()));
        }
        Ok(Self { dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let index = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, FaqError> {
        let mut vector = vec![0.0; self.dimension];
        for word in text.split_whitespace() {
            self.add_feature(&mut vector, word, WORD_WEIGHT);
            let padded: Vec<char> = format!("#{word}#").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut vector, &format!("3:{gram}"), TRIGRAM_WEIGHT);
            }
        }

        Ok(normalize(vector))
    }
}

/// Average the token vectors (`[tokens, hidden]`) whose mask is 1.
pub fn mean_pool(token_embeddings: ArrayView2<f32>, attention_mask: &[i64]) -> Vec<f32> {
    let mut pooled = vec![0.0f32; token_embeddings.ncols()];
    let mut count = 0.0f32;
    for (token, _) in token_embeddings
        .rows()
        .into_iter()
        .zip(attention_mask)
        .filter(|(_, mask)| **mask == 1)
    {
        for (out, value) in pooled.iter_mut().zip(token) {
            *out += value;
        }
        count += 1.0;
    }
    if count > 0.0 {
        pooled.iter_mut().for_each(|v| *v /= count);
    }
    pooled
}

/// Scale to unit length; zero vectors stay zero.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

/// Cosine similarity; zero vectors are dissimilar to everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
