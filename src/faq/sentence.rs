//! Transformer sentence embeddings (e.g. all-MiniLM-L6-v2) on ONNX Runtime.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use ndarray::{Array2, Axis, Ix2, Ix3};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use crate::faq::FaqError;
use crate::faq::embedder::{Embedder, mean_pool, normalize};

/// Position embeddings of BERT-style encoders stop here.
const MAX_TOKENS: usize = 512;

/// Mean-pooled, L2-normalised encoder output.
///
/// Accepts exports whose first output is either per-token
/// (`[1, tokens, hidden]`) or already pooled (`[1, hidden]`).
pub struct SentenceEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    token_types: bool,
}

impl SentenceEmbedder {
    pub fn load(model: &Path, tokenizer: &Path) -> Result<Self, FaqError> {
        let session = Session::builder()?.commit_from_file(model)?;
        let token_types = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");
        let tokenizer = Tokenizer::from_file(tokenizer).map_err(|e| {
            FaqError::Embedding(format!("cannot load tokenizer {}: {e}", tokenizer.display()))
        })?;
        tracing::info!(model = %model.display(), token_types, "sentence model loaded");
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            token_types,
        })
    }
}

fn shape_error(shape: &[usize]) -> FaqError {
    FaqError::Embedding(format!("unexpected model output shape {shape:?}"))
}

impl Embedder for SentenceEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, FaqError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| FaqError::Embedding(e.to_string()))?;
        let len = encoding.get_ids().len().min(MAX_TOKENS);
        let widen = |values: &[u32]| -> Vec<i64> {
            values[..len].iter().map(|&v| i64::from(v)).collect()
        };
        let mask = widen(encoding.get_attention_mask());
        let tensor = |values: Vec<i64>| -> Result<Tensor<i64>, FaqError> {
            let array = Array2::from_shape_vec((1, len), values)
                .map_err(|e| FaqError::Embedding(e.to_string()))?;
            Ok(Tensor::from_array(array)?)
        };
        let input_ids = tensor(widen(encoding.get_ids()))?;
        let attention_mask = tensor(mask.clone())?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = if self.token_types {
            let token_type_ids = tensor(widen(encoding.get_type_ids()))?;
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids
            ])?
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask
            ])?
        };
        if outputs.len() == 0 {
            return Err(FaqError::Embedding("model produced no outputs".to_string()));
        }

        let raw = outputs[0].try_extract_array::<f32>()?;
        let shape = raw.shape().to_vec();
        let pooled = match shape.len() {
            3 => {
                let tokens = raw.into_dimensionality::<Ix3>().map_err(|_| shape_error(&shape))?;
                mean_pool(tokens.index_axis(Axis(0), 0), &mask)
            }
            2 => {
                let pooled = raw.into_dimensionality::<Ix2>().map_err(|_| shape_error(&shape))?;
                pooled.index_axis(Axis(0), 0).to_vec()
            }
            _ => return Err(shape_error(&shape)),
        };
        Ok(normalize(pooled))
    }
}
