use super::EmbeddingError;
use crate::detection::token_spans;

/// Standard embedding dimension for all-MiniLM-L6-v2
pub const EMBEDDING_DIM: usize = 384;

/// Embedding model abstraction.
///
/// Implementations must be deterministic for a given input and safe to share
/// across threads; the disambiguator calls them from worker threads.
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
    fn dimension(&self) -> usize;
}

// ═══════════════════════════════════════════════════════════
// ONNX embedder (`onnx-embeddings` feature)
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-embeddings")]
mod onnx {
    use super::{l2_normalize, EmbeddingError, EmbeddingModel, EMBEDDING_DIM};
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Mutex;

    /// Sentence embedder running all-MiniLM-L6-v2 on ONNX Runtime.
    ///
    /// Requires two files in the model directory:
    /// - `model.onnx`: the ONNX model weights
    /// - `tokenizer.json`: HuggingFace tokenizer definition
    ///
    /// `ort::Session::run` needs `&mut self`, hence the Mutex.
    pub struct OnnxEmbedder {
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
    }

    impl OnnxEmbedder {
        /// Load the model from `model_dir` (`model.onnx` + `tokenizer.json`).
        pub fn load(model_dir: &Path) -> Result<Self, EmbeddingError> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");

            if !model_path.exists() {
                return Err(EmbeddingError::ModelNotFound(model_path));
            }
            if !tokenizer_path.exists() {
                return Err(EmbeddingError::ModelNotFound(tokenizer_path));
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| EmbeddingError::ModelInit(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| EmbeddingError::ModelInit(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| EmbeddingError::ModelInit(format!("ONNX load failed: {e}")))?;

            let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| EmbeddingError::ModelInit(format!("Tokenizer load failed: {e}")))?;

            tracing::info!("ONNX embedder loaded from {}", model_dir.display());

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        }

        /// One padded forward pass over all `texts`; mean pooling over the
        /// attention mask, then L2 normalization per row.
        fn infer_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            use ort::value::TensorRef;

            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let encodings = self
                .tokenizer
                .encode_batch(texts.to_vec(), true)
                .map_err(|e| EmbeddingError::Tokenization(e.to_string()))?;

            let rows = encodings.len();
            let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
            if seq_len == 0 {
                return Err(EmbeddingError::Tokenization("all inputs tokenized to nothing".into()));
            }

            // Right-pad every row to the longest sequence; padding has mask 0.
            let mut input_ids = vec![0i64; rows * seq_len];
            let mut attention_mask = vec![0i64; rows * seq_len];
            let mut token_type_ids = vec![0i64; rows * seq_len];
            for (row, encoding) in encodings.iter().enumerate() {
                let base = row * seq_len;
                for (i, &id) in encoding.get_ids().iter().enumerate() {
                    input_ids[base + i] = id as i64;
                }
                for (i, &m) in encoding.get_attention_mask().iter().enumerate() {
                    attention_mask[base + i] = m as i64;
                }
                for (i, &t) in encoding.get_type_ids().iter().enumerate() {
                    token_type_ids[base + i] = t as i64;
                }
            }

            let ids_array = ndarray::Array2::from_shape_vec((rows, seq_len), input_ids)
                .map_err(|e| EmbeddingError::Embedding(e.to_string()))?;
            let mask_array = ndarray::Array2::from_shape_vec((rows, seq_len), attention_mask.clone())
                .map_err(|e| EmbeddingError::Embedding(e.to_string()))?;
            let type_array = ndarray::Array2::from_shape_vec((rows, seq_len), token_type_ids)
                .map_err(|e| EmbeddingError::Embedding(e.to_string()))?;

            let ids_tensor = TensorRef::from_array_view(&ids_array)
                .map_err(|e| EmbeddingError::Embedding(e.to_string()))?;
            let mask_tensor = TensorRef::from_array_view(&mask_array)
                .map_err(|e| EmbeddingError::Embedding(e.to_string()))?;
            let type_tensor = TensorRef::from_array_view(&type_array)
                .map_err(|e| EmbeddingError::Embedding(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| EmbeddingError::Embedding("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                .map_err(|e| EmbeddingError::Embedding(format!("ONNX inference failed: {e}")))?;

            let (shape, output_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EmbeddingError::Embedding(format!("Output extraction: {e}")))?;

            let dims: Vec<i64> = shape.iter().copied().collect();
            check_output_shape(&dims, rows, seq_len)?;
            if output_data.len() < rows * seq_len * EMBEDDING_DIM {
                return Err(EmbeddingError::Embedding(format!(
                    "Output holds {} values, expected {}",
                    output_data.len(),
                    rows * seq_len * EMBEDDING_DIM
                )));
            }

            let mut vectors = Vec::with_capacity(rows);
            for row in 0..rows {
                let mut pooled = vec![0.0f32; EMBEDDING_DIM];
                let mut mask_sum = 0.0f32;

                for token_idx in 0..seq_len {
                    let mask_val = attention_mask[row * seq_len + token_idx] as f32;
                    if mask_val == 0.0 {
                        continue;
                    }
                    mask_sum += mask_val;
                    let offset = (row * seq_len + token_idx) * EMBEDDING_DIM;
                    for (dim_idx, p) in pooled.iter_mut().enumerate() {
                        *p += output_data[offset + dim_idx] * mask_val;
                    }
                }

                if mask_sum > 0.0 {
                    for val in &mut pooled {
                        *val /= mask_sum;
                    }
                }
                l2_normalize(&mut pooled);
                vectors.push(pooled);
            }

            Ok(vectors)
        }
    }

    /// Token embeddings must be `[rows, seq_len, EMBEDDING_DIM]`.
    fn check_output_shape(dims: &[i64], rows: usize, seq_len: usize) -> Result<(), EmbeddingError> {
        let expected = [rows as i64, seq_len as i64, EMBEDDING_DIM as i64];
        if dims != expected.as_slice() {
            return Err(EmbeddingError::Embedding(format!(
                "Unexpected output shape: {dims:?}, expected {expected:?}"
            )));
        }
        Ok(())
    }

    impl EmbeddingModel for OnnxEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.infer_batch(&[text])?
                .pop()
                .ok_or_else(|| EmbeddingError::Embedding("empty model output".into()))
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.infer_batch(texts)
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }
    }

}

#[cfg(feature = "onnx-embeddings")]
pub use onnx::OnnxEmbedder;

// ═══════════════════════════════════════════════════════════
// Lexical embedder
// ═══════════════════════════════════════════════════════════

/// Bag-of-words embedder using signed feature hashing.
///
/// Texts sharing words get positive similarity; texts with no words in common
/// score 0. Needs no model files, so it doubles as an offline baseline.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

impl EmbeddingModel for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vec = vec![0.0f32; self.dimension];

        for token in token_spans(text) {
            let hash = fnv1a(token.as_str().to_ascii_lowercase().as_bytes());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vec[slot] += sign;
        }

        l2_normalize(&mut vec);
        Ok(vec)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// 64-bit FNV-1a; stable across platforms and releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes.iter().fold(OFFSET_BASIS, |hash, &b| (hash ^ b as u64).wrapping_mul(PRIME))
}

// ═══════════════════════════════════════════════════════════
// Mock embedder
// ═══════════════════════════════════════════════════════════

/// Deterministic pseudo-random vectors keyed by text, for tests.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIM,
        }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingModel for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(deterministic_vector(text, self.dimension))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| deterministic_vector(t, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic unit vector derived from the bytes of `text`.
fn deterministic_vector(text: &str, dim: usize) -> Vec<f32> {
    let bytes = text.as_bytes();
    let mut vec: Vec<f32> = (0..dim)
        .map(|i| {
            let byte_idx = i % bytes.len().max(1);
            (bytes.get(byte_idx).copied().unwrap_or(0) as f32 + i as f32) / 255.0
        })
        .collect();

    l2_normalize(&mut vec);
    vec
}

pub(crate) fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vec.iter_mut() {
            *val /= norm;
        }
    }
}
