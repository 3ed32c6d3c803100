//! Embedding models with scripted behaviour for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::embedder::l2_normalize;
use super::{EmbeddingError, EmbeddingModel};
use crate::detection::token_spans;

const CARDIAC: &[&str] = &[
    "attack", "chest", "crushing", "heart", "infarction", "myocardial", "pain", "troponin",
];
const VALVE: &[&str] = &[
    "echo", "insufficiency", "mitral", "murmur", "regurgitation", "valve",
];

/// Three-axis concept model: cardiac-ischemia words, valve words, other.
pub struct ConceptEmbedder;

impl EmbeddingModel for ConceptEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vec = vec![0.0f32; 3];
        for token in token_spans(text) {
            let word = token.as_str().to_ascii_lowercase();
            let axis = if CARDIAC.contains(&word.as_str()) {
                0
            } else if VALVE.contains(&word.as_str()) {
                1
            } else {
                2
            };
            vec[axis] += 1.0;
        }
        l2_normalize(&mut vec);
        Ok(vec)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        3
    }
}

/// Succeeds for the first `ok_calls` batch calls, then fails every call.
pub struct FailingEmbedder {
    ok_calls: usize,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn always() -> Self {
        Self::after(0)
    }

    pub fn after(ok_calls: usize) -> Self {
        Self {
            ok_calls,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingModel for FailingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| EmbeddingError::Embedding("empty".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.ok_calls {
            ConceptEmbedder.embed_batch(texts)
        } else {
            Err(EmbeddingError::Embedding("inference crashed".into()))
        }
    }

    fn dimension(&self) -> usize {
        3
    }
}

/// Answers the first `fast_calls` batch calls immediately, then sleeps
/// `delay` before every answer.
pub struct SlowEmbedder {
    delay: Duration,
    fast_calls: usize,
    calls: AtomicUsize,
}

impl SlowEmbedder {
    pub fn new(delay: Duration, fast_calls: usize) -> Self {
        Self {
            delay,
            fast_calls,
            calls: AtomicUsize::new(0),
        }
    }
}

impl EmbeddingModel for SlowEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        ConceptEmbedder.embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fast_calls {
            std::thread::sleep(self.delay);
        }
        ConceptEmbedder.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        3
    }
}

/// Counts how many texts went through `embed_batch`.
#[derive(Default)]
pub struct CountingEmbedder {
    texts: AtomicUsize,
}

impl CountingEmbedder {
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

impl EmbeddingModel for CountingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        ConceptEmbedder.embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        ConceptEmbedder.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        3
    }
}

/// Claims four dimensions, returns three.
pub struct WrongDimensionEmbedder;

impl EmbeddingModel for WrongDimensionEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        ConceptEmbedder.embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        ConceptEmbedder.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        4
    }
}
