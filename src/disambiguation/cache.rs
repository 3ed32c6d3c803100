use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Per-request memo of text → embedding.
///
/// Several ambiguous abbreviations in the same sentence share one context
/// embedding. Create one per request; it is not meant to outlive it.
#[derive(Default)]
pub struct EmbeddingCache {
    entries: Mutex<HashMap<String, Arc<Vec<f32>>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, text: &str) -> Option<Arc<Vec<f32>>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(text)
            .cloned()
    }

    /// Store `vector` unless another thread stored one first; returns the
    /// vector now cached for `text`.
    pub fn insert(&self, text: &str, vector: Vec<f32>) -> Arc<Vec<f32>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(text.to_string())
                .or_insert_with(|| Arc::new(vector)),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
