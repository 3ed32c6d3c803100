use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cache::EmbeddingCache;
use super::embedder::EmbeddingModel;
use super::{DisambiguationError, EmbeddingError};
use crate::detection::rewrite_tokens;

/// Text probed once at load time to verify the model answers.
const PREFLIGHT_PROBE: &str = "acute myocardial infarction";

/// Timed-out embedding calls allowed to keep running before new calls are
/// refused.
pub const MAX_ABANDONED_WORKERS: usize = 4;

const WORKER_RUNNING: u8 = 0;
const WORKER_DONE: u8 = 1;
const WORKER_ABANDONED: u8 = 2;

/// What gets embedded for each candidate.
///
/// Fixed per disambiguator: switching it changes every score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CandidateText {
    /// The expansion on its own, e.g. "Myocardial Infarction".
    #[default]
    Standalone,
    /// The context with every occurrence of the abbreviation replaced by
    /// the expansion.
    Substituted,
}

/// Outcome of a contextual choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub candidate: String,
    /// Position in the candidate list passed in.
    pub index: usize,
    /// Raw cosine similarity, roughly `[-1.0, 1.0]`. Not renormalized.
    pub score: f32,
}

/// Picks the candidate whose embedding is closest to the context embedding.
///
/// Only constructed through [`EmbeddingDisambiguator::load`], which checks the
/// model once up front; callers that could not load one simply do not hold a
/// disambiguator.
pub struct EmbeddingDisambiguator {
    model: Arc<dyn EmbeddingModel>,
    timeout: Duration,
    candidate_text: CandidateText,
    /// Workers whose caller gave up on them and that have not returned yet.
    abandoned: Arc<AtomicUsize>,
}

impl std::fmt::Debug for EmbeddingDisambiguator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingDisambiguator")
            .field("dimension", &self.model.dimension())
            .field("timeout", &self.timeout)
            .field("candidate_text", &self.candidate_text)
            .finish()
    }
}

impl EmbeddingDisambiguator {
    /// Wrap `model` after a pre-flight embedding. Any failure here means the
    /// model is unusable for the session.
    pub fn load(
        model: Arc<dyn EmbeddingModel>,
        timeout: Duration,
        candidate_text: CandidateText,
    ) -> Result<Self, DisambiguationError> {
        let disambiguator = Self {
            model,
            timeout,
            candidate_text,
            abandoned: Arc::new(AtomicUsize::new(0)),
        };

        let probe = disambiguator.embed_texts(vec![PREFLIGHT_PROBE.to_string()])?;
        disambiguator.check_vectors(&probe, 1)?;

        tracing::info!(
            dimension = disambiguator.model.dimension(),
            timeout_ms = timeout.as_millis() as u64,
            candidate_text = ?candidate_text,
            "Embedding disambiguator ready"
        );

        Ok(disambiguator)
    }

    pub fn candidate_text(&self) -> CandidateText {
        self.candidate_text
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Timed-out calls whose worker thread is still running.
    pub fn abandoned_workers(&self) -> usize {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Choose the candidate most similar to `context`.
    ///
    /// Ties keep the earliest candidate. A single candidate is accepted and
    /// scored like any other.
    pub fn choose_candidate(
        &self,
        abbreviation: &str,
        candidates: &[String],
        context: &str,
    ) -> Result<Choice, DisambiguationError> {
        self.choose_candidate_cached(abbreviation, candidates, context, None)
    }

    /// Same as [`choose_candidate`](Self::choose_candidate), reusing context
    /// embeddings from `cache` when provided.
    pub fn choose_candidate_cached(
        &self,
        abbreviation: &str,
        candidates: &[String],
        context: &str,
        cache: Option<&EmbeddingCache>,
    ) -> Result<Choice, DisambiguationError> {
        if candidates.is_empty() {
            return Err(DisambiguationError::NoCandidates);
        }

        let mut batch: Vec<String> = match self.candidate_text {
            CandidateText::Standalone => candidates.to_vec(),
            CandidateText::Substituted => candidates
                .iter()
                .map(|candidate| {
                    rewrite_tokens(context, |token| (token == abbreviation).then(|| candidate.clone()))
                })
                .collect(),
        };

        let cached_context = cache.and_then(|c| c.get(context));
        if cached_context.is_none() {
            batch.push(context.to_string());
        }

        let expected = batch.len();
        let mut vectors = self.embed_texts(batch)?;
        self.check_vectors(&vectors, expected)?;

        let context_vector = match cached_context {
            Some(vector) => vector,
            None => {
                let vector = vectors.pop().ok_or_else(|| {
                    EmbeddingError::Embedding("context embedding missing from batch".into())
                })?;
                match cache {
                    Some(cache) => cache.insert(context, vector),
                    None => Arc::new(vector),
                }
            }
        };

        let mut best: Option<(usize, f32)> = None;
        for (index, vector) in vectors.iter().enumerate() {
            let score = cosine_similarity(&context_vector, vector);
            tracing::trace!(abbreviation, candidate = %candidates[index], score, "Candidate scored");
            // Strictly greater: equal scores keep the earlier candidate.
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((index, score));
            }
        }

        let (index, score) = best.ok_or(DisambiguationError::NoCandidates)?;
        tracing::debug!(
            abbreviation,
            chosen = %candidates[index],
            score,
            "Contextual candidate chosen"
        );

        Ok(Choice {
            candidate: candidates[index].clone(),
            index,
            score,
        })
    }

    /// Run one batch embedding on a worker thread, bounded by the timeout.
    ///
    /// On timeout the worker is left to finish on its own and its result is
    /// dropped. At most [`MAX_ABANDONED_WORKERS`] such workers may be pending;
    /// beyond that, calls fail immediately without spawning.
    fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, DisambiguationError> {
        let pending = self.abandoned.load(Ordering::Acquire);
        if pending >= MAX_ABANDONED_WORKERS {
            return Err(DisambiguationError::WorkersExhausted(pending));
        }

        let model = Arc::clone(&self.model);
        let abandoned = Arc::clone(&self.abandoned);
        let state = Arc::new(AtomicU8::new(WORKER_RUNNING));
        let worker_state = Arc::clone(&state);
        let (tx, rx) = mpsc::channel();

        std::thread::Builder::new()
            .name("medexpand-embed".into())
            .spawn(move || {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                let result = model.embed_batch(&refs);
                let finished = worker_state.compare_exchange(
                    WORKER_RUNNING,
                    WORKER_DONE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                if finished.is_err() {
                    // Caller already gave up on this worker.
                    abandoned.fetch_sub(1, Ordering::AcqRel);
                } else {
                    let _ = tx.send(result);
                }
            })
            .map_err(|e| EmbeddingError::Embedding(format!("Embedding worker spawn failed: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => Ok(result?),
            Err(RecvTimeoutError::Timeout) => {
                // Count first so the worker's decrement can never precede it.
                self.abandoned.fetch_add(1, Ordering::AcqRel);
                let gave_up = state.compare_exchange(
                    WORKER_RUNNING,
                    WORKER_ABANDONED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                if gave_up.is_ok() {
                    tracing::warn!(
                        timeout_ms = self.timeout.as_millis() as u64,
                        abandoned = self.abandoned_workers(),
                        "Embedding call timed out, worker left running"
                    );
                    return Err(DisambiguationError::Timeout(self.timeout));
                }
                // Finished right at the deadline; the result is on its way.
                self.abandoned.fetch_sub(1, Ordering::AcqRel);
                match rx.recv() {
                    Ok(result) => Ok(result?),
                    Err(_) => Err(DisambiguationError::Timeout(self.timeout)),
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::Embedding(
                "Embedding worker exited without a result".into(),
            )
            .into()),
        }
    }

    fn check_vectors(&self, vectors: &[Vec<f32>], expected: usize) -> Result<(), DisambiguationError> {
        if vectors.len() != expected {
            return Err(EmbeddingError::Embedding(format!(
                "Model returned {} vectors for {expected} inputs",
                vectors.len()
            ))
            .into());
        }

        let dimension = self.model.dimension();
        for vector in vectors {
            if vector.len() != dimension {
                return Err(DisambiguationError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(EmbeddingError::Embedding("Model returned non-finite values".into()).into());
            }
        }

        Ok(())
    }
}

/// Cosine similarity; 0.0 for empty, mismatched or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
