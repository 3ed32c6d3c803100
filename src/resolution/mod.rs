//! Resolution results and the lexicon-only default resolver.

pub mod context;
pub mod resolver;

use serde::Serialize;

pub use context::ResolutionContext;
pub use resolver::{DefaultResolver, DEFAULT_FALLBACK_CONFIDENCE};

/// How a resolution was reached. Every non-certain path is labelled so a
/// fallback can never pass for a contextual choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Not in the lexicon.
    Unknown,
    /// Exactly one candidate.
    SingleCandidate,
    /// First of several candidates, no contextual evidence.
    DefaultFallback,
    /// Chosen by embedding similarity.
    Contextual,
    /// Embedding disambiguation failed; first candidate with zero confidence.
    ModelFallback,
}

/// Expansion chosen for one distinct abbreviation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub expansion: String,
    /// In `[0.0, 1.0]`.
    pub confidence: f32,
    pub source: ResolutionSource,
    /// Raw cosine similarity, only for contextual resolutions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl Resolution {
    /// Marker for an abbreviation the lexicon does not know.
    pub fn unknown(abbr: &str) -> Self {
        Self {
            expansion: format!("[UNKNOWN: {abbr}]"),
            confidence: 0.0,
            source: ResolutionSource::Unknown,
            similarity: None,
        }
    }

    /// Contextual choice. Confidence is the similarity clamped to `[0, 1]`;
    /// the unclamped value stays available in `similarity`.
    pub fn contextual(expansion: String, similarity: f32) -> Self {
        Self {
            expansion,
            confidence: similarity.clamp(0.0, 1.0),
            source: ResolutionSource::Contextual,
            similarity: Some(similarity),
        }
    }

    /// First candidate after a failed model call.
    pub fn model_fallback(expansion: String) -> Self {
        Self {
            expansion,
            confidence: 0.0,
            source: ResolutionSource::ModelFallback,
            similarity: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.source == ResolutionSource::Unknown
    }

    /// Resolved without contextual evidence although several candidates exist.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self.source,
            ResolutionSource::DefaultFallback | ResolutionSource::ModelFallback
        )
    }
}
