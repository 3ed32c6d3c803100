//! Request orchestration: detect, look up, then resolve each distinct
//! abbreviation with the default resolver or the embedding disambiguator.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::annotate::ExpansionRow;
use crate::config::EngineSettings;
use crate::detection::AbbreviationDetector;
use crate::disambiguation::{EmbeddingCache, EmbeddingDisambiguator};
use crate::lexicon::{LexiconError, LexiconStore, SharedLexicon};
use crate::resolution::{DefaultResolver, Resolution, ResolutionContext};

/// What to do when an embedding call fails mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFailurePolicy {
    /// Stop using embeddings for the rest of the session.
    #[default]
    DisableForSession,
    /// Retry the failed call once, keep embeddings enabled afterwards.
    /// A hung backend leaves timed-out workers running; once
    /// `MAX_ABANDONED_WORKERS` are pending, calls fail fast until they return.
    RetryOnce,
}

/// One distinct abbreviation and its resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAbbreviation {
    pub abbreviation: String,
    #[serde(flatten)]
    pub resolution: Resolution,
}

/// Result of one `expand` call.
#[derive(Debug, Clone, Serialize)]
pub struct ExpansionReport {
    /// In detection (first-occurrence) order.
    pub resolutions: Vec<ResolvedAbbreviation>,
    pub warnings: Vec<String>,
    pub text_length: usize,
    pub embeddings_requested: bool,
    pub generated_at: DateTime<Local>,
}

impl ExpansionReport {
    pub fn get(&self, abbr: &str) -> Option<&Resolution> {
        self.resolutions
            .iter()
            .find(|r| r.abbreviation == abbr)
            .map(|r| &r.resolution)
    }

    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty()
    }

    /// `(abbreviation, expansion, confidence)` for downstream consumers.
    pub fn triples(&self) -> impl Iterator<Item = (&str, &str, f32)> {
        self.resolutions.iter().map(|r| {
            (
                r.abbreviation.as_str(),
                r.resolution.expansion.as_str(),
                r.resolution.confidence,
            )
        })
    }

    pub fn rows(&self) -> Vec<ExpansionRow> {
        self.resolutions.iter().map(ExpansionRow::from).collect()
    }
}

/// The abbreviation resolution engine. Build once, share by reference.
pub struct ExpansionEngine {
    lexicon: SharedLexicon,
    detector: Box<dyn AbbreviationDetector>,
    resolver: DefaultResolver,
    disambiguator: Option<EmbeddingDisambiguator>,
    failure_policy: ModelFailurePolicy,
    embeddings_requested: bool,
    unavailable_reason: Option<String>,
    embeddings_disabled: AtomicBool,
}

impl ExpansionEngine {
    /// Engine without embeddings; detector and resolver from `settings`.
    pub fn new(lexicon: LexiconStore, settings: &EngineSettings) -> Self {
        Self {
            lexicon: SharedLexicon::new(lexicon),
            detector: settings
                .detector
                .build(settings.min_abbreviation_len, settings.max_abbreviation_len),
            resolver: DefaultResolver::new(settings.fallback_confidence),
            disambiguator: None,
            failure_policy: settings.failure_policy,
            embeddings_requested: false,
            unavailable_reason: None,
            embeddings_disabled: AtomicBool::new(false),
        }
    }

    pub fn with_detector(mut self, detector: Box<dyn AbbreviationDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Enable contextual disambiguation.
    pub fn with_disambiguator(mut self, disambiguator: EmbeddingDisambiguator) -> Self {
        self.disambiguator = Some(disambiguator);
        self.embeddings_requested = true;
        self.unavailable_reason = None;
        self
    }

    /// Embeddings were requested but the model failed its pre-flight check.
    /// Every report carries `reason` as a warning.
    pub fn with_unavailable_embeddings(mut self, reason: impl Into<String>) -> Self {
        self.disambiguator = None;
        self.embeddings_requested = true;
        self.unavailable_reason = Some(reason.into());
        self
    }

    pub fn lexicon(&self) -> Arc<LexiconStore> {
        self.lexicon.snapshot()
    }

    /// Swap in a new lexicon; running requests keep their snapshot.
    pub fn reload_lexicon(&self, path: &Path) -> Result<(), LexiconError> {
        self.lexicon.reload_from(path)
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Whether ambiguous abbreviations currently go to the disambiguator.
    pub fn embeddings_active(&self) -> bool {
        self.disambiguator.is_some() && !self.embeddings_disabled.load(Ordering::Acquire)
    }

    /// Resolve every distinct abbreviation in `text`.
    pub fn expand(&self, text: &str) -> ExpansionReport {
        let lexicon = self.lexicon.snapshot();
        let abbreviations = self.detector.find_abbreviations(text, &lexicon);
        let cache = EmbeddingCache::new();

        tracing::debug!(
            detector = self.detector.name(),
            found = abbreviations.len(),
            text_length = text.len(),
            "Abbreviations detected"
        );

        // Read once: a failure inside this request only affects later ones.
        let embeddings_enabled = !self.embeddings_disabled.load(Ordering::Acquire);

        let outcomes: Vec<(ResolvedAbbreviation, Option<String>)> = abbreviations
            .par_iter()
            .map(|abbr| {
                let (resolution, warning) =
                    self.resolve_one(&lexicon, text, abbr, &cache, embeddings_enabled);
                (
                    ResolvedAbbreviation {
                        abbreviation: abbr.clone(),
                        resolution,
                    },
                    warning,
                )
            })
            .collect();

        let mut warnings: Vec<String> = self.unavailable_reason.iter().cloned().collect();
        let mut resolutions = Vec::with_capacity(outcomes.len());
        let mut model_failed = false;
        for (resolved, warning) in outcomes {
            model_failed |= warning.is_some();
            warnings.extend(warning);
            resolutions.push(resolved);
        }

        if model_failed && self.failure_policy == ModelFailurePolicy::DisableForSession {
            self.embeddings_disabled.store(true, Ordering::Release);
            warnings.push(
                "Contextual disambiguation is disabled for the rest of this session after a model failure"
                    .to_string(),
            );
        } else if self.disambiguator.is_some() && !embeddings_enabled {
            warnings.push(
                "Contextual disambiguation is disabled for this session after a model failure"
                    .to_string(),
            );
        }

        ExpansionReport {
            resolutions,
            warnings,
            text_length: text.len(),
            embeddings_requested: self.embeddings_requested,
            generated_at: Local::now(),
        }
    }

    /// Resolve one abbreviation. Independent of every other abbreviation in
    /// the request. A warning is returned only when the model failed.
    fn resolve_one(
        &self,
        lexicon: &LexiconStore,
        text: &str,
        abbr: &str,
        cache: &EmbeddingCache,
        embeddings_enabled: bool,
    ) -> (Resolution, Option<String>) {
        let candidates = lexicon.lookup(abbr);

        let disambiguator = match &self.disambiguator {
            Some(d) if candidates.len() > 1 => d,
            _ => return (self.resolver.resolve_candidates(abbr, candidates), None),
        };

        if !embeddings_enabled {
            return (Resolution::model_fallback(candidates[0].clone()), None);
        }

        let context = ResolutionContext::for_abbreviation(text, abbr);
        let attempts = match self.failure_policy {
            ModelFailurePolicy::DisableForSession => 1,
            ModelFailurePolicy::RetryOnce => 2,
        };

        let mut last_error = None;
        for attempt in 1..=attempts {
            match disambiguator.choose_candidate_cached(abbr, candidates, context.as_str(), Some(cache)) {
                Ok(choice) => {
                    return (Resolution::contextual(choice.candidate, choice.score), None);
                }
                Err(e) => {
                    tracing::warn!(
                        abbreviation = abbr,
                        attempt,
                        error = %e,
                        "Contextual disambiguation failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        (
            Resolution::model_fallback(candidates[0].clone()),
            Some(format!(
                "{abbr}: contextual disambiguation failed ({reason}); first candidate used with zero confidence"
            )),
        )
    }
}
