use super::{Resolution, ResolutionSource};
use crate::lexicon::LexiconStore;

/// Confidence reported when several candidates exist and none is preferred
/// by context.
pub const DEFAULT_FALLBACK_CONFIDENCE: f32 = 0.5;

/// Lexicon-only resolution: unknown → marker, one candidate → certain,
/// several → first declared candidate at a fixed moderate confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultResolver {
    fallback_confidence: f32,
}

impl DefaultResolver {
    pub fn new(fallback_confidence: f32) -> Self {
        Self {
            fallback_confidence: fallback_confidence.clamp(0.0, 1.0),
        }
    }

    pub fn fallback_confidence(&self) -> f32 {
        self.fallback_confidence
    }

    /// Resolve `abbr` against `lexicon`. The context does not influence the
    /// outcome; it is accepted so callers can treat both resolvers alike.
    pub fn resolve(&self, lexicon: &LexiconStore, abbr: &str, _context: &str) -> Resolution {
        self.resolve_candidates(abbr, lexicon.lookup(abbr))
    }

    /// Resolve from an already looked-up candidate list.
    pub fn resolve_candidates(&self, abbr: &str, candidates: &[String]) -> Resolution {
        match candidates {
            [] => Resolution::unknown(abbr),
            [only] => Resolution {
                expansion: only.clone(),
                confidence: 1.0,
                source: ResolutionSource::SingleCandidate,
                similarity: None,
            },
            [first, ..] => Resolution {
                expansion: first.clone(),
                confidence: self.fallback_confidence,
                source: ResolutionSource::DefaultFallback,
                similarity: None,
            },
        }
    }
}

impl Default for DefaultResolver {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_CONFIDENCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn single() -> LexiconStore {
        LexiconStore::from_pairs(&[("MI", &["Myocardial Infarction"])]).unwrap()
    }

    fn ambiguous() -> LexiconStore {
        LexiconStore::from_pairs(&[("MI", &["Myocardial Infarction", "Mitral Insufficiency"])])
            .unwrap()
    }

    #[test]
    fn single_candidate_is_certain() {
        let r = DefaultResolver::default().resolve(&single(), "MI", "Pt has MI.");
        assert_eq!(r.expansion, "Myocardial Infarction");
        assert_eq!(r.confidence, 1.0);
        assert_eq!(r.source, ResolutionSource::SingleCandidate);
    }

    #[test]
    fn multiple_candidates_fall_back_to_first_declared() {
        let r = DefaultResolver::default().resolve(&ambiguous(), "MI", "murmur over the mitral valve");
        assert_eq!(r.expansion, "Myocardial Infarction");
        assert_eq!(r.confidence, 0.5);
        assert_eq!(r.source, ResolutionSource::DefaultFallback);
    }

    #[test]
    fn unknown_abbreviation_gets_marker() {
        let r = DefaultResolver::default().resolve(&single(), "XYZ", "XYZ noted.");
        assert_eq!(r.expansion, "[UNKNOWN: XYZ]");
        assert_eq!(r.confidence, 0.0);
        assert!(r.is_unknown());
    }

    #[test]
    fn fallback_confidence_is_configurable_and_clamped() {
        assert_eq!(DefaultResolver::new(0.3).fallback_confidence(), 0.3);
        assert_eq!(DefaultResolver::new(7.0).fallback_confidence(), 1.0);
        assert_eq!(DefaultResolver::new(-1.0).fallback_confidence(), 0.0);
    }

    proptest! {
        #[test]
        fn single_candidate_ignores_context(context in ".{0,120}") {
            let r = DefaultResolver::default().resolve(&single(), "MI", &context);
            prop_assert_eq!(r.expansion.as_str(), "Myocardial Infarction");
            prop_assert_eq!(r.confidence, 1.0);
        }

        #[test]
        fn unknown_ignores_context(context in ".{0,120}") {
            let r = DefaultResolver::default().resolve(&ambiguous(), "XYZ", &context);
            prop_assert!(r.is_unknown());
            prop_assert_eq!(r.confidence, 0.0);
        }

        #[test]
        fn resolution_is_idempotent(context in ".{0,120}") {
            let resolver = DefaultResolver::default();
            let lexicon = ambiguous();
            let first = resolver.resolve(&lexicon, "MI", &context);
            let second = resolver.resolve(&lexicon, "MI", &context);
            prop_assert_eq!(first, second);
        }
    }
}
