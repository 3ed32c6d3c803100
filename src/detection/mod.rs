//! Abbreviation detection: which tokens of a text should be resolved.
//!
//! Tokens are maximal ASCII-alphanumeric runs. A detector decides which of
//! them qualify; every detector returns each qualifying token once, in the
//! order of its first occurrence.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Match, Regex};
use serde::{Deserialize, Serialize};

use crate::lexicon::LexiconStore;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9]+").unwrap());

/// Default shape bounds for heuristic detection.
pub const DEFAULT_MIN_LEN: usize = 2;
pub const DEFAULT_MAX_LEN: usize = 6;

/// Token spans of `text`, in order.
pub fn token_spans(text: &str) -> impl Iterator<Item = Match<'_>> {
    TOKEN_RE.find_iter(text)
}

/// True when `s` is exactly one token.
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Rewrite `text` token by token. Tokens for which `rewrite` returns `None`
/// and all text between tokens are copied unchanged.
pub fn rewrite_tokens<F>(text: &str, mut rewrite: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for token in token_spans(text) {
        out.push_str(&text[last..token.start()]);
        match rewrite(token.as_str()) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(token.as_str()),
        }
        last = token.end();
    }
    out.push_str(&text[last..]);

    out
}

/// Strategy deciding which tokens are abbreviations.
pub trait AbbreviationDetector: Send + Sync {
    /// Whether a single token qualifies.
    fn qualifies(&self, token: &str, lexicon: &LexiconStore) -> bool;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Distinct qualifying tokens in first-occurrence order.
    fn find_abbreviations(&self, text: &str, lexicon: &LexiconStore) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut found = Vec::new();

        for token in token_spans(text) {
            let token = token.as_str();
            if !seen.contains(token) && self.qualifies(token, lexicon) {
                seen.insert(token);
                found.push(token.to_string());
            }
        }

        found
    }
}

/// Detects only tokens that are lexicon keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconDetector;

impl AbbreviationDetector for LexiconDetector {
    fn qualifies(&self, token: &str, lexicon: &LexiconStore) -> bool {
        lexicon.contains(token)
    }

    fn name(&self) -> &'static str {
        "lexicon"
    }
}

/// Detects lexicon keys plus anything shaped like an abbreviation, so that
/// unknown abbreviations are reported instead of silently skipped.
#[derive(Debug, Clone, Copy)]
pub struct ShapeDetector {
    min_len: usize,
    max_len: usize,
}

impl ShapeDetector {
    pub fn new(min_len: usize, max_len: usize) -> Self {
        let min_len = min_len.max(1);
        Self {
            min_len,
            max_len: max_len.max(min_len),
        }
    }
}

impl Default for ShapeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LEN, DEFAULT_MAX_LEN)
    }
}

impl AbbreviationDetector for ShapeDetector {
    fn qualifies(&self, token: &str, lexicon: &LexiconStore) -> bool {
        lexicon.contains(token) || matches_shape(token, self.min_len, self.max_len)
    }

    fn name(&self) -> &'static str {
        "shape"
    }
}

/// Abbreviation shape: short, starts with a letter, no lower-case letters.
pub fn matches_shape(token: &str, min_len: usize, max_len: usize) -> bool {
    let len = token.len();
    if len < min_len || len > max_len || !is_token(token) {
        return false;
    }

    let starts_with_letter = token.bytes().next().is_some_and(|b| b.is_ascii_alphabetic());
    starts_with_letter && !token.bytes().any(|b| b.is_ascii_lowercase())
}

/// Which detector the engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    #[default]
    Shape,
    Lexicon,
}

impl DetectorKind {
    pub fn build(self, min_len: usize, max_len: usize) -> Box<dyn AbbreviationDetector> {
        match self {
            DetectorKind::Shape => Box::new(ShapeDetector::new(min_len, max_len)),
            DetectorKind::Lexicon => Box::new(LexiconDetector),
        }
    }
}

/// Distinct abbreviations of `text` using the default shape detector.
pub fn find_abbreviations(text: &str, lexicon: &LexiconStore) -> Vec<String> {
    ShapeDetector::default().find_abbreviations(text, lexicon)
}
