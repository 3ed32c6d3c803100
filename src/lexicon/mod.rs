//! Abbreviation lexicon: abbreviation → ordered candidate expansions.
//!
//! Loaded once at startup and immutable afterwards. Any structural problem in
//! the backing data is a startup error; the engine never serves requests from
//! a partially valid lexicon.

pub mod shared;
pub mod store;

use std::path::PathBuf;

use thiserror::Error;

pub use shared::SharedLexicon;
pub use store::{load_lexicon, AbbreviationEntry, LexiconStore};

#[derive(Error, Debug)]
pub enum LexiconError {
    #[error("Lexicon file not readable ({0}): {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Lexicon parse failed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Lexicon contains an empty abbreviation key")]
    EmptyKey,

    #[error("Abbreviation key is not trimmed: {0:?}")]
    UntrimmedKey(String),

    #[error("Abbreviation {0} has no candidate expansions")]
    EmptyCandidates(String),

    #[error("Abbreviation {abbreviation} has an empty candidate at position {position}")]
    EmptyCandidate {
        abbreviation: String,
        position: usize,
    },

    #[error("Candidate {candidate:?} for {abbreviation} is not trimmed")]
    UntrimmedCandidate {
        abbreviation: String,
        candidate: String,
    },

    #[error("Candidate {candidate:?} is listed twice for {abbreviation}")]
    DuplicateCandidate {
        abbreviation: String,
        candidate: String,
    },

    #[error("Abbreviation {0} is declared twice with conflicting candidates")]
    ConflictingDuplicate(String),
}
