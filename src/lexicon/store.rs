use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

use super::LexiconError;
use crate::detection::is_token;

/// Lexicon bundled with the binary.
const BUNDLED_LEXICON: &str = include_str!("../../resources/abbreviations.json");

/// One abbreviation with its candidate expansions in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbbreviationEntry {
    #[serde(alias = "abbr")]
    pub abbreviation: String,
    #[serde(alias = "candidates")]
    pub expansions: Vec<String>,
}

/// Read-only abbreviation lookup table.
///
/// Keys are case-sensitive, matching the tokens the detector extracts.
/// Candidate order is declaration order and doubles as priority order for
/// the default resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexiconStore {
    entries: BTreeMap<String, Vec<String>>,
}

impl LexiconStore {
    /// Build a validated store. Fails on the first malformed entry.
    pub fn from_entries<I>(entries: I) -> Result<Self, LexiconError>
    where
        I: IntoIterator<Item = AbbreviationEntry>,
    {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for entry in entries {
            validate_entry(&entry)?;

            if !is_token(&entry.abbreviation) {
                tracing::warn!(
                    abbreviation = %entry.abbreviation,
                    "Lexicon key is not a plain alphanumeric token and will never be detected in text"
                );
            }

            match map.entry(entry.abbreviation) {
                Entry::Vacant(slot) => {
                    slot.insert(entry.expansions);
                }
                Entry::Occupied(existing) => {
                    if *existing.get() != entry.expansions {
                        return Err(LexiconError::ConflictingDuplicate(existing.key().clone()));
                    }
                    tracing::debug!(abbreviation = %existing.key(), "Identical duplicate lexicon entry ignored");
                }
            }
        }

        Ok(Self { entries: map })
    }

    /// Convenience constructor from borrowed pairs.
    pub fn from_pairs(pairs: &[(&str, &[&str])]) -> Result<Self, LexiconError> {
        Self::from_entries(pairs.iter().map(|(abbreviation, expansions)| AbbreviationEntry {
            abbreviation: abbreviation.to_string(),
            expansions: expansions.iter().map(|e| e.to_string()).collect(),
        }))
    }

    /// Parse a lexicon document.
    ///
    /// Accepts either an object (`{"MI": ["Myocardial Infarction"]}`) or a
    /// list of `{"abbreviation", "expansions"}` records. Duplicate keys are
    /// preserved during parsing so conflicting declarations are caught.
    pub fn from_json(json: &str) -> Result<Self, LexiconError> {
        let raw: RawLexicon = serde_json::from_str(json)?;
        Self::from_entries(raw.0)
    }

    /// The lexicon shipped in `resources/abbreviations.json`.
    pub fn bundled() -> Result<Self, LexiconError> {
        Self::from_json(BUNDLED_LEXICON)
    }

    /// Candidate expansions for `abbr`, or an empty slice when unknown.
    pub fn lookup(&self, abbr: &str) -> &[String] {
        self.entries.get(abbr).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, abbr: &str) -> bool {
        self.entries.contains_key(abbr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(abbr, candidates)| (abbr.as_str(), candidates.as_slice()))
    }

    /// Number of abbreviations with more than one candidate.
    pub fn ambiguous_count(&self) -> usize {
        self.entries.values().filter(|c| c.len() > 1).count()
    }
}

/// Load and validate a lexicon file.
pub fn load_lexicon(path: &Path) -> Result<LexiconStore, LexiconError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| LexiconError::Read(path.to_path_buf(), e))?;
    let store = LexiconStore::from_json(&json)?;

    tracing::info!(
        path = %path.display(),
        abbreviations = store.len(),
        ambiguous = store.ambiguous_count(),
        "Lexicon loaded"
    );

    Ok(store)
}

fn validate_entry(entry: &AbbreviationEntry) -> Result<(), LexiconError> {
    let abbreviation = &entry.abbreviation;

    if abbreviation.trim().is_empty() {
        return Err(LexiconError::EmptyKey);
    }
    if abbreviation.trim() != abbreviation {
        return Err(LexiconError::UntrimmedKey(abbreviation.clone()));
    }
    if entry.expansions.is_empty() {
        return Err(LexiconError::EmptyCandidates(abbreviation.clone()));
    }

    for (position, candidate) in entry.expansions.iter().enumerate() {
        if candidate.trim().is_empty() {
            return Err(LexiconError::EmptyCandidate {
                abbreviation: abbreviation.clone(),
                position,
            });
        }
        if candidate.trim() != candidate {
            return Err(LexiconError::UntrimmedCandidate {
                abbreviation: abbreviation.clone(),
                candidate: candidate.clone(),
            });
        }
        if entry.expansions[..position].contains(candidate) {
            return Err(LexiconError::DuplicateCandidate {
                abbreviation: abbreviation.clone(),
                candidate: candidate.clone(),
            });
        }
    }

    Ok(())
}

/// Lexicon document as written, before validation. Keeps every declaration,
/// including repeated object keys, in source order.
struct RawLexicon(Vec<AbbreviationEntry>);

impl<'de> Deserialize<'de> for RawLexicon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawLexiconVisitor;

        impl<'de> Visitor<'de> for RawLexiconVisitor {
            type Value = RawLexicon;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an abbreviation map or a list of abbreviation entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawLexicon, A::Error> {
                let mut entries = Vec::new();
                while let Some((abbreviation, expansions)) =
                    map.next_entry::<String, Vec<String>>()?
                {
                    entries.push(AbbreviationEntry {
                        abbreviation,
                        expansions,
                    });
                }
                Ok(RawLexicon(entries))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawLexicon, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = seq.next_element::<AbbreviationEntry>()? {
                    entries.push(entry);
                }
                Ok(RawLexicon(entries))
            }
        }

        deserializer.deserialize_any(RawLexiconVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn lookup_returns_candidates_in_declaration_order() {
        let store = LexiconStore::from_pairs(&[(
            "MI",
            &["Myocardial Infarction", "Mitral Insufficiency"],
        )])
        .unwrap();

        assert_eq!(
            store.lookup("MI"),
            &["Myocardial Infarction".to_string(), "Mitral Insufficiency".to_string()]
        );
    }

    #[test]
    fn unknown_abbreviation_is_empty_not_error() {
        let store = LexiconStore::from_pairs(&[("MI", &["Myocardial Infarction"])]).unwrap();
        assert!(store.lookup("XYZ").is_empty());
        assert!(!store.contains("XYZ"));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let store = LexiconStore::from_pairs(&[("MI", &["Myocardial Infarction"])]).unwrap();
        assert!(store.lookup("mi").is_empty());
        assert!(store.lookup("Mi").is_empty());
    }

    #[test]
    fn parses_object_form() {
        let store = LexiconStore::from_json(
            r#"{"MI": ["Myocardial Infarction", "Mitral Insufficiency"], "HTN": ["Hypertension"]}"#,
        )
        .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.ambiguous_count(), 1);
    }

    #[test]
    fn parses_record_form_with_aliases() {
        let store = LexiconStore::from_json(
            r#"[
                {"abbreviation": "MI", "expansions": ["Myocardial Infarction"]},
                {"abbr": "CHF", "candidates": ["Congestive Heart Failure"]}
            ]"#,
        )
        .unwrap();
        assert_eq!(store.lookup("CHF"), &["Congestive Heart Failure".to_string()]);
    }

    #[test]
    fn rejects_empty_candidate_list() {
        let err = LexiconStore::from_json(r#"{"MI": []}"#).unwrap_err();
        assert!(matches!(err, LexiconError::EmptyCandidates(ref a) if a == "MI"));
    }

    #[test]
    fn rejects_blank_candidate() {
        let err = LexiconStore::from_json(r#"{"MI": ["Myocardial Infarction", "  "]}"#).unwrap_err();
        assert!(matches!(err, LexiconError::EmptyCandidate { position: 1, .. }));
    }

    #[test]
    fn rejects_untrimmed_candidate() {
        let err = LexiconStore::from_json(r#"{"MI": [" Myocardial Infarction"]}"#).unwrap_err();
        assert!(matches!(err, LexiconError::UntrimmedCandidate { .. }));
    }

    #[test]
    fn rejects_empty_and_untrimmed_keys() {
        assert!(matches!(
            LexiconStore::from_json(r#"{"": ["x"]}"#).unwrap_err(),
            LexiconError::EmptyKey
        ));
        assert!(matches!(
            LexiconStore::from_json(r#"{"MI ": ["x"]}"#).unwrap_err(),
            LexiconError::UntrimmedKey(_)
        ));
    }

    #[test]
    fn rejects_repeated_candidate() {
        let err = LexiconStore::from_json(r#"{"PE": ["Pulmonary Embolism", "Pulmonary Embolism"]}"#)
            .unwrap_err();
        assert!(matches!(err, LexiconError::DuplicateCandidate { .. }));
    }

    #[test]
    fn conflicting_duplicate_keys_in_object_are_rejected() {
        let err = LexiconStore::from_json(
            r#"{"MI": ["Myocardial Infarction"], "MI": ["Mitral Insufficiency"]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, LexiconError::ConflictingDuplicate(ref a) if a == "MI"));
    }

    #[test]
    fn identical_duplicate_keys_are_accepted() {
        let store = LexiconStore::from_json(
            r#"[
                {"abbreviation": "MI", "expansions": ["Myocardial Infarction"]},
                {"abbreviation": "MI", "expansions": ["Myocardial Infarction"]}
            ]"#,
        )
        .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rejects_non_lexicon_json() {
        assert!(matches!(
            LexiconStore::from_json("42").unwrap_err(),
            LexiconError::Parse(_)
        ));
    }

    #[test]
    fn bundled_lexicon_is_valid() {
        let store = LexiconStore::bundled().unwrap();
        assert!(store.len() > 30);
        assert_eq!(store.lookup("MI")[0], "Myocardial Infarction");
        assert!(store.iter().all(|(_, candidates)| !candidates.is_empty()));
    }

    #[test]
    fn load_lexicon_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"SOB": ["Shortness of Breath"]}}"#).unwrap();

        let store = load_lexicon(file.path()).unwrap();
        assert_eq!(store.lookup("SOB"), &["Shortness of Breath".to_string()]);
    }

    #[test]
    fn load_lexicon_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_lexicon(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, LexiconError::Read(..)));
    }
}
