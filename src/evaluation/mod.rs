//! Scoring expansion rows against a ground-truth file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::annotate::ExpansionRow;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Ground truth not readable ({0}): {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Ground truth parse failed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Ground truth lists {0} twice with different expansions")]
    Conflict(String),
}

/// Accepted on-disk shapes.
#[derive(Deserialize)]
#[serde(untagged)]
enum GroundTruthFile {
    Map(BTreeMap<String, String>),
    Records(Vec<GroundTruthRecord>),
}

#[derive(Deserialize)]
struct GroundTruthRecord {
    #[serde(alias = "abbreviation")]
    abbr: String,
    #[serde(alias = "expansion")]
    true_expansion: String,
}

/// Abbreviation to its correct expansion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundTruth {
    entries: BTreeMap<String, String>,
}

impl GroundTruth {
    pub fn from_json(json: &str) -> Result<Self, EvaluationError> {
        let entries = match serde_json::from_str::<GroundTruthFile>(json)? {
            GroundTruthFile::Map(map) => map
                .into_iter()
                .map(|(abbr, expansion)| (abbr.trim().to_string(), expansion))
                .collect(),
            GroundTruthFile::Records(records) => {
                let mut map: BTreeMap<String, String> = BTreeMap::new();
                for record in records {
                    let abbr = record.abbr.trim().to_string();
                    let expansion = record.true_expansion;
                    match map.get(&abbr) {
                        Some(existing) if !same_expansion(existing, &expansion) => {
                            return Err(EvaluationError::Conflict(abbr));
                        }
                        _ => {
                            map.insert(abbr, expansion);
                        }
                    }
                }
                map
            }
        };
        Ok(Self { entries })
    }

    pub fn get(&self, abbr: &str) -> Option<&str> {
        self.entries.get(abbr).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for GroundTruth {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

pub fn load_ground_truth(path: &Path) -> Result<GroundTruth, EvaluationError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| EvaluationError::Read(path.to_path_buf(), e))?;
    let truth = GroundTruth::from_json(&json)?;
    tracing::info!(path = %path.display(), entries = truth.len(), "Ground truth loaded");
    Ok(truth)
}

fn same_expansion(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    Unresolved,
}

/// One row matched against the ground truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub abbr: String,
    pub predicted: String,
    pub expected: String,
    pub confidence: f32,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Rows whose abbreviation appears in the ground truth.
    pub matched: usize,
    pub correct: usize,
    /// Matched rows the lexicon could not expand.
    pub unresolved: usize,
    /// `correct / (matched - unresolved)`.
    pub precision: f64,
    /// `correct / matched`.
    pub accuracy: f64,
    pub outcomes: Vec<Outcome>,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Join `rows` with `truth` on abbreviation and score them.
pub fn evaluate(rows: &[ExpansionRow], truth: &GroundTruth) -> Evaluation {
    let outcomes: Vec<Outcome> = rows
        .iter()
        .filter_map(|row| {
            let expected = truth.get(&row.abbr)?;
            let verdict = if row.is_unknown() {
                Verdict::Unresolved
            } else if same_expansion(&row.expansion, expected) {
                Verdict::Correct
            } else {
                Verdict::Incorrect
            };
            Some(Outcome {
                abbr: row.abbr.clone(),
                predicted: row.expansion.clone(),
                expected: expected.to_string(),
                confidence: row.confidence,
                verdict,
            })
        })
        .collect();

    let matched = outcomes.len();
    let correct = outcomes.iter().filter(|o| o.verdict == Verdict::Correct).count();
    let unresolved = outcomes.iter().filter(|o| o.verdict == Verdict::Unresolved).count();

    tracing::debug!(matched, correct, unresolved, "Evaluation complete");

    Evaluation {
        matched,
        correct,
        unresolved,
        precision: ratio(correct, matched - unresolved),
        accuracy: ratio(correct, matched),
        outcomes,
    }
}
