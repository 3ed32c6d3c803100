use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::{DetectorKind, DEFAULT_MAX_LEN, DEFAULT_MIN_LEN};
use crate::disambiguation::CandidateText;
use crate::engine::ModelFailurePolicy;
use crate::resolution::DEFAULT_FALLBACK_CONFIDENCE;

/// Application-level constants
pub const APP_NAME: &str = "MedExpand";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default per-call budget for embedding inference.
pub const DEFAULT_EMBEDDING_TIMEOUT_MS: u64 = 30_000;

/// Get the application data directory
/// ~/MedExpand/ on all platforms; falls back to the working directory when
/// no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Get the models directory (for ONNX embeddings, etc.)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the embedding model directory (all-MiniLM-L6-v2)
pub fn embedding_model_dir() -> PathBuf {
    models_dir().join("all-MiniLM-L6-v2")
}

/// User lexicon; the bundled one is used when this file does not exist.
pub fn default_lexicon_path() -> PathBuf {
    app_data_dir().join("abbreviations.json")
}

pub fn default_settings_path() -> PathBuf {
    app_data_dir().join("settings.json")
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "medexpand=info,medexpand_lib=info"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Settings file not readable ({0}): {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Settings parse failed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Tunables of the expansion engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Confidence for multi-candidate resolution without context.
    pub fallback_confidence: f32,
    pub embedding_timeout_ms: u64,
    pub candidate_text: CandidateText,
    pub failure_policy: ModelFailurePolicy,
    pub detector: DetectorKind,
    pub min_abbreviation_len: usize,
    pub max_abbreviation_len: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fallback_confidence: DEFAULT_FALLBACK_CONFIDENCE,
            embedding_timeout_ms: DEFAULT_EMBEDDING_TIMEOUT_MS,
            candidate_text: CandidateText::default(),
            failure_policy: ModelFailurePolicy::default(),
            detector: DetectorKind::default(),
            min_abbreviation_len: DEFAULT_MIN_LEN,
            max_abbreviation_len: DEFAULT_MAX_LEN,
        }
    }
}

impl EngineSettings {
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.fallback_confidence) {
            return Err(ConfigError::Invalid(format!(
                "fallback_confidence must be within [0, 1], got {}",
                self.fallback_confidence
            )));
        }
        if self.embedding_timeout_ms == 0 {
            return Err(ConfigError::Invalid("embedding_timeout_ms must be positive".into()));
        }
        if self.min_abbreviation_len == 0 || self.min_abbreviation_len > self.max_abbreviation_len {
            return Err(ConfigError::Invalid(format!(
                "abbreviation length bounds {}..={} are empty",
                self.min_abbreviation_len, self.max_abbreviation_len
            )));
        }
        Ok(())
    }

    /// Read and validate a settings file. Missing keys take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let settings: Self = serde_json::from_str(&json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let settings = Self::load(path)?;
            tracing::info!(path = %path.display(), "Settings loaded");
            Ok(settings)
        } else {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            Ok(Self::default())
        }
    }
}
