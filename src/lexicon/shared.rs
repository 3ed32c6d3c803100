use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use super::store::{load_lexicon, LexiconStore};
use super::LexiconError;

/// Handle to the current lexicon snapshot.
///
/// Readers take an `Arc` snapshot and keep it for the whole request. A reload
/// builds and validates a complete new store before swapping it in, so
/// in-flight requests never observe a partially updated lexicon.
pub struct SharedLexicon {
    current: RwLock<Arc<LexiconStore>>,
}

impl SharedLexicon {
    pub fn new(store: LexiconStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<LexiconStore> {
        // The guarded value is a single Arc; a poisoned lock cannot hold a torn value.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// Swap in a new snapshot, returning the previous one.
    pub fn replace(&self, store: LexiconStore) -> Arc<LexiconStore> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(store))
    }

    /// Load `path` and swap it in. On error the current snapshot stays active.
    pub fn reload_from(&self, path: &Path) -> Result<(), LexiconError> {
        let store = load_lexicon(path)?;
        let previous = self.replace(store);
        tracing::info!(
            previous_abbreviations = previous.len(),
            "Lexicon snapshot replaced"
        );
        Ok(())
    }
}

impl From<LexiconStore> for SharedLexicon {
    fn from(store: LexiconStore) -> Self {
        Self::new(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn snapshot_survives_replace() {
        let shared = SharedLexicon::new(
            LexiconStore::from_pairs(&[("MI", &["Myocardial Infarction"])]).unwrap(),
        );
        let before = shared.snapshot();

        shared.replace(LexiconStore::from_pairs(&[("HTN", &["Hypertension"])]).unwrap());

        assert!(before.contains("MI"));
        assert!(!shared.snapshot().contains("MI"));
        assert!(shared.snapshot().contains("HTN"));
    }

    #[test]
    fn failed_reload_keeps_current_snapshot() {
        let shared = SharedLexicon::new(
            LexiconStore::from_pairs(&[("MI", &["Myocardial Infarction"])]).unwrap(),
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"MI": []}}"#).unwrap();

        assert!(shared.reload_from(file.path()).is_err());
        assert!(shared.snapshot().contains("MI"));
    }

    #[test]
    fn successful_reload_swaps_snapshot() {
        let shared = SharedLexicon::from(LexiconStore::default());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"DVT": ["Deep Vein Thrombosis"]}}"#).unwrap();

        shared.reload_from(file.path()).unwrap();
        assert_eq!(shared.snapshot().len(), 1);
    }
}
