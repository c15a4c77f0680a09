//! Roster of enrolled identity embeddings, loaded once at startup.

use crate::types::{Embedding, Identity, RosterEntry};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("roster not found: {0}; build the embedding roster before starting a session")]
    NotFound(String),
    #[error("roster is corrupt: {0}")]
    CorruptData(String),
    #[error("failed to read roster: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk layout: two aligned sequences.
#[derive(Deserialize)]
struct RosterFile {
    identities: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

/// Immutable in-memory roster.
///
/// Holds every enrolled entry unreduced (several photos per person are
/// kept as separate entries) and the derived set of distinct identities.
/// Nothing mutates it after construction, so it is shared across threads
/// behind a plain `Arc`.
#[derive(Debug)]
pub struct EmbeddingStore {
    entries: Vec<RosterEntry>,
    known: BTreeSet<Identity>,
    dimension: usize,
}

impl EmbeddingStore {
    /// Load a JSON roster `{"identities": [...], "embeddings": [[...], ...]}`.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }

        let raw = std::fs::read_to_string(path)?;
        let file: RosterFile = serde_json::from_str(&raw)
            .map_err(|e| StoreError::CorruptData(format!("{}: {e}", path.display())))?;

        let store = Self::from_parts(file.identities, file.embeddings)?;

        tracing::info!(
            path = %path.display(),
            entries = store.len(),
            identities = store.known.len(),
            dimension = store.dimension,
            "loaded roster"
        );

        Ok(store)
    }

    /// Build a store from aligned identity/embedding sequences, validating
    /// counts, dimensionality and values.
    pub fn from_parts(
        identities: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self, StoreError> {
        if identities.len() != embeddings.len() {
            return Err(StoreError::CorruptData(format!(
                "{} identities but {} embeddings",
                identities.len(),
                embeddings.len()
            )));
        }

        let dimension = match embeddings.first() {
            Some(first) => first.len(),
            None => return Err(StoreError::CorruptData("roster has no entries".into())),
        };
        if dimension == 0 {
            return Err(StoreError::CorruptData("embeddings are empty".into()));
        }

        let mut entries = Vec::with_capacity(identities.len());
        for (i, (identity, values)) in identities.into_iter().zip(embeddings).enumerate() {
            if values.len() != dimension {
                return Err(StoreError::CorruptData(format!(
                    "entry {i} ({identity}) has dimension {}, expected {dimension}",
                    values.len()
                )));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(StoreError::CorruptData(format!(
                    "entry {i} ({identity}) contains non-finite values"
                )));
            }
            entries.push(RosterEntry {
                identity: Identity::new(identity),
                embedding: Embedding::new(values),
            });
        }

        let known = entries.iter().map(|e| e.identity.clone()).collect();

        Ok(Self {
            entries,
            known,
            dimension,
        })
    }

    pub fn all_entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// Distinct identities across all entries.
    pub fn known_identities(&self) -> &BTreeSet<Identity> {
        &self.known
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of enrolled entries per identity, in identity order.
    pub fn entry_counts(&self) -> Vec<(&Identity, usize)> {
        self.known
            .iter()
            .map(|id| (id, self.entries.iter().filter(|e| &e.identity == id).count()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_roster(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_roster() {
        let file = write_roster(
            r#"{"identities": ["Alice", "Bob", "Alice"],
                "embeddings": [[1.0, 0.0], [0.0, 1.0], [0.9, 0.1]]}"#,
        );
        let store = EmbeddingStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.dimension(), 2);
        let known: Vec<&str> = store.known_identities().iter().map(Identity::as_str).collect();
        assert_eq!(known, ["Alice", "Bob"]);
        assert_eq!(store.all_entries()[2].identity.as_str(), "Alice");
    }

    #[test]
    fn test_entry_counts_keep_duplicates() {
        let store = EmbeddingStore::from_parts(
            vec!["Bob".into(), "Alice".into(), "Alice".into()],
            vec![vec![1.0], vec![2.0], vec![3.0]],
        )
        .unwrap();
        let counts: Vec<(&str, usize)> = store
            .entry_counts()
            .into_iter()
            .map(|(id, n)| (id.as_str(), n))
            .collect();
        assert_eq!(counts, [("Alice", 2), ("Bob", 1)]);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = EmbeddingStore::load(&dir.path().join("roster.json")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_count_mismatch_is_corrupt() {
        let file = write_roster(r#"{"identities": ["Alice", "Bob"], "embeddings": [[1.0, 0.0]]}"#);
        let err = EmbeddingStore::load(file.path()).unwrap_err();
        assert!(matches!(err, StoreError::CorruptData(_)), "got {err:?}");
    }

    #[test]
    fn test_inconsistent_dimension_is_corrupt() {
        let err = EmbeddingStore::from_parts(
            vec!["Alice".into(), "Bob".into()],
            vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]],
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::CorruptData(msg) if msg.contains("Bob")));
    }

    #[test]
    fn test_empty_roster_is_corrupt() {
        let err = EmbeddingStore::from_parts(vec![], vec![]).unwrap_err();
        assert!(matches!(err, StoreError::CorruptData(_)));
    }

    #[test]
    fn test_zero_dimension_is_corrupt() {
        let err = EmbeddingStore::from_parts(vec!["Alice".into()], vec![vec![]]).unwrap_err();
        assert!(matches!(err, StoreError::CorruptData(_)));
    }

    #[test]
    fn test_malformed_json_is_corrupt() {
        let file = write_roster("{not json");
        let err = EmbeddingStore::load(file.path()).unwrap_err();
        assert!(matches!(err, StoreError::CorruptData(_)));
    }

    #[test]
    fn test_non_finite_values_are_corrupt() {
        let err = EmbeddingStore::from_parts(vec!["Alice".into()], vec![vec![1.0, f32::NAN]])
            .unwrap_err();
        assert!(matches!(err, StoreError::CorruptData(_)));
    }
}
