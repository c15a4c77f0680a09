//! Nearest-identity search over the roster.

use crate::store::EmbeddingStore;
use crate::types::{Embedding, MatchResult};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("probe has dimension {actual}, roster expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Strategy for finding the roster entry nearest to a probe embedding.
///
/// Implementations own whatever index they search, so an approximate
/// nearest-neighbour structure can replace the linear scan without touching
/// callers.
pub trait Matcher: Send + Sync {
    fn find(&self, probe: &Embedding, threshold: f32) -> Result<MatchResult, MatchError>;
}

/// Exhaustive cosine-similarity scan, O(R) per probe.
///
/// Ties resolve to the earliest roster entry: the running best is replaced
/// only on a strictly greater similarity.
pub struct CosineMatcher {
    store: Arc<EmbeddingStore>,
}

impl CosineMatcher {
    pub fn new(store: Arc<EmbeddingStore>) -> Self {
        Self { store }
    }
}

impl Matcher for CosineMatcher {
    fn find(&self, probe: &Embedding, threshold: f32) -> Result<MatchResult, MatchError> {
        let expected = self.store.dimension();
        if probe.dimension() != expected {
            return Err(MatchError::DimensionMismatch {
                expected,
                actual: probe.dimension(),
            });
        }

        let entries = self.store.all_entries();
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in entries.iter().enumerate() {
            let sim = probe.similarity(&entry.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        let result = match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                identity: Some(entries[idx].identity.clone()),
                similarity: best_sim,
            },
            Some(_) => MatchResult::unmatched(best_sim),
            None => MatchResult::unmatched(0.0),
        };

        tracing::trace!(
            identity = ?result.identity,
            similarity = result.similarity,
            threshold,
            "roster scan"
        );

        Ok(result)
    }
}
