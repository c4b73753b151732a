//! Nearest-identity matching by cosine similarity.

use serde::{Deserialize, Serialize};

use super::store::{l2_norm, EmbeddingStore, StoreError};

/// Which stored vectors a query is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum VerifyPolicy {
    /// One averaged vector per identity. Cheaper, approximate.
    Mean,
    /// Every sample of every identity.
    #[default]
    PerSample,
}

/// Best identity for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Matched identity, empty when nothing matched
    pub name: String,
    /// Cosine similarity of the winning candidate, `0.0` when nothing matched
    pub score: f32,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            name: String::new(),
            score: 0.0,
        }
    }

    pub fn is_match(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Cosine similarity of two vectors. Zero-norm or mismatched inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

/// Find the identity whose candidate vector is most similar to `query`.
///
/// Candidates are scanned identity by identity in store order (and sample
/// by sample within an identity); only a strictly greater score replaces
/// the current best, so the first of several equal candidates wins. A
/// candidate must score above `0.0` to match at all; there is no other
/// acceptance threshold.
pub fn recognize(
    store: &EmbeddingStore,
    query: &[f32],
    policy: VerifyPolicy,
) -> Result<MatchResult, StoreError> {
    if let Some(expected) = store.dimensions() {
        if query.len() != expected {
            return Err(StoreError::DimensionMismatch {
                expected,
                got: query.len(),
            });
        }
    }

    let mut best = MatchResult::no_match();
    for identity in store.identities() {
        let score = match policy {
            VerifyPolicy::Mean => cosine_similarity(query, identity.mean()),
            VerifyPolicy::PerSample => identity
                .samples()
                .iter()
                .map(|sample| cosine_similarity(query, sample))
                .fold(f32::NEG_INFINITY, |best, s| if s > best { s } else { best }),
        };

        if score > best.score {
            best = MatchResult {
                name: identity.name().to_string(),
                score,
            };
        }
    }

    Ok(best)
}
