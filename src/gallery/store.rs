//! In-memory embedding store for enrolled identities.
//!
//! Holds every sample embedding per identity plus their element-wise mean,
//! and a validity flag telling whether the contents still reflect the
//! enrollment directory.

use std::collections::HashMap;

use crate::face::Embedding;

/// One enrolled person.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    name: String,
    samples: Vec<Embedding>,
    mean: Embedding,
}

impl Identity {
    fn new(name: String, first: Embedding) -> Self {
        Self {
            name,
            mean: first.clone(),
            samples: vec![first],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sample embeddings in insertion order. Never empty.
    pub fn samples(&self) -> &[Embedding] {
        &self.samples
    }

    /// Element-wise average of [`Identity::samples`].
    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    fn push(&mut self, sample: Embedding) {
        self.samples.push(sample);
        self.mean = elementwise_mean(&self.samples);
    }
}

/// Identity gallery keyed by name.
///
/// Iteration order over identities is insertion order.
#[derive(Debug, Default)]
pub struct EmbeddingStore {
    identities: Vec<Identity>,
    /// Identity name -> position in `identities`
    positions: HashMap<String, usize>,
    /// Dimension of every stored vector, fixed by the first sample
    dimensions: Option<usize>,
    valid: bool,
}

impl EmbeddingStore {
    /// Create an empty, stale store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample to `name`, creating the identity if needed, and
    /// recompute its mean.
    pub fn add_sample(&mut self, name: &str, sample: Embedding) -> Result<(), StoreError> {
        if let Some(expected) = self.dimensions {
            if sample.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    got: sample.len(),
                });
            }
        }

        if l2_norm(&sample) < f32::EPSILON {
            return Err(StoreError::ZeroNormVector);
        }

        self.dimensions = Some(sample.len());

        match self.positions.get(name) {
            Some(&idx) => self.identities[idx].push(sample),
            None => {
                self.positions
                    .insert(name.to_string(), self.identities.len());
                self.identities
                    .push(Identity::new(name.to_string(), sample));
            }
        }

        Ok(())
    }

    /// Remove every identity. The validity flag is left as is.
    pub fn clear(&mut self) {
        self.identities.clear();
        self.positions.clear();
        self.dimensions = None;
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Flag the store as out of date; the next read rebuilds it.
    pub fn mark_stale(&mut self) {
        self.valid = false;
    }

    /// Rebuild the store if it is stale.
    ///
    /// Clears the store, runs `populate`, and marks the store valid once
    /// `populate` succeeds. If `populate` fails the store stays stale with
    /// whatever was added so far. Returns `Ok(false)` without calling
    /// `populate` when the store is already valid.
    pub fn rebuild_if_stale<F, E>(&mut self, populate: F) -> Result<bool, E>
    where
        F: FnOnce(&mut Self) -> Result<(), E>,
    {
        if self.valid {
            return Ok(false);
        }

        self.clear();
        populate(self)?;
        self.valid = true;

        Ok(true)
    }

    /// All identities in insertion order.
    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.positions.get(name).map(|&idx| &self.identities[idx])
    }

    /// Dimension of stored vectors, `None` while empty.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Total number of sample vectors across identities.
    pub fn sample_count(&self) -> usize {
        self.identities.iter().map(|i| i.samples.len()).sum()
    }
}

/// Errors that can occur when adding samples.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or match a zero-norm vector")]
    ZeroNormVector,
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn elementwise_mean(samples: &[Embedding]) -> Embedding {
    let dims = samples.first().map(|s| s.len()).unwrap_or(0);
    let mut mean = vec![0.0f32; dims];
    for sample in samples {
        for (acc, v) in mean.iter_mut().zip(sample) {
            *acc += v;
        }
    }
    let n = samples.len().max(1) as f32;
    for acc in &mut mean {
        *acc /= n;
    }
    mean
}
