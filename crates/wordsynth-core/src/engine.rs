//! Top-K cosine similarity over an [`EmbeddingStore`].
//!
//! Two interchangeable backends implement [`NeighborSearch`]:
//! - [`ExactIndex`] keeps its own contiguous copy of the unit vectors and selects the
//!   top candidates with a bounded heap.
//! - [`LinearScan`] keeps nothing extra and scores the store's table at query time.
//!
//! Both score rows with [`dot`] over the same normalized data and break ties by
//! ascending row, so their rankings are identical. The backend is chosen once in
//! [`SimilarityEngine::build`]; if the exact index cannot be allocated the engine
//! downgrades to the linear scan and records why.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{EmbeddingStore, StoreError};
use crate::vector::{dot, normalize};

/// Over-fetch factor used when an exclusion set is given.
const EXCLUDE_OVERFETCH: usize = 3;

/// Which backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Exact,
    LinearScan,
}

/// A scored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub word: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Ranks store rows against a unit-length query.
pub trait NeighborSearch: Send + Sync {
    /// Best `n` rows as `(row, score)`, score descending, ties by ascending row.
    fn search(&self, query: &[f32], n: usize) -> Vec<(usize, f32)>;
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    row: usize,
    score: f32,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    /// "Greater" means ranked better: higher score, then lower row.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.row.cmp(&self.row))
    }
}

/// Flat copy of every unit vector; one pass per query with a size-`n` min-heap.
pub struct ExactIndex {
    dim: usize,
    data: Vec<f32>,
}

impl ExactIndex {
    /// Copies the store's normalized table. Fails if the copy cannot be allocated.
    pub fn build(store: &EmbeddingStore) -> Result<Self, IndexBuildError> {
        let table = store.unit_table();
        let mut data = Vec::new();
        data.try_reserve_exact(table.len())
            .map_err(|e| IndexBuildError::Allocation {
                bytes: table.len() * std::mem::size_of::<f32>(),
                reason: e.to_string(),
            })?;
        data.extend_from_slice(table);
        Ok(Self {
            dim: store.dimension(),
            data,
        })
    }
}

impl NeighborSearch for ExactIndex {
    fn search(&self, query: &[f32], n: usize) -> Vec<(usize, f32)> {
        if n == 0 || self.dim == 0 {
            return Vec::new();
        }
        let n = n.min(self.data.len() / self.dim);
        // Min-heap of the best n seen so far; its top is the current worst keeper.
        let mut heap: BinaryHeap<std::cmp::Reverse<Scored>> = BinaryHeap::with_capacity(n + 1);
        for (row, v) in self.data.chunks_exact(self.dim).enumerate() {
            let candidate = Scored {
                row,
                score: dot(query, v),
            };
            if heap.len() < n {
                heap.push(std::cmp::Reverse(candidate));
            } else if let Some(worst) = heap.peek() {
                if candidate > worst.0 {
                    heap.pop();
                    heap.push(std::cmp::Reverse(candidate));
                }
            }
        }
        // Ascending Reverse = descending rank.
        heap.into_sorted_vec()
            .into_iter()
            .map(|std::cmp::Reverse(s)| (s.row, s.score))
            .collect()
    }
}

/// No auxiliary structure: scores the store's own table on every query.
pub struct LinearScan {
    store: Arc<EmbeddingStore>,
}

impl LinearScan {
    pub fn new(store: Arc<EmbeddingStore>) -> Self {
        Self { store }
    }
}

impl NeighborSearch for LinearScan {
    fn search(&self, query: &[f32], n: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<Scored> = (0..self.store.len())
            .map(|row| Scored {
                row,
                score: dot(query, self.store.unit_row(row)),
            })
            .collect();
        scored.sort_unstable_by(|a, b| b.cmp(a));
        scored.truncate(n);
        scored.into_iter().map(|s| (s.row, s.score)).collect()
    }
}

/// Similarity queries over one store. Read-only and shareable across threads.
pub struct SimilarityEngine {
    store: Arc<EmbeddingStore>,
    search: Box<dyn NeighborSearch>,
    backend: Backend,
    downgrade: Option<String>,
}

impl SimilarityEngine {
    /// Builds the preferred backend, falling back to [`LinearScan`] if the exact
    /// index fails to build.
    pub fn build(store: Arc<EmbeddingStore>, preferred: Backend) -> Self {
        Self::build_with(store, preferred, |s| {
            ExactIndex::build(s).map(|index| Box::new(index) as Box<dyn NeighborSearch>)
        })
    }

    /// Like [`build`](Self::build), with `exact` constructing the exact backend.
    pub fn build_with<F>(store: Arc<EmbeddingStore>, preferred: Backend, exact: F) -> Self
    where
        F: FnOnce(&EmbeddingStore) -> Result<Box<dyn NeighborSearch>, IndexBuildError>,
    {
        match preferred {
            Backend::Exact => match exact(&store) {
                Ok(search) => {
                    tracing::info!(words = store.len(), "exact similarity index built");
                    Self {
                        store,
                        search,
                        backend: Backend::Exact,
                        downgrade: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "exact index unavailable, using linear scan");
                    let mut engine = Self::linear(store);
                    engine.downgrade = Some(e.to_string());
                    engine
                }
            },
            Backend::LinearScan => Self::linear(store),
        }
    }

    /// Uses a caller-supplied backend.
    pub fn with_search(
        store: Arc<EmbeddingStore>,
        search: Box<dyn NeighborSearch>,
        backend: Backend,
    ) -> Self {
        Self {
            store,
            search,
            backend,
            downgrade: None,
        }
    }

    fn linear(store: Arc<EmbeddingStore>) -> Self {
        Self {
            search: Box::new(LinearScan::new(Arc::clone(&store))),
            store,
            backend: Backend::LinearScan,
            downgrade: None,
        }
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    /// Backend actually in use.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Why the exact index was not used, if it was requested and failed.
    pub fn downgrade_reason(&self) -> Option<&str> {
        self.downgrade.as_deref()
    }

    /// Up to `k` words most similar to `query`, never returning a word in `exclude`.
    ///
    /// `query` need not be normalized. Fewer than `k` results come back only when the
    /// vocabulary runs out of eligible words.
    pub fn top_k(&self, query: &[f32], k: usize, exclude: &HashSet<String>) -> Vec<Neighbor> {
        if k == 0 || query.len() != self.store.dimension() {
            return Vec::new();
        }
        let query = normalize(query);
        let total = self.store.len();
        let fetch = if exclude.is_empty() {
            k
        } else {
            k.saturating_mul(EXCLUDE_OVERFETCH)
                .max(k.saturating_add(exclude.len()))
        }
        .min(total);

        self.search
            .search(&query, fetch)
            .into_iter()
            .map(|(row, score)| (self.store.word(row), score))
            .filter(|(word, _)| !exclude.contains(*word))
            .take(k)
            .map(|(word, score)| Neighbor {
                word: word.to_string(),
                score,
            })
            .collect()
    }

    /// Neighbors of a stored word, excluding the word itself.
    pub fn most_similar_to(&self, word: &str, k: usize) -> Result<Vec<Neighbor>, StoreError> {
        let v = self.store.vector(word)?;
        let exclude = HashSet::from([word.to_string()]);
        Ok(self.top_k(v, k, &exclude))
    }

    /// Up to `count` distinct neighbors of `base` to offer as mixing basis words.
    pub fn basis_candidates(&self, base: &str, count: usize) -> Result<Vec<String>, StoreError> {
        let v = self.store.vector(base)?;
        let count = count.min(self.store.len());
        let mut candidates: Vec<String> = Vec::with_capacity(count);
        for n in self.top_k(v, count.saturating_mul(2), &HashSet::new()) {
            if candidates.len() >= count {
                break;
            }
            if n.word != base && !candidates.contains(&n.word) {
                candidates.push(n.word);
            }
        }
        Ok(candidates)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexBuildError {
    #[error("could not allocate {bytes} bytes for the exact index: {reason}")]
    Allocation { bytes: usize, reason: String },
}
