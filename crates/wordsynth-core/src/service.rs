//! Request-facing state: the active model and its layout cache.
//!
//! # Concurrency model
//!
//! The active model and its cache live together behind one `parking_lot::RwLock`
//! slot. Requests take a read lock just long enough to clone the `Arc`, then run to
//! completion against that snapshot without holding any lock. Loading a new source
//! builds everything outside the lock and swaps `{model, fresh cache}` in a single
//! write, so no request can pair the new model with layouts computed from the old one.
//! A failed load leaves the previous model active.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::{Config, SearchSettings};
use crate::engine::{Backend, Neighbor};
use crate::loader::EmbeddingFormat;
use crate::mixer;
use crate::model::{Model, ModelId, ModelInfo};
use crate::projection::{Projector, RandomProjector};
use crate::store::{EmbeddingStore, StoreError};
use crate::viz::{
    batch, compute_layout, BatchCache, BatchPage, CacheInfo, CacheKey, LayoutSettings, VizError,
};

struct Active {
    model: Model,
    cache: BatchCache,
}

/// Result of a word-existence check. `word` is the vocabulary spelling when found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordCheck {
    pub exists: bool,
    pub word: String,
}

/// A request for one page of an anchor's neighborhood layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub anchor: String,
    /// Words that must appear in the layout (e.g. the current nearest neighbors).
    #[serde(default)]
    pub must_include: Vec<String>,
    /// Current mix, drawn as an extra point when the layout is first built for page 0.
    /// It is not part of the cache key: once a layout is cached, later mixes are
    /// ignored until the anchor is cleared, and a layout first built from a later
    /// page never carries a mix point.
    #[serde(default)]
    pub mix: Option<Vec<f32>>,
    #[serde(default)]
    pub batch_index: usize,
    /// Falls back to the configured batch size.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

pub struct ServiceState {
    active: RwLock<Option<Arc<Active>>>,
    generation: AtomicU64,
    settings: SearchSettings,
    backend: Backend,
    projector: Box<dyn Projector>,
}

impl ServiceState {
    pub fn new(settings: SearchSettings, backend: Backend, projector: Box<dyn Projector>) -> Self {
        Self {
            active: RwLock::new(None),
            generation: AtomicU64::new(0),
            settings,
            backend,
            projector,
        }
    }

    /// State configured from `config`, with the default seeded projector.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.search,
            config.backend,
            Box::new(RandomProjector::new(config.search.projector_seed)),
        )
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Loads an embedding file and makes it the active model.
    pub fn load_model(
        &self,
        name: &str,
        path: &Path,
        format: EmbeddingFormat,
    ) -> Result<ModelInfo, ServiceError> {
        let store = EmbeddingStore::load(path, format).map_err(|e| {
            tracing::warn!(
                name,
                path = %path.display(),
                error = %e,
                "model load failed, keeping previous model"
            );
            e
        })?;
        Ok(self.install_store(name, path.to_path_buf(), store))
    }

    /// Makes an already-built store the active model and drops all cached layouts.
    pub fn install_store(&self, name: &str, path: PathBuf, store: EmbeddingStore) -> ModelInfo {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let id = ModelId {
            name: name.to_string(),
            generation,
        };
        let model = Model::new(id, path, Arc::new(store), self.backend);
        let info = model.info();
        let next = Arc::new(Active {
            model,
            cache: BatchCache::new(),
        });
        let previous = self.active.write().replace(next);
        if let Some(prev) = previous {
            tracing::info!(
                from = %prev.model.id.name,
                to = %info.name,
                dropped_layouts = prev.cache.len(),
                "switched embedding model"
            );
        }
        info
    }

    fn active(&self) -> Result<Arc<Active>, ServiceError> {
        self.active.read().clone().ok_or(ServiceError::NoModel)
    }

    pub fn model_info(&self) -> Result<ModelInfo, ServiceError> {
        Ok(self.active()?.model.info())
    }

    /// Looks `word` up, accepting common spelling variations.
    pub fn check_word(&self, word: &str) -> Result<WordCheck, ServiceError> {
        let active = self.active()?;
        Ok(match active.model.store().resolve(word) {
            Some(found) => WordCheck {
                exists: true,
                word: found.to_string(),
            },
            None => WordCheck {
                exists: false,
                word: word.trim().to_string(),
            },
        })
    }

    /// `word` followed by its nearest distinct neighbors, `count` words in total.
    pub fn basis_words(&self, word: &str, count: usize) -> Result<Vec<String>, ServiceError> {
        let active = self.active()?;
        let mut words = vec![word.to_string()];
        words.extend(active.model.engine.basis_candidates(word, count)?);
        words.truncate(count);
        Ok(words)
    }

    /// Normalized weighted mix, or `None` when there is nothing to mix.
    pub fn mix<S: AsRef<str>>(&self, pairs: &[(S, f32)]) -> Result<Option<Vec<f32>>, ServiceError> {
        let active = self.active()?;
        Ok(mixer::mix(active.model.store(), pairs))
    }

    /// Nearest words to an arbitrary vector.
    pub fn neighbors(
        &self,
        vector: &[f32],
        topn: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<Neighbor>, ServiceError> {
        let active = self.active()?;
        let dim = active.model.store().dimension();
        if vector.len() != dim {
            return Err(ServiceError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        Ok(active.model.engine.top_k(vector, topn, exclude))
    }

    /// One page of the anchor's neighborhood layout, computing and caching the
    /// layout on first use.
    pub fn visualization_batch(&self, req: &BatchRequest) -> Result<BatchPage, ServiceError> {
        let batch_size = req.batch_size.unwrap_or(self.settings.batch_size);
        if batch_size == 0 {
            return Err(VizError::ZeroBatchSize.into());
        }
        let active = self.active()?;
        let store = active.model.store();
        if !store.contains(&req.anchor) {
            return Err(StoreError::UnknownWord(req.anchor.clone()).into());
        }
        if let Some(m) = &req.mix {
            if m.len() != store.dimension() {
                return Err(ServiceError::DimensionMismatch {
                    expected: store.dimension(),
                    actual: m.len(),
                });
            }
        }

        let key = CacheKey::new(
            active.model.id.clone(),
            req.anchor.clone(),
            req.must_include.iter().cloned(),
        );
        let mix = if req.batch_index == 0 { req.mix.as_deref() } else { None };
        let settings = LayoutSettings {
            neighborhood_size: self.settings.neighborhood_size,
            min_local_vocabulary: self.settings.min_local_vocabulary,
            widen_topn: self.settings.widen_topn,
        };
        let layout = active.cache.get_or_compute(&key, || {
            compute_layout(&active.model.engine, self.projector.as_ref(), &key, mix, &settings)
        })?;
        Ok(batch(&layout, &req.anchor, req.batch_index, batch_size)?)
    }

    /// Drops every cached layout. Returns how many were removed.
    pub fn clear_cache(&self) -> usize {
        self.active().map(|a| a.cache.clear()).unwrap_or(0)
    }

    /// Drops cached layouts anchored at `word`. Returns how many were removed.
    pub fn clear_anchor(&self, word: &str) -> usize {
        self.active().map(|a| a.cache.clear_anchor(word)).unwrap_or(0)
    }

    pub fn cache_info(&self) -> CacheInfo {
        self.active().map(|a| a.cache.info()).unwrap_or(CacheInfo {
            entries: 0,
            anchors: Vec::new(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("no model loaded")]
    NoModel,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Viz(#[from] VizError),
    #[error("vector has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}
