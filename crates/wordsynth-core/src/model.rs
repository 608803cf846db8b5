//! A loaded embedding model: identity, store and similarity engine bundled together.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{Backend, SimilarityEngine};
use crate::store::EmbeddingStore;

/// Identity of one loaded store. `generation` changes on every load, so reloading
/// the same file never matches cache entries computed from the previous load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId {
    pub name: String,
    pub generation: u64,
}

pub struct Model {
    pub id: ModelId,
    pub path: PathBuf,
    pub engine: SimilarityEngine,
}

impl Model {
    pub fn new(id: ModelId, path: PathBuf, store: Arc<EmbeddingStore>, backend: Backend) -> Self {
        Self::from_engine(id, path, SimilarityEngine::build(store, backend))
    }

    pub fn from_engine(id: ModelId, path: PathBuf, engine: SimilarityEngine) -> Self {
        Self { id, path, engine }
    }

    pub fn store(&self) -> &EmbeddingStore {
        self.engine.store()
    }

    pub fn info(&self) -> ModelInfo {
        let store = self.store();
        ModelInfo {
            name: self.id.name.clone(),
            generation: self.id.generation,
            path: self.path.display().to_string(),
            vocab_size: store.len(),
            dimensions: store.dimension(),
            backend: self.engine.backend(),
            exact_index_enabled: self.engine.backend() == Backend::Exact,
            downgrade_reason: self.engine.downgrade_reason().map(str::to_string),
        }
    }
}

/// Metadata for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub generation: u64,
    pub path: String,
    pub vocab_size: usize,
    pub dimensions: usize,
    pub backend: Backend,
    pub exact_index_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgrade_reason: Option<String>,
}
