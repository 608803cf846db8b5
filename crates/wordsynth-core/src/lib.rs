//! All backend logic independent of how the app is run (CLI or a server).
//!
//! Embedding files live wherever the user keeps them. wordsynth loads one at a time
//! into an immutable [`EmbeddingStore`], searches it through a [`SimilarityEngine`],
//! and serves cached 3D neighborhood layouts through [`ServiceState`]. Only config is
//! kept in its own app data directory (see [app_data]).

pub mod app_data;
pub mod config;
pub mod engine;
pub mod loader;
pub mod mixer;
pub mod model;
pub mod neighborhood;
pub mod projection;
pub mod service;
pub mod store;
pub mod vector;
pub mod viz;

pub use app_data::app_data_dir;
pub use config::{
    get_embeddings_dir, load_config, save_config, set_embeddings_dir, Config, ConfigError,
    SearchSettings, SourceConfig,
};
pub use engine::{Backend, Neighbor, NeighborSearch, SimilarityEngine};
pub use loader::{discover_sources, load_embeddings, EmbeddingFormat, LoadError, RawEmbeddings};
pub use mixer::{direction_from_pairs, mix};
pub use model::{Model, ModelId, ModelInfo};
pub use neighborhood::build_local_vocabulary;
pub use projection::{ProjectError, Projector, RandomProjector};
pub use service::{BatchRequest, ServiceError, ServiceState, WordCheck};
pub use store::{EmbeddingStore, StoreError};
pub use viz::{BatchCache, BatchPage, CacheInfo, CacheKey, Layout, Point, VizError};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "wordsynth-core ready"
}
