//! Immutable in-memory embedding store: vocabulary lookup, raw vectors and their
//! unit-normalized copies.
//!
//! Built once per embedding source and never mutated. Switching sources replaces the
//! whole store (see [`ServiceState`](crate::service::ServiceState)).

use std::collections::HashMap;
use std::path::Path;

use crate::loader::{load_embeddings, EmbeddingFormat, LoadError, RawEmbeddings};
use crate::vector::normalize_in_place;

/// Word vectors stored row-major in two flat tables of `len * dim` floats.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    words: Vec<String>,
    index: HashMap<String, usize>,
    dim: usize,
    vectors: Vec<f32>,
    /// Same rows as `vectors`, L2-normalized. Degenerate rows stay as they were.
    unit_vectors: Vec<f32>,
}

impl EmbeddingStore {
    /// Loads and builds a store from an embedding file.
    pub fn load(path: &Path, format: EmbeddingFormat) -> Result<Self, StoreError> {
        let raw = load_embeddings(path, format)?;
        Self::from_raw(raw)
    }

    /// Builds a store from parsed rows.
    pub fn from_raw(raw: RawEmbeddings) -> Result<Self, StoreError> {
        Self::from_pairs(raw.entries)
    }

    /// Builds a store from `(word, vector)` pairs. All vectors must share one dimension.
    /// A repeated word keeps its first vector.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let mut words = Vec::new();
        let mut index = HashMap::new();
        let mut vectors = Vec::new();
        let mut dim = None;

        for (word, vector) in pairs {
            let word = word.into();
            let expected = *dim.get_or_insert(vector.len());
            if vector.len() != expected {
                return Err(StoreError::InconsistentDimension {
                    word,
                    expected,
                    actual: vector.len(),
                });
            }
            if index.contains_key(&word) {
                tracing::debug!(%word, "duplicate word in embedding source, keeping first");
                continue;
            }
            index.insert(word.clone(), words.len());
            words.push(word);
            vectors.extend_from_slice(&vector);
        }

        let dim = match dim {
            Some(d) if d > 0 && !words.is_empty() => d,
            _ => return Err(StoreError::Empty),
        };

        // One extra copy of the table, normalized row by row.
        let mut unit_vectors = vectors.clone();
        for row in unit_vectors.chunks_exact_mut(dim) {
            normalize_in_place(row);
        }

        tracing::info!(words = words.len(), dim, "embedding store built");
        Ok(Self {
            words,
            index,
            dim,
            vectors,
            unit_vectors,
        })
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index.contains_key(word)
    }

    /// Raw vector for `word`.
    pub fn vector(&self, word: &str) -> Result<&[f32], StoreError> {
        self.index_of(word)
            .map(|i| self.row(i))
            .ok_or_else(|| StoreError::UnknownWord(word.to_string()))
    }

    /// Unit-normalized vector for `word`.
    pub fn unit_vector(&self, word: &str) -> Result<&[f32], StoreError> {
        self.index_of(word)
            .map(|i| self.unit_row(i))
            .ok_or_else(|| StoreError::UnknownWord(word.to_string()))
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Number of words in the vocabulary.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn index_of(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    /// Word at row `i`. Panics if out of range.
    pub fn word(&self, i: usize) -> &str {
        &self.words[i]
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    pub(crate) fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dim..(i + 1) * self.dim]
    }

    pub(crate) fn unit_row(&self, i: usize) -> &[f32] {
        &self.unit_vectors[i * self.dim..(i + 1) * self.dim]
    }

    /// The whole normalized table, row-major.
    pub(crate) fn unit_table(&self) -> &[f32] {
        &self.unit_vectors
    }

    /// Finds the vocabulary spelling of a user-typed word.
    ///
    /// Tries the word as given, then common spelling variations (underscores vs
    /// spaces, capitalized, upper-case), then a case-insensitive match.
    pub fn resolve(&self, word: &str) -> Option<&str> {
        let word = word.trim();
        if word.is_empty() {
            return None;
        }
        if let Some(i) = self.index_of(word) {
            return Some(self.word(i));
        }
        let variations = [
            word.replace('_', " "),
            word.replace('_', ""),
            word.replace(' ', "_"),
            capitalize(word),
            word.to_uppercase(),
        ];
        if let Some(i) = variations.iter().find_map(|v| self.index_of(v)) {
            return Some(self.word(i));
        }
        let lower = word.to_lowercase();
        self.words
            .iter()
            .find(|w| w.to_lowercase() == lower)
            .map(String::as_str)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("word {word:?} has dimension {actual}, expected {expected}")]
    InconsistentDimension {
        word: String,
        expected: usize,
        actual: usize,
    },
    #[error("embedding source contains no vectors")]
    Empty,
    #[error("word not in vocabulary: {0}")]
    UnknownWord(String),
}
