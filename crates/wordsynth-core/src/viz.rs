//! Neighborhood layouts for 3D visualization and the cache that serves them in batches.
//!
//! A layout is computed once per [`CacheKey`] (model, anchor, must-include words),
//! re-centered so the anchor sits at the origin, and stored immutably. Clients then
//! page through it with [`batch`]. Entries are only ever inserted whole or removed
//! whole; concurrent misses on the same key may compute twice and the last insert wins.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::SimilarityEngine;
use crate::model::ModelId;
use crate::neighborhood::{local_vocabulary_or_widen, MIN_LOCAL_VOCABULARY, WIDEN_TOPN};
use crate::projection::{ProjectError, Projector};
use crate::store::StoreError;

/// Label of the synthetic point that marks the current mix.
pub const MIX_LABEL: &str = "CURRENT MIX";

/// Cache key. `must_include` is sorted and deduplicated so equal sets compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model: ModelId,
    pub anchor: String,
    pub must_include: Vec<String>,
}

impl CacheKey {
    pub fn new<I, S>(model: ModelId, anchor: impl Into<String>, must_include: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut must_include: Vec<String> = must_include.into_iter().map(Into::into).collect();
        must_include.sort();
        must_include.dedup();
        Self {
            model,
            anchor: anchor.into(),
            must_include,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub word: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub is_anchor: bool,
    /// Supplied by the caller as a must-include word.
    pub is_neighbor: bool,
    pub is_mix: bool,
}

/// Full, re-centered point list for one key. Anchor first.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub points: Vec<Point>,
    /// Vocabulary words in the layout (the mix point is not counted).
    pub word_count: usize,
}

/// Sizes used when building a layout's local vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutSettings {
    pub neighborhood_size: usize,
    pub min_local_vocabulary: usize,
    pub widen_topn: usize,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            neighborhood_size: 1500,
            min_local_vocabulary: MIN_LOCAL_VOCABULARY,
            widen_topn: WIDEN_TOPN,
        }
    }
}

/// Builds the layout for `key`: local vocabulary around the anchor, plus the
/// must-include words, plus an optional mix point, projected and re-centered.
pub fn compute_layout(
    engine: &SimilarityEngine,
    projector: &dyn Projector,
    key: &CacheKey,
    mix: Option<&[f32]>,
    settings: &LayoutSettings,
) -> Result<Layout, VizError> {
    let store = engine.store();
    let anchor = key.anchor.as_str();
    if !store.contains(anchor) {
        return Err(StoreError::UnknownWord(anchor.to_string()).into());
    }
    if let Some(m) = mix {
        if m.len() != store.dimension() {
            return Err(VizError::DimensionMismatch {
                expected: store.dimension(),
                actual: m.len(),
            });
        }
    }

    let mut words = local_vocabulary_or_widen(
        engine,
        anchor,
        settings.neighborhood_size,
        settings.min_local_vocabulary,
        settings.widen_topn,
    );
    if let Some(pos) = words.iter().position(|w| w == anchor) {
        let a = words.remove(pos);
        words.insert(0, a);
    } else {
        words.insert(0, anchor.to_string());
    }
    let mut present: HashSet<String> = words.iter().cloned().collect();
    for w in &key.must_include {
        if store.contains(w) && present.insert(w.clone()) {
            words.push(w.clone());
        }
    }

    let mut rows: Vec<&[f32]> = Vec::with_capacity(words.len() + 1);
    for w in &words {
        rows.push(store.vector(w)?);
    }
    if let Some(m) = mix {
        rows.push(m);
    }

    let coords = projector.project(&rows)?;
    if coords.len() != rows.len() {
        return Err(ProjectError::Failed(format!(
            "projector returned {} points for {} rows",
            coords.len(),
            rows.len()
        ))
        .into());
    }
    let [ox, oy, oz] = coords[0];
    let must_include: HashSet<&str> = key.must_include.iter().map(String::as_str).collect();

    let word_count = words.len();
    let mut points: Vec<Point> = words
        .into_iter()
        .zip(&coords)
        .map(|(word, c)| Point {
            is_anchor: word == anchor,
            is_neighbor: must_include.contains(word.as_str()),
            is_mix: false,
            x: c[0] - ox,
            y: c[1] - oy,
            z: c[2] - oz,
            word,
        })
        .collect();
    if mix.is_some() {
        let c = coords[word_count];
        points.push(Point {
            word: MIX_LABEL.to_string(),
            x: c[0] - ox,
            y: c[1] - oy,
            z: c[2] - oz,
            is_anchor: false,
            is_neighbor: false,
            is_mix: true,
        });
    }
    tracing::debug!(anchor, points = points.len(), "layout computed");
    Ok(Layout { points, word_count })
}

/// One page of a layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPage {
    pub anchor: String,
    pub points: Vec<Point>,
    pub word_count: usize,
    /// Points in the full layout, including the mix point if present.
    pub total_count: usize,
    pub batch_index: usize,
    pub total_batches: usize,
    pub is_complete: bool,
}

/// Slices `[index * size, min(index * size + size, total))` out of a layout.
///
/// Out-of-range pages are empty and complete. The anchor leads page 0.
pub fn batch(
    layout: &Layout,
    anchor: &str,
    batch_index: usize,
    batch_size: usize,
) -> Result<BatchPage, VizError> {
    if batch_size == 0 {
        return Err(VizError::ZeroBatchSize);
    }
    let total = layout.points.len();
    let total_batches = total.div_ceil(batch_size);
    let start = batch_index.checked_mul(batch_size).unwrap_or(usize::MAX);

    let points = if start >= total {
        Vec::new()
    } else {
        let end = start.saturating_add(batch_size).min(total);
        let mut page = layout.points[start..end].to_vec();
        if batch_index == 0 {
            if let Some(pos) = page.iter().position(|p| p.is_anchor) {
                let a = page.remove(pos);
                page.insert(0, a);
            }
        }
        page
    };

    Ok(BatchPage {
        anchor: anchor.to_string(),
        points,
        word_count: layout.word_count,
        total_count: total,
        batch_index,
        total_batches,
        is_complete: batch_index.saturating_add(1) >= total_batches,
    })
}

#[derive(Default)]
struct CacheMaps {
    entries: HashMap<CacheKey, Arc<Layout>>,
    by_anchor: HashMap<String, HashSet<CacheKey>>,
}

/// Snapshot of the cache contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub entries: usize,
    pub anchors: Vec<String>,
}

/// Layout cache keyed by [`CacheKey`], with an anchor index for targeted eviction.
/// No TTL or size-based eviction.
#[derive(Default)]
pub struct BatchCache {
    maps: Mutex<CacheMaps>,
}

impl BatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Layout>> {
        self.maps.lock().entries.get(key).cloned()
    }

    /// Stores `layout` under `key`, replacing any previous entry whole.
    pub fn insert(&self, key: CacheKey, layout: Layout) -> Arc<Layout> {
        let layout = Arc::new(layout);
        let mut maps = self.maps.lock();
        maps.by_anchor
            .entry(key.anchor.clone())
            .or_default()
            .insert(key.clone());
        maps.entries.insert(key, Arc::clone(&layout));
        layout
    }

    /// Cached layout for `key`, computing it on a miss. `compute` runs without the
    /// lock held, so two misses on one key may both compute; the later insert
    /// replaces the earlier entry whole.
    pub fn get_or_compute<E>(
        &self,
        key: &CacheKey,
        compute: impl FnOnce() -> Result<Layout, E>,
    ) -> Result<Arc<Layout>, E> {
        if let Some(hit) = self.get(key) {
            tracing::debug!(anchor = %key.anchor, "layout cache hit");
            return Ok(hit);
        }
        tracing::debug!(anchor = %key.anchor, "layout cache miss");
        let layout = compute()?;
        Ok(self.insert(key.clone(), layout))
    }

    /// Drops every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut maps = self.maps.lock();
        let n = maps.entries.len();
        maps.entries.clear();
        maps.by_anchor.clear();
        n
    }

    /// Drops every entry whose anchor is `anchor`. Returns how many were removed.
    pub fn clear_anchor(&self, anchor: &str) -> usize {
        let mut maps = self.maps.lock();
        let Some(keys) = maps.by_anchor.remove(anchor) else {
            return 0;
        };
        let mut removed = 0;
        for k in keys {
            if maps.entries.remove(&k).is_some() {
                removed += 1;
            }
        }
        tracing::debug!(anchor, removed, "layout cache entries evicted");
        removed
    }

    pub fn len(&self) -> usize {
        self.maps.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self) -> CacheInfo {
        let maps = self.maps.lock();
        let mut anchors: Vec<String> = maps.by_anchor.keys().cloned().collect();
        anchors.sort();
        CacheInfo {
            entries: maps.entries.len(),
            anchors,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VizError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Projection(#[from] ProjectError),
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
    #[error("mix vector has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::engine::Backend;
    use crate::projection::RandomProjector;
    use crate::store::EmbeddingStore;

    fn engine() -> SimilarityEngine {
        let mut pairs = Vec::new();
        for i in 0..30 {
            let t = i as f32 * 0.1;
            pairs.push((format!("w{i}"), vec![t.cos(), t.sin(), 0.1 * t, 1.0]));
        }
        pairs.push(("outlier".to_string(), vec![0.0, 0.0, -5.0, 0.0]));
        let store = EmbeddingStore::from_pairs(pairs).unwrap();
        SimilarityEngine::build(Arc::new(store), Backend::Exact)
    }

    fn model() -> ModelId {
        ModelId {
            name: "toy".into(),
            generation: 1,
        }
    }

    fn settings(size: usize) -> LayoutSettings {
        LayoutSettings {
            neighborhood_size: size,
            min_local_vocabulary: 3,
            widen_topn: 8,
        }
    }

    fn layout_of(n: usize) -> Layout {
        let points = (0..n)
            .map(|i| Point {
                word: format!("p{i}"),
                x: i as f32,
                y: 0.0,
                z: 0.0,
                is_anchor: i == 0,
                is_neighbor: false,
                is_mix: false,
            })
            .collect();
        Layout { points, word_count: n }
    }

    #[test]
    fn key_canonicalizes_must_include() {
        let a = CacheKey::new(model(), "w0", ["b", "a", "b"]);
        let b = CacheKey::new(model(), "w0", ["a", "b"]);
        assert_eq!(a, b);
        assert_eq!(a.must_include, vec!["a", "b"]);
    }

    #[test]
    fn anchor_is_at_origin_and_first() {
        let e = engine();
        let key = CacheKey::new(model(), "w10", Vec::<String>::new());
        let p = RandomProjector::default();
        let layout = compute_layout(&e, &p, &key, None, &settings(12)).unwrap();
        let first = &layout.points[0];
        assert_eq!(first.word, "w10");
        assert!(first.is_anchor);
        assert_eq!((first.x, first.y, first.z), (0.0, 0.0, 0.0));
        assert_eq!(layout.word_count, layout.points.len());
    }

    #[test]
    fn must_include_words_are_added_and_flagged() {
        let e = engine();
        let key = CacheKey::new(model(), "w0", ["outlier", "unknown"]);
        let p = RandomProjector::default();
        let layout = compute_layout(&e, &p, &key, None, &settings(5)).unwrap();
        let outlier = layout.points.iter().find(|p| p.word == "outlier").unwrap();
        assert!(outlier.is_neighbor);
        assert!(!layout.points.iter().any(|p| p.word == "unknown"));
    }

    #[test]
    fn mix_point_is_appended_last() {
        let e = engine();
        let key = CacheKey::new(model(), "w0", Vec::<String>::new());
        let mix = [1.0f32, 0.0, 0.0, 1.0];
        let p = RandomProjector::default();
        let layout = compute_layout(&e, &p, &key, Some(&mix), &settings(5)).unwrap();
        let last = layout.points.last().unwrap();
        assert!(last.is_mix);
        assert_eq!(last.word, MIX_LABEL);
        assert_eq!(layout.word_count + 1, layout.points.len());
    }

    #[test]
    fn mix_dimension_checked() {
        let e = engine();
        let key = CacheKey::new(model(), "w0", Vec::<String>::new());
        let p = RandomProjector::default();
        let err = compute_layout(&e, &p, &key, Some(&[1.0f32][..]), &settings(5)).unwrap_err();
        assert!(matches!(err, VizError::DimensionMismatch { expected: 4, actual: 1 }));
    }

    #[test]
    fn unknown_anchor_is_error() {
        let e = engine();
        let key = CacheKey::new(model(), "nope", Vec::<String>::new());
        let p = RandomProjector::default();
        let err = compute_layout(&e, &p, &key, None, &settings(5)).unwrap_err();
        assert!(matches!(err, VizError::Store(StoreError::UnknownWord(_))));
    }

    #[test]
    fn batch_bounds() {
        let layout = layout_of(45);
        let p0 = batch(&layout, "p0", 0, 20).unwrap();
        assert_eq!(p0.points.len(), 20);
        assert_eq!(p0.total_batches, 3);
        assert!(!p0.is_complete);
        let p2 = batch(&layout, "p0", 2, 20).unwrap();
        assert_eq!(p2.points.len(), 5);
        assert!(p2.is_complete);
        let p9 = batch(&layout, "p0", 9, 20).unwrap();
        assert!(p9.points.is_empty());
        assert!(p9.is_complete);
        assert!(matches!(batch(&layout, "p0", 0, 0), Err(VizError::ZeroBatchSize)));
        assert!(batch(&layout, "p0", usize::MAX, 7).unwrap().is_complete);
    }

    #[test]
    fn batch_zero_leads_with_anchor() {
        let mut layout = layout_of(6);
        layout.points[0].is_anchor = false;
        layout.points[3].is_anchor = true;
        let p0 = batch(&layout, "p3", 0, 4).unwrap();
        assert_eq!(p0.points[0].word, "p3");
        assert_eq!(p0.points.len(), 4);
    }

    #[test]
    fn cache_clear_by_anchor() {
        let cache = BatchCache::new();
        cache.insert(CacheKey::new(model(), "cat", Vec::<String>::new()), layout_of(2));
        cache.insert(CacheKey::new(model(), "cat", ["dog"]), layout_of(3));
        cache.insert(CacheKey::new(model(), "car", Vec::<String>::new()), layout_of(1));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.info().anchors, vec!["car", "cat"]);
        assert_eq!(cache.clear_anchor("cat"), 2);
        assert_eq!(cache.clear_anchor("cat"), 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn get_or_compute_memoizes() {
        let cache = BatchCache::new();
        let key = CacheKey::new(model(), "cat", Vec::<String>::new());
        let mut calls = 0;
        for _ in 0..3 {
            let layout = cache
                .get_or_compute(&key, || {
                    calls += 1;
                    Ok::<_, VizError>(layout_of(4))
                })
                .unwrap();
            assert_eq!(layout.points.len(), 4);
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn racing_fill_is_replaced_whole() {
        let cache = BatchCache::new();
        let key = CacheKey::new(model(), "cat", Vec::<String>::new());
        let layout = cache
            .get_or_compute(&key, || {
                cache.insert(key.clone(), layout_of(3));
                Ok::<_, VizError>(layout_of(4))
            })
            .unwrap();
        assert_eq!(layout.points.len(), 4);
        let stored = cache.get(&key).unwrap();
        assert_eq!(*stored, layout_of(4));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.info().anchors, vec!["cat"]);
    }

    #[test]
    fn failed_compute_is_not_cached() {
        let cache = BatchCache::new();
        let key = CacheKey::new(model(), "cat", Vec::<String>::new());
        let res = cache.get_or_compute(&key, || Err(VizError::ZeroBatchSize));
        assert!(res.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn page_serializes_with_flags() {
        let page = batch(&layout_of(3), "p0", 0, 2).unwrap();
        let v = serde_json::to_value(&page).unwrap();
        assert_eq!(v["points"][0]["word"], "p0");
        assert_eq!(v["points"][0]["is_anchor"], true);
        assert_eq!(v["total_batches"], 2);
        assert_eq!(v["is_complete"], false);
    }

    proptest! {
        #[test]
        fn batches_concatenate_to_layout(n in 0usize..120, size in 1usize..25) {
            let layout = layout_of(n);
            let page = batch(&layout, "p0", 0, size).unwrap();
            let mut all = Vec::new();
            for i in 0..page.total_batches {
                let p = batch(&layout, "p0", i, size).unwrap();
                prop_assert_eq!(p.is_complete, i + 1 == page.total_batches);
                all.extend(p.points);
            }
            prop_assert_eq!(all, layout.points.clone());
            prop_assert!(batch(&layout, "p0", page.total_batches, size).unwrap().is_complete);
        }
    }
}
