//! Local vocabularies: a bounded set of words around one or more anchors, used to
//! keep projection tractable.

use std::collections::HashSet;

use crate::engine::SimilarityEngine;

/// Below this many words a local vocabulary is considered too thin to plot.
pub const MIN_LOCAL_VOCABULARY: usize = 10;

/// Neighbor count used when a thin local vocabulary is widened.
pub const WIDEN_TOPN: usize = 200;

/// Union of each known anchor's `target / anchors` nearest neighbors, plus the anchors.
///
/// Known anchors come first (input order), then neighbors in retrieval order. The
/// result never exceeds `target` words; unknown anchors are skipped.
pub fn build_local_vocabulary<S: AsRef<str>>(
    engine: &SimilarityEngine,
    anchors: &[S],
    target: usize,
) -> Vec<String> {
    let store = engine.store();
    let mut seen = HashSet::new();
    let known: Vec<&str> = anchors
        .iter()
        .map(AsRef::as_ref)
        .filter(|a| store.contains(a) && seen.insert(a.to_string()))
        .collect();
    if known.is_empty() || target == 0 {
        return Vec::new();
    }

    let mut words: Vec<String> = known.iter().take(target).map(|a| a.to_string()).collect();
    let per_anchor = (target / known.len()).max(1);
    let none = HashSet::new();
    for anchor in &known {
        if words.len() >= target {
            break;
        }
        let Ok(v) = store.vector(anchor) else {
            continue;
        };
        for n in engine.top_k(v, per_anchor, &none) {
            if words.len() >= target {
                break;
            }
            if seen.insert(n.word.clone()) {
                words.push(n.word);
            }
        }
    }
    words
}

/// Local vocabulary for a single anchor, widened when it comes back too thin.
///
/// If fewer than `min_words` words are found, the anchor's raw top-`widen_topn`
/// neighbors are used instead (the anchor itself is kept first).
pub fn local_vocabulary_or_widen(
    engine: &SimilarityEngine,
    anchor: &str,
    target: usize,
    min_words: usize,
    widen_topn: usize,
) -> Vec<String> {
    let words = build_local_vocabulary(engine, &[anchor], target);
    if words.len() >= min_words {
        return words;
    }
    let Ok(v) = engine.store().vector(anchor) else {
        return words;
    };
    tracing::debug!(
        anchor,
        found = words.len(),
        widen_topn,
        "local vocabulary too small, widening"
    );
    let mut widened = vec![anchor.to_string()];
    widened.extend(
        engine
            .top_k(v, widen_topn, &HashSet::new())
            .into_iter()
            .map(|n| n.word)
            .filter(|w| w != anchor),
    );
    widened
}
