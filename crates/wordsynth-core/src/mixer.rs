//! Weighted vector arithmetic over stored words.
//!
//! Results are unit-normalized. `None` means there was nothing to search for:
//! no usable input, or inputs that cancelled out to a zero-length vector.

use crate::store::EmbeddingStore;
use crate::vector::{add_scaled, normalize_in_place, NORM_EPSILON, WEIGHT_EPSILON};

/// `normalize(Σ weight_i * vector(word_i))` over the usable pairs.
///
/// Pairs whose word is unknown or whose `|weight| <= WEIGHT_EPSILON` are skipped.
/// Accumulation follows input order, so identical input gives bit-identical output.
pub fn mix<S: AsRef<str>>(store: &EmbeddingStore, pairs: &[(S, f32)]) -> Option<Vec<f32>> {
    let mut acc = vec![0.0f32; store.dimension()];
    let mut used = 0usize;
    for (word, weight) in pairs {
        if weight.abs() <= WEIGHT_EPSILON || !weight.is_finite() {
            continue;
        }
        let Ok(v) = store.vector(word.as_ref()) else {
            continue;
        };
        add_scaled(&mut acc, v, *weight);
        used += 1;
    }
    if used == 0 {
        return None;
    }
    finish(acc)
}

/// Average of `vector(a) - vector(b)` over pairs where both words are known, normalized.
pub fn direction_from_pairs<S: AsRef<str>>(
    store: &EmbeddingStore,
    pairs: &[(S, S)],
) -> Option<Vec<f32>> {
    let mut acc = vec![0.0f32; store.dimension()];
    let mut used = 0usize;
    for (a, b) in pairs {
        let (Ok(va), Ok(vb)) = (store.vector(a.as_ref()), store.vector(b.as_ref())) else {
            continue;
        };
        add_scaled(&mut acc, va, 1.0);
        add_scaled(&mut acc, vb, -1.0);
        used += 1;
    }
    if used == 0 {
        return None;
    }
    let n = used as f32;
    for x in acc.iter_mut() {
        *x /= n;
    }
    finish(acc)
}

fn finish(mut acc: Vec<f32>) -> Option<Vec<f32>> {
    if normalize_in_place(&mut acc) < NORM_EPSILON {
        return None;
    }
    Some(acc)
}
