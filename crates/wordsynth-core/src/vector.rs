//! Small dense-vector helpers shared by the store, the search backends and the mixer.
//!
//! All similarity math goes through [`dot`] so every backend sums in the same order
//! and produces bit-identical scores for the same rows.

/// Norms below this are treated as zero-length: such vectors have no direction.
pub const NORM_EPSILON: f32 = 1e-8;

/// Weights with magnitude at or below this are ignored by the mixer.
pub const WEIGHT_EPSILON: f32 = 1e-8;

/// Inner product. Callers guarantee equal lengths; extra trailing values are ignored.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector length mismatch");
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Unit-length copy of `v`. Degenerate vectors (norm below [`NORM_EPSILON`]) are
/// returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize_in_place(&mut out);
    out
}

/// Normalizes `v` in place. Returns the original norm.
pub fn normalize_in_place(v: &mut [f32]) -> f32 {
    let n = norm(v);
    if n < NORM_EPSILON {
        return n;
    }
    for x in v.iter_mut() {
        *x /= n;
    }
    n
}

/// `acc += weight * v`, element by element in index order.
#[inline]
pub fn add_scaled(acc: &mut [f32], v: &[f32], weight: f32) {
    for (a, x) in acc.iter_mut().zip(v) {
        *a += weight * x;
    }
}
