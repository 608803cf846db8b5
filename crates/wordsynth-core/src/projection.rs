//! 3D projection of high-dimensional rows for visualization.
//!
//! The layout algorithm is pluggable through [`Projector`]. Implementations must be
//! deterministic for a given input (fixed seed) and run on the calling thread.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default seed for reproducible layouts.
pub const DEFAULT_SEED: u64 = 42;

/// Maps `n` rows of dimension `D` to `n` points in 3D.
pub trait Projector: Send + Sync {
    fn project(&self, rows: &[&[f32]]) -> Result<Vec<[f32; 3]>, ProjectError>;
}

/// Seeded random linear projection of mean-centered rows.
///
/// Cheap and stable: the same seed and rows always produce the same layout, and
/// nearby rows stay nearby in expectation.
#[derive(Debug, Clone)]
pub struct RandomProjector {
    seed: u64,
}

impl RandomProjector {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// `dim x 3` projection matrix, row-major.
    fn basis(&self, dim: usize) -> Vec<[f32; 3]> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let scale = 1.0 / (dim as f32).sqrt();
        (0..dim)
            .map(|_| {
                [
                    rng.gen_range(-1.0f32..1.0) * scale,
                    rng.gen_range(-1.0f32..1.0) * scale,
                    rng.gen_range(-1.0f32..1.0) * scale,
                ]
            })
            .collect()
    }
}

impl Default for RandomProjector {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl Projector for RandomProjector {
    fn project(&self, rows: &[&[f32]]) -> Result<Vec<[f32; 3]>, ProjectError> {
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let dim = first.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
            return Err(ProjectError::RaggedInput {
                expected: dim,
                actual: bad.len(),
            });
        }

        let mut mean = vec![0.0f32; dim];
        for r in rows {
            for (m, x) in mean.iter_mut().zip(r.iter()) {
                *m += x;
            }
        }
        let n = rows.len() as f32;
        for m in mean.iter_mut() {
            *m /= n;
        }

        let basis = self.basis(dim);
        Ok(rows
            .iter()
            .map(|r| {
                let mut p = [0.0f32; 3];
                for ((x, m), b) in r.iter().zip(&mean).zip(&basis) {
                    let c = x - m;
                    p[0] += c * b[0];
                    p[1] += c * b[1];
                    p[2] += c * b[2];
                }
                p
            })
            .collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("rows have mixed dimensions: expected {expected}, got {actual}")]
    RaggedInput { expected: usize, actual: usize },
    #[error("projection failed: {0}")]
    Failed(String),
}
