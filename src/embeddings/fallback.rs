//! Deterministic fallback embeddings.
//!
//! When no backend is reachable, a vector is derived from a SHA-256 of the
//! text: the first eight digest bytes seed a `StdRng`, which draws `dimension`
//! values in [-1, 1) before L2 normalization. The same text always maps to the
//! same vector, so similarity stays meaningful for repeated queries.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// Stable 64-bit seed for `text`
pub fn text_seed(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Pseudo-random unit vector keyed by `text`
pub fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(text_seed(text));
    let mut vector: Vec<f32> = (0..dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    l2_normalize(&mut vector);
    vector
}

pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
