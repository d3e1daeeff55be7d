//! Embedding byte codec and similarity metrics.
//!
//! Embeddings travel as IEEE-754 f32 values serialized little-endian,
//! back-to-back with no header; length is `bytes / 4` elements. The codec
//! must round-trip exactly because the same bytes are compared across the
//! store, the cache and the snapshot table.

use anyhow::{bail, Result};

/// Serialize a vector to its wire/storage form.
pub fn vector_to_bytes(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Deserialize storage bytes back into a vector.
pub fn bytes_to_vector(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 4 != 0 {
        bail!("invalid vector data length: {} bytes", data.len());
    }

    Ok(data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Cosine similarity of two vectors.
///
/// Accumulates in f64 and narrows to f32 to match the embedding's native
/// precision. Returns 0.0 when either vector is empty or has zero magnitude.
/// Vectors of unequal length are compared over their common prefix.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Cosine similarity straight from serialized bytes. Undecodable input
/// scores 0.0, the same as a zero-magnitude vector.
pub fn cosine_similarity_bytes(a: &[u8], b: &[u8]) -> f32 {
    let (Ok(va), Ok(vb)) = (bytes_to_vector(a), bytes_to_vector(b)) else {
        return 0.0;
    };
    cosine_similarity(&va, &vb)
}
