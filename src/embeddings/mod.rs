//! Embedding generation, caching and the asynchronous worker pool.
//!
//! The embedding capability itself sits behind [`Embedder`]; the rest of the
//! crate treats it as opaque bytes-out and routes every call through the
//! resilience layer.

pub mod cache;
mod gemini;
pub mod vector;
mod worker;

pub use cache::{CacheStats, EmbeddingCache};
pub use gemini::{is_retryable_status, GeminiEmbedder};
pub use worker::{EmbeddingWorker, WorkerConfig, WorkerStats};

use std::sync::Arc;

use anyhow::Result;

use crate::resilience::CircuitBreaker;

/// A source of embeddings for command text.
///
/// Implementations return the serialized form directly (little-endian f32,
/// see [`vector`]) so the store and cache never re-encode.
pub trait Embedder: Send + Sync {
    fn generate_embedding(&self, text: &str) -> Result<Vec<u8>>;
}

/// Decorator routing an embedder's calls through a shared circuit breaker.
///
/// The worker pool supplies the bounded retry loop around each item, so the
/// composed behavior per call is retry(breaker(generate)).
pub struct ResilientEmbedder {
    inner: Arc<dyn Embedder>,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

impl Embedder for ResilientEmbedder {
    fn generate_embedding(&self, text: &str) -> Result<Vec<u8>> {
        self.breaker.execute(|| self.inner.generate_embedding(text))
    }
}
