//! Application context: explicit ownership of every long-lived component.
//!
//! One [`App`] owns the config, store, cache, breaker and worker pool, so
//! lifecycle (warm start, capture, shutdown flush) is a method call rather
//! than ambient global state.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::config::Config;
use crate::db::{CommandRecord, CommandStore, SaveOutcome, ScoredCommand};
use crate::embeddings::{
    Embedder, EmbeddingCache, EmbeddingWorker, GeminiEmbedder, ResilientEmbedder,
};
use crate::paths;
use crate::resilience::{unless_circuit_open, CircuitBreaker, RetryPolicy};
use crate::shutdown::Shutdown;

pub struct App {
    pub config: Config,
    pub store: Arc<CommandStore>,
    pub cache: Arc<EmbeddingCache>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    embedder: Option<Arc<dyn Embedder>>,
    worker: Option<EmbeddingWorker>,
}

impl App {
    /// Open the default on-disk store and bring the full pipeline up.
    pub fn init(config: Config) -> Result<Self> {
        let home = paths::remora_home();
        std::fs::create_dir_all(&home)
            .with_context(|| format!("failed to create {}", home.display()))?;
        let store = Arc::new(CommandStore::open(paths::history_db_path())?);
        Self::with_store(config, store)
    }

    /// Bring the pipeline up over an existing store. Used by `init` and by
    /// tests that want an in-memory database.
    pub fn with_store(config: Config, store: Arc<CommandStore>) -> Result<Self> {
        let cache = Arc::new(EmbeddingCache::new(config.cache.max_entries));
        if config.cache.persist {
            match cache.load(&store) {
                Ok(()) => debug!(entries = cache.len(), "warm-loaded embedding cache"),
                Err(e) => warn!(error = %e, "cache warm load failed, starting cold"),
            }
        }

        let breaker = Arc::new(CircuitBreaker::new(config.breaker_config()));
        let embedder = build_embedder(&config, &breaker)?;

        let worker = match &embedder {
            Some(embedder) => {
                let mut worker = EmbeddingWorker::new(
                    store.clone(),
                    embedder.clone(),
                    cache.clone(),
                    config.worker_config(),
                );
                worker.start();
                Some(worker)
            }
            None => {
                debug!("no embedding provider configured, worker pool disabled");
                None
            }
        };

        let retry = config.retry_policy();
        Ok(Self {
            config,
            store,
            cache,
            breaker,
            retry,
            embedder,
            worker,
        })
    }

    /// Save a finished command, deduplicated by content hash; new rows are
    /// queued for embedding.
    pub fn capture(&self, record: &CommandRecord) -> Result<SaveOutcome> {
        let outcome = self.store.save_command_deduplicated(record)?;
        if outcome.is_new() {
            if let Some(worker) = &self.worker {
                worker.enqueue(outcome.id());
            }
        }
        Ok(outcome)
    }

    /// Embedding bytes for a query, served from the cache when possible.
    ///
    /// Cache misses go to the provider under the configured retry policy;
    /// the embedder is already breaker-wrapped, so an open circuit fails
    /// fast instead of burning the retry budget.
    pub fn query_embedding(&self, text: &str) -> Result<Vec<u8>> {
        if let Some(bytes) = self.cache.get(text) {
            return Ok(bytes);
        }
        let Some(embedder) = &self.embedder else {
            bail!("no embedding provider configured; set the API key to enable semantic search");
        };
        let bytes = self.retry.run(&Shutdown::never(), unless_circuit_open, || {
            embedder.generate_embedding(text)
        })?;
        self.cache.set(text, bytes.clone());
        Ok(bytes)
    }

    /// Two-phase semantic search using the configured limit and threshold.
    pub fn semantic_search(&self, query: &str) -> Result<Vec<ScoredCommand>> {
        let embedding = self.query_embedding(query)?;
        self.store.search_semantic(
            query,
            &embedding,
            self.config.search.limit,
            self.config.search.threshold,
        )
    }

    pub fn retry_failed(&self) -> Result<usize> {
        match &self.worker {
            Some(worker) => worker.retry_failed(),
            None => bail!("embedding worker is not running"),
        }
    }

    pub fn worker(&self) -> Option<&EmbeddingWorker> {
        self.worker.as_ref()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Stop the worker pool and flush the cache snapshot. Snapshot failures
    /// are logged, not fatal: the cache is rebuildable state.
    pub fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        if self.config.cache.persist {
            if let Err(e) = self.cache.save(&self.store) {
                warn!(error = %e, "failed to persist embedding cache snapshot");
            }
        }
    }
}

fn build_embedder(
    config: &Config,
    breaker: &Arc<CircuitBreaker>,
) -> Result<Option<Arc<dyn Embedder>>> {
    if config.embedding.provider != "gemini" {
        bail!("unknown embedding provider: {}", config.embedding.provider);
    }
    let Ok(api_key) = std::env::var(&config.embedding.api_key_env) else {
        return Ok(None);
    };
    if api_key.is_empty() {
        return Ok(None);
    }

    let gemini = GeminiEmbedder::with_model(api_key, config.embedding.model.clone())?;
    Ok(Some(Arc::new(ResilientEmbedder::new(
        Arc::new(gemini),
        breaker.clone(),
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::EmbeddingStatus;
    use crate::embeddings::vector::vector_to_bytes;
    use std::time::{Duration, Instant};

    struct FixedEmbedder(Vec<f32>);

    impl Embedder for FixedEmbedder {
        fn generate_embedding(&self, _text: &str) -> Result<Vec<u8>> {
            Ok(vector_to_bytes(&self.0))
        }
    }

    fn test_app(embedder: Option<Arc<dyn Embedder>>) -> App {
        let config = Config::default();
        let store = Arc::new(CommandStore::open_in_memory().unwrap());
        let cache = Arc::new(EmbeddingCache::new(config.cache.max_entries));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker_config()));

        let worker = embedder.as_ref().map(|embedder| {
            let mut cfg = config.worker_config();
            cfg.retry_delay = Duration::from_millis(1);
            cfg.refill_interval = Duration::from_millis(20);
            let mut worker =
                EmbeddingWorker::new(store.clone(), embedder.clone(), cache.clone(), cfg);
            worker.start();
            worker
        });

        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..config.retry_policy()
        };
        App {
            config,
            store,
            cache,
            breaker,
            retry,
            embedder,
            worker,
        }
    }

    #[test]
    fn capture_deduplicates_and_embeds_new_commands() {
        let app = test_app(Some(Arc::new(FixedEmbedder(vec![1.0, 0.0]))));

        let first = app.capture(&CommandRecord::new("git log")).unwrap();
        assert!(first.is_new());
        let second = app.capture(&CommandRecord::new("git log")).unwrap();
        assert!(!second.is_new());
        assert_eq!(first.id(), second.id());

        let deadline = Instant::now() + Duration::from_secs(5);
        while app.store.get_embedding_status(first.id()).unwrap()
            != Some(EmbeddingStatus::Completed)
        {
            assert!(Instant::now() < deadline, "embedding never completed");
            std::thread::sleep(Duration::from_millis(5));
        }
        app.shutdown();
    }

    #[test]
    fn query_embedding_hits_cache_on_second_call() {
        let app = test_app(Some(Arc::new(FixedEmbedder(vec![0.5, 0.5]))));

        let first = app.query_embedding("docker ps").unwrap();
        let second = app.query_embedding("docker ps").unwrap();
        assert_eq!(first, second);
        assert_eq!(app.cache.stats().hits, 1);
        app.shutdown();
    }

    #[test]
    fn query_embedding_retries_transient_provider_failures() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct FlakyEmbedder {
            calls: AtomicU32,
        }

        impl Embedder for FlakyEmbedder {
            fn generate_embedding(&self, _text: &str) -> Result<Vec<u8>> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("transient provider failure");
                }
                Ok(vector_to_bytes(&[0.25, 0.75]))
            }
        }

        let flaky = Arc::new(FlakyEmbedder {
            calls: AtomicU32::new(0),
        });
        let mut app = test_app(None);
        app.embedder = Some(flaky.clone());

        let bytes = app.query_embedding("terraform plan").unwrap();
        assert_eq!(bytes, vector_to_bytes(&[0.25, 0.75]));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        app.shutdown();
    }

    #[test]
    fn semantic_search_without_provider_errors() {
        let app = test_app(None);
        app.capture(&CommandRecord::new("ls")).unwrap();
        assert!(app.semantic_search("list files").is_err());
        app.shutdown();
    }

    #[test]
    fn shutdown_persists_cache_snapshot() {
        let app = test_app(Some(Arc::new(FixedEmbedder(vec![1.0]))));

        app.cache.set("kubectl get pods", vector_to_bytes(&[1.0, 2.0]));
        let app_store = app.store.clone();
        app.shutdown();

        let snapshot = app_store.load_cache_snapshot(10).unwrap();
        assert!(snapshot
            .iter()
            .any(|entry| entry.command_text == "kubectl get pods"));
    }
}
