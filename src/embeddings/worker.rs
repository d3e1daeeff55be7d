//! Asynchronous embedding worker pool.
//!
//! Commands are saved immediately with a `pending` embedding status and their
//! ids pushed onto a bounded queue; a small pool of threads drains the queue,
//! generates embeddings and advances each row's lifecycle. A refill thread
//! periodically re-scans the store for pending rows so ids dropped by a full
//! queue (or left behind by a crash) are eventually picked up.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::cache::EmbeddingCache;
use super::Embedder;
use crate::db::{CommandStore, EmbeddingStatus};
use crate::shutdown::{Shutdown, ShutdownHandle};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Embedding attempts per command before it is marked `failed`.
    pub max_retries: u32,
    /// Base backoff between attempts; doubles per attempt.
    pub retry_delay: Duration,
    pub refill_interval: Duration,
    pub refill_batch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1000,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            refill_interval: Duration::from_secs(10),
            refill_batch: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    pub queue_depth: usize,
    pub processed: u64,
    pub failed: u64,
    pub workers: usize,
}

#[derive(Default)]
struct Counters {
    processed: u64,
    failed: u64,
}

struct WorkerShared {
    store: Arc<CommandStore>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
    config: WorkerConfig,
    counters: Mutex<Counters>,
}

impl WorkerShared {
    /// Embed one command, retrying transient failures with exponential
    /// backoff. Returns early (row left in `processing`) when shutdown fires
    /// mid-backoff; the refill scan will not resurrect it, which matches
    /// treating an interrupted item as abandoned.
    fn process(&self, id: i64, shutdown: &Shutdown) {
        if let Err(e) = self
            .store
            .update_embedding_status(id, EmbeddingStatus::Processing, None)
        {
            warn!(id, error = %e, "failed to mark command as processing");
            return;
        }

        let text = match self.store.get_command_text(id) {
            Ok(Some(text)) => text,
            Ok(None) => {
                debug!(id, "command disappeared before embedding");
                return;
            }
            Err(e) => {
                warn!(id, error = %e, "failed to load command text");
                self.mark_failed(id);
                return;
            }
        };

        let mut last_err = anyhow!("no attempts made");
        for attempt in 0..self.config.max_retries {
            match self.embedder.generate_embedding(&text) {
                Ok(bytes) => {
                    if let Err(e) = self.store.update_embedding_status(
                        id,
                        EmbeddingStatus::Completed,
                        Some(&bytes),
                    ) {
                        warn!(id, error = %e, "failed to store embedding");
                        self.mark_failed(id);
                        return;
                    }
                    self.cache.set(&text, bytes);
                    self.counters.lock().processed += 1;
                    return;
                }
                Err(e) => last_err = e,
            }

            if attempt + 1 < self.config.max_retries {
                let backoff = self.config.retry_delay * 2u32.pow(attempt);
                if shutdown.wait_timeout(backoff) {
                    return;
                }
            }
        }

        warn!(
            id,
            attempts = self.config.max_retries,
            error = %last_err,
            "embedding failed, marking command as failed"
        );
        self.mark_failed(id);
    }

    fn mark_failed(&self, id: i64) {
        if let Err(e) = self
            .store
            .update_embedding_status(id, EmbeddingStatus::Failed, None)
        {
            warn!(id, error = %e, "failed to mark command as failed");
        }
        self.counters.lock().failed += 1;
    }

    /// Re-enqueue pending rows the direct path missed. Best effort: a full
    /// queue just means the next tick tries again.
    fn refill(&self, tx: &Sender<i64>) {
        let pending = match self.store.get_pending_embeddings(self.config.refill_batch) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "pending-embedding scan failed");
                return;
            }
        };

        for record in pending {
            if tx.try_send(record.id).is_err() {
                break;
            }
        }
    }
}

pub struct EmbeddingWorker {
    shared: Arc<WorkerShared>,
    tx: Sender<i64>,
    rx: Receiver<i64>,
    shutdown_handle: Option<ShutdownHandle>,
    handles: Vec<JoinHandle<()>>,
}

impl EmbeddingWorker {
    pub fn new(
        store: Arc<CommandStore>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<EmbeddingCache>,
        config: WorkerConfig,
    ) -> Self {
        let (tx, rx) = bounded(config.queue_capacity);
        Self {
            shared: Arc::new(WorkerShared {
                store,
                embedder,
                cache,
                config,
                counters: Mutex::new(Counters::default()),
            }),
            tx,
            rx,
            shutdown_handle: None,
            handles: Vec::new(),
        }
    }

    /// Spawn the worker and refill threads. Idempotent only in the sense
    /// that calling it twice would double the pool, so don't.
    pub fn start(&mut self) {
        let (handle, shutdown) = Shutdown::new();

        for n in 0..self.shared.config.workers {
            let shared = self.shared.clone();
            let rx = self.rx.clone();
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name(format!("embed-worker-{n}"))
                .spawn(move || worker_loop(&shared, &rx, &shutdown));
            match handle {
                Ok(h) => self.handles.push(h),
                Err(e) => warn!(error = %e, "failed to spawn embedding worker"),
            }
        }

        {
            let shared = self.shared.clone();
            let tx = self.tx.clone();
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name("embed-refill".into())
                .spawn(move || refill_loop(&shared, &tx, &shutdown));
            match handle {
                Ok(h) => self.handles.push(h),
                Err(e) => warn!(error = %e, "failed to spawn refill thread"),
            }
        }

        self.shutdown_handle = Some(handle);
        debug!(workers = self.shared.config.workers, "embedding worker pool started");
    }

    /// Queue a command id for embedding. Never blocks: when the queue is
    /// full the id is dropped and the refill scan picks the row up later.
    pub fn enqueue(&self, id: i64) {
        match self.tx.try_send(id) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(id, "embedding queue full, deferring to refill scan");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Reset every `failed` row to `pending` and re-enqueue it. Errors if
    /// the queue fills before all rows fit, reporting how many were queued.
    pub fn retry_failed(&self) -> Result<usize> {
        let ids = self.shared.store.get_failed_ids()?;
        let mut queued = 0;

        for id in ids {
            self.shared
                .store
                .update_embedding_status(id, EmbeddingStatus::Pending, None)?;
            match self.tx.try_send(id) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    bail!("embedding queue filled after re-queueing {queued} commands")
                }
                Err(TrySendError::Disconnected(_)) => bail!("embedding queue is closed"),
            }
        }

        Ok(queued)
    }

    pub fn stats(&self) -> WorkerStats {
        let counters = self.shared.counters.lock();
        WorkerStats {
            queue_depth: self.rx.len(),
            processed: counters.processed,
            failed: counters.failed,
            workers: self.shared.config.workers,
        }
    }

    /// Cancel the pool and wait for every thread to exit. In-flight backoff
    /// waits are interrupted; queued-but-unstarted ids stay `pending` for
    /// the next run's refill scan.
    pub fn stop(mut self) {
        drop(self.shutdown_handle.take());
        drop(self.tx);

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        debug!("embedding worker pool stopped");
    }
}

fn worker_loop(shared: &WorkerShared, rx: &Receiver<i64>, shutdown: &Shutdown) {
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(id) => shared.process(id, shutdown),
                Err(_) => break,
            },
            recv(shutdown.receiver()) -> _ => break,
        }
    }
}

fn refill_loop(shared: &WorkerShared, tx: &Sender<i64>, shutdown: &Shutdown) {
    let ticker = tick(shared.config.refill_interval);
    loop {
        select! {
            recv(ticker) -> _ => shared.refill(tx),
            recv(shutdown.receiver()) -> _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CommandRecord;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct MockEmbedder {
        calls: AtomicU32,
        /// Calls that fail before succeeding; u32::MAX fails forever.
        failures: u32,
    }

    impl MockEmbedder {
        fn succeeding() -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures: 0,
            }
        }

        fn always_failing() -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures: u32::MAX,
            }
        }
    }

    impl Embedder for MockEmbedder {
        fn generate_embedding(&self, _text: &str) -> Result<Vec<u8>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                bail!("synthetic embedding failure");
            }
            Ok(super::super::vector::vector_to_bytes(&[1.0, 0.0, 0.0]))
        }
    }

    // Long refill interval so exact call-count assertions cannot race a
    // refill re-enqueue of a not-yet-dequeued row.
    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            workers: 1,
            queue_capacity: 16,
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
            refill_interval: Duration::from_secs(60),
            refill_batch: 100,
        }
    }

    fn save_pending(store: &CommandStore, command: &str) -> i64 {
        let record = CommandRecord::new(command);
        store.save_command_async(&record).unwrap()
    }

    fn wait_for_status(store: &CommandStore, id: i64, want: EmbeddingStatus) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if store.get_embedding_status(id).unwrap() == Some(want) {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {want} on command {id}"
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn build_worker(
        store: &Arc<CommandStore>,
        embedder: Arc<MockEmbedder>,
        cache: &Arc<EmbeddingCache>,
    ) -> EmbeddingWorker {
        let mut worker = EmbeddingWorker::new(
            store.clone(),
            embedder,
            cache.clone(),
            fast_config(),
        );
        worker.start();
        worker
    }

    #[test]
    fn successful_embedding_completes_row_and_warms_cache() {
        let store = Arc::new(CommandStore::open_in_memory().unwrap());
        let cache = Arc::new(EmbeddingCache::new(100));
        let embedder = Arc::new(MockEmbedder::succeeding());
        let worker = build_worker(&store, embedder.clone(), &cache);

        let id = save_pending(&store, "git status");
        worker.enqueue(id);
        wait_for_status(&store, id, EmbeddingStatus::Completed);

        // The processed counter lands just after the status update.
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.stats().processed < 1 {
            assert!(Instant::now() < deadline, "processed counter never advanced");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(worker.stats().failed, 0);
        assert_eq!(worker.stats().workers, 1);
        worker.stop();

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("git status").is_some());
        assert_eq!(store.stats().unwrap().embedded_commands, 1);
    }

    #[test]
    fn failing_embedder_marks_failed_after_exact_retry_budget() {
        let store = Arc::new(CommandStore::open_in_memory().unwrap());
        let cache = Arc::new(EmbeddingCache::new(100));
        let embedder = Arc::new(MockEmbedder::always_failing());
        let worker = build_worker(&store, embedder.clone(), &cache);

        let id = save_pending(&store, "cargo doc");
        worker.enqueue(id);
        wait_for_status(&store, id, EmbeddingStatus::Failed);
        worker.stop();

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(worker_failed_count(&store), 1);
    }

    fn worker_failed_count(store: &CommandStore) -> usize {
        store.get_failed_ids().unwrap().len()
    }

    #[test]
    fn transient_failure_recovers_within_budget() {
        let store = Arc::new(CommandStore::open_in_memory().unwrap());
        let cache = Arc::new(EmbeddingCache::new(100));
        let embedder = Arc::new(MockEmbedder {
            calls: AtomicU32::new(0),
            failures: 2,
        });
        let worker = build_worker(&store, embedder.clone(), &cache);

        let id = save_pending(&store, "ls -la");
        worker.enqueue(id);
        wait_for_status(&store, id, EmbeddingStatus::Completed);
        worker.stop();

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn refill_scan_picks_up_rows_never_enqueued() {
        let store = Arc::new(CommandStore::open_in_memory().unwrap());
        let cache = Arc::new(EmbeddingCache::new(100));
        let embedder = Arc::new(MockEmbedder::succeeding());

        // Saved before the worker exists, so nothing enqueues it directly.
        let id = save_pending(&store, "docker ps");

        let mut config = fast_config();
        config.refill_interval = Duration::from_millis(20);
        let mut worker = EmbeddingWorker::new(store.clone(), embedder, cache, config);
        worker.start();
        wait_for_status(&store, id, EmbeddingStatus::Completed);
        worker.stop();
    }

    #[test]
    fn retry_failed_resets_and_requeues() {
        let store = Arc::new(CommandStore::open_in_memory().unwrap());
        let cache = Arc::new(EmbeddingCache::new(100));
        let embedder = Arc::new(MockEmbedder::always_failing());
        let worker = build_worker(&store, embedder, &cache);

        let id = save_pending(&store, "make test");
        worker.enqueue(id);
        wait_for_status(&store, id, EmbeddingStatus::Failed);
        worker.stop();

        // Fresh pool whose embedder now works.
        let embedder = Arc::new(MockEmbedder::succeeding());
        let worker = build_worker(&store, embedder, &cache);
        let queued = worker.retry_failed().unwrap();
        assert_eq!(queued, 1);

        wait_for_status(&store, id, EmbeddingStatus::Completed);
        worker.stop();
    }

    #[test]
    fn stop_joins_all_threads() {
        let store = Arc::new(CommandStore::open_in_memory().unwrap());
        let cache = Arc::new(EmbeddingCache::new(100));
        let embedder = Arc::new(MockEmbedder::succeeding());
        let worker = build_worker(&store, embedder, &cache);

        let started = Instant::now();
        worker.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
