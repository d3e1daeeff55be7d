//! In-memory LRU cache for command embeddings.
//!
//! Classic two-structure design: a hash map for O(1) lookup plus a
//! doubly-linked recency list for O(1) promotion and eviction. The list is
//! expressed with arena indices into a slot vector rather than pointers, so
//! eviction can never leave a dangling reference.
//!
//! `get` and `set` both reorder recency, so every operation takes the write
//! side of the lock; only `stats` and `save` read.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::db::{CacheSnapshotEntry, CommandStore};

/// Approximate bytes per cached entry: a typical 768-dimension f32 embedding.
const BYTES_PER_ENTRY: i64 = 3072;

const NIL: usize = usize::MAX;

struct Slot {
    key: String,
    embedding: Vec<u8>,
    last_accessed: DateTime<Utc>,
    prev: usize,
    next: usize,
}

struct Inner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: usize,
    tail: usize,
    hits: u64,
    misses: u64,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub memory_used: i64,
}

pub struct EmbeddingCache {
    max_size: usize,
    inner: RwLock<Inner>,
}

impl EmbeddingCache {
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "cache capacity must be non-zero");
        Self {
            max_size,
            inner: RwLock::new(Inner {
                slots: Vec::new(),
                free: Vec::new(),
                index: HashMap::new(),
                head: NIL,
                tail: NIL,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Look up an embedding by command text, promoting the entry to
    /// most-recently-used on a hit. The embedding is returned by value; the
    /// cache retains exclusive ownership of its entries.
    pub fn get(&self, command: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.write();

        let Some(&idx) = inner.index.get(command) else {
            inner.misses += 1;
            return None;
        };

        inner.unlink(idx);
        inner.push_front(idx);
        let slot = inner.slots[idx].as_mut().expect("indexed slot occupied");
        slot.last_accessed = Utc::now();
        let embedding = slot.embedding.clone();
        inner.hits += 1;
        Some(embedding)
    }

    /// Insert or update an entry, promoting it to most-recently-used and
    /// evicting the least-recently-used entry if capacity is exceeded.
    pub fn set(&self, command: &str, embedding: Vec<u8>) {
        let mut inner = self.inner.write();
        inner.insert_front(command, embedding, Utc::now());

        if inner.index.len() > self.max_size {
            inner.evict_tail();
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        let total = inner.hits + inner.misses;
        let hit_rate = if total > 0 {
            inner.hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            size: inner.index.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            memory_used: inner.index.len() as i64 * BYTES_PER_ENTRY,
        }
    }

    /// Warm-start from the persisted snapshot: up to capacity entries,
    /// highest value first, preserving that order as the recency order.
    pub fn load(&self, store: &CommandStore) -> Result<()> {
        let entries = store.load_cache_snapshot(self.max_size)?;
        let mut inner = self.inner.write();
        for entry in entries {
            inner.insert_back(&entry.command_text, entry.embedding, entry.last_accessed);
        }
        Ok(())
    }

    /// Flush the current contents to the persisted snapshot, most recently
    /// used first. Best-effort: the store skips rows that fail to write.
    pub fn save(&self, store: &CommandStore) -> Result<()> {
        let entries: Vec<CacheSnapshotEntry> = {
            let inner = self.inner.read();
            inner
                .iter_recency()
                .map(|slot| CacheSnapshotEntry {
                    command_text: slot.key.clone(),
                    embedding: slot.embedding.clone(),
                    last_accessed: slot.last_accessed,
                })
                .collect()
        };
        store.save_cache_snapshot(&entries)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.slots.clear();
        inner.free.clear();
        inner.index.clear();
        inner.head = NIL;
        inner.tail = NIL;
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn alloc(&mut self, slot: Slot) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().expect("unlink of occupied slot");
            (slot.prev, slot.next)
        };

        if prev != NIL {
            self.slots[prev].as_mut().unwrap().next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].as_mut().unwrap().prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slots[idx].as_mut().unwrap();
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head != NIL {
            self.slots[old_head].as_mut().unwrap().prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn push_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        {
            let slot = self.slots[idx].as_mut().unwrap();
            slot.prev = old_tail;
            slot.next = NIL;
        }
        if old_tail != NIL {
            self.slots[old_tail].as_mut().unwrap().next = idx;
        }
        self.tail = idx;
        if self.head == NIL {
            self.head = idx;
        }
    }

    fn insert_front(&mut self, key: &str, embedding: Vec<u8>, when: DateTime<Utc>) {
        if let Some(&idx) = self.index.get(key) {
            self.unlink(idx);
            self.push_front(idx);
            let slot = self.slots[idx].as_mut().unwrap();
            slot.embedding = embedding;
            slot.last_accessed = when;
            return;
        }

        let idx = self.alloc(Slot {
            key: key.to_string(),
            embedding,
            last_accessed: when,
            prev: NIL,
            next: NIL,
        });
        self.index.insert(key.to_string(), idx);
        self.push_front(idx);
    }

    fn insert_back(&mut self, key: &str, embedding: Vec<u8>, when: DateTime<Utc>) {
        if self.index.contains_key(key) {
            return;
        }

        let idx = self.alloc(Slot {
            key: key.to_string(),
            embedding,
            last_accessed: when,
            prev: NIL,
            next: NIL,
        });
        self.index.insert(key.to_string(), idx);
        self.push_back(idx);
    }

    fn evict_tail(&mut self) {
        let idx = self.tail;
        if idx == NIL {
            return;
        }
        self.unlink(idx);
        let slot = self.slots[idx].take().expect("tail slot occupied");
        self.index.remove(&slot.key);
        self.free.push(idx);
    }

    fn iter_recency(&self) -> RecencyIter<'_> {
        RecencyIter {
            inner: self,
            cursor: self.head,
        }
    }
}

struct RecencyIter<'a> {
    inner: &'a Inner,
    cursor: usize,
}

impl<'a> Iterator for RecencyIter<'a> {
    type Item = &'a Slot;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let slot = self.inner.slots[self.cursor].as_ref()?;
        self.cursor = slot.next;
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::vector::vector_to_bytes;

    fn emb(v: f32) -> Vec<u8> {
        vector_to_bytes(&[v, v, v])
    }

    #[test]
    fn get_and_set_round_trip() {
        let cache = EmbeddingCache::new(4);
        assert!(cache.get("ls").is_none());

        cache.set("ls", emb(1.0));
        assert_eq!(cache.get("ls"), Some(emb(1.0)));
    }

    #[test]
    fn set_updates_existing_entry() {
        let cache = EmbeddingCache::new(4);
        cache.set("ls", emb(1.0));
        cache.set("ls", emb(2.0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("ls"), Some(emb(2.0)));
    }

    #[test]
    fn evicts_least_recently_used_by_access() {
        let cache = EmbeddingCache::new(3);
        cache.set("a", emb(1.0));
        cache.set("b", emb(2.0));
        cache.set("c", emb(3.0));

        // Touch "a" so "b" becomes the least recently used.
        cache.get("a");
        cache.set("d", emb(4.0));

        assert!(cache.get("b").is_none());
        for key in ["a", "c", "d"] {
            assert!(cache.get(key).is_some(), "{key} should survive");
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn capacity_plus_one_inserts_evict_exactly_one() {
        let cache = EmbeddingCache::new(5);
        for i in 0..6 {
            cache.set(&format!("cmd{i}"), emb(i as f32));
        }
        assert_eq!(cache.len(), 5);
        assert!(cache.get("cmd0").is_none());
        for i in 1..6 {
            assert!(cache.get(&format!("cmd{i}")).is_some());
        }
    }

    #[test]
    fn hit_rate_arithmetic() {
        let cache = EmbeddingCache::new(4);
        assert_eq!(cache.stats().hit_rate, 0.0);

        cache.set("ls", emb(1.0));
        cache.get("ls"); // hit
        cache.get("ls"); // hit
        cache.get("pwd"); // miss

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn memory_estimate_tracks_entry_count() {
        let cache = EmbeddingCache::new(10);
        cache.set("a", emb(1.0));
        cache.set("b", emb(2.0));
        assert_eq!(cache.stats().memory_used, 2 * 3072);
    }

    #[test]
    fn clear_resets_contents_and_counters() {
        let cache = EmbeddingCache::new(4);
        cache.set("ls", emb(1.0));
        cache.get("ls");
        cache.get("missing");

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert!(cache.get("ls").is_none());
    }

    #[test]
    fn snapshot_save_and_load() -> Result<()> {
        let store = CommandStore::open_in_memory()?;

        let cache = EmbeddingCache::new(8);
        cache.set("ls", emb(1.0));
        cache.set("pwd", emb(2.0));
        cache.save(&store)?;

        let warmed = EmbeddingCache::new(8);
        warmed.load(&store)?;
        assert_eq!(warmed.len(), 2);
        assert_eq!(warmed.get("ls"), Some(emb(1.0)));
        assert_eq!(warmed.get("pwd"), Some(emb(2.0)));
        Ok(())
    }

    #[test]
    fn load_respects_capacity() -> Result<()> {
        let store = CommandStore::open_in_memory()?;

        let big = EmbeddingCache::new(8);
        for i in 0..8 {
            big.set(&format!("cmd{i}"), emb(i as f32));
        }
        big.save(&store)?;

        let small = EmbeddingCache::new(3);
        small.load(&store)?;
        assert_eq!(small.len(), 3);
        Ok(())
    }

    #[test]
    fn concurrent_access_keeps_structure_consistent() {
        use std::sync::Arc;

        let cache = Arc::new(EmbeddingCache::new(32));
        let mut handles = Vec::new();
        for t in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("cmd{}", (t * 100 + i) % 40);
                    cache.set(&key, emb(i as f32));
                    cache.get(&key);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 32);
    }
}
