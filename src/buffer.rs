//! Fixed-capacity ring buffer holding the most recent terminal output lines.
//!
//! The interceptor writes into this from the forwarding thread while other
//! threads read context out of it, so the whole structure sits behind one
//! read-write lock.

use parking_lot::RwLock;

struct Inner {
    data: Vec<String>,
    head: usize,
    count: usize,
}

/// Circular log of the last `capacity` lines. Once full, each write
/// overwrites the oldest slot in place.
pub struct RingBuffer {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            capacity,
            inner: RwLock::new(Inner {
                data: vec![String::new(); capacity],
                head: 0,
                count: 0,
            }),
        }
    }

    /// Append a line, overwriting the oldest entry when full.
    pub fn write(&self, line: &str) {
        let mut inner = self.inner.write();
        let head = inner.head;
        inner.data[head] = line.trim_end_matches(['\r', '\n']).to_string();
        inner.head = (head + 1) % self.capacity;
        if inner.count < self.capacity {
            inner.count += 1;
        }
    }

    /// Last `min(n, len)` lines in chronological order.
    pub fn get_lines(&self, n: usize) -> Vec<String> {
        let inner = self.inner.read();
        let n = n.min(inner.count);
        if n == 0 {
            return Vec::new();
        }

        let start = if inner.count < self.capacity {
            0
        } else {
            inner.head
        };

        (0..n)
            .map(|i| {
                let idx = (start + inner.count - n + i) % self.capacity;
                inner.data[idx].clone()
            })
            .collect()
    }

    /// Every line currently held, oldest first.
    pub fn get_all(&self) -> Vec<String> {
        let count = self.inner.read().count;
        self.get_lines(count)
    }

    /// Reset without deallocating the slots.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.head = 0;
        inner.count = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.read().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
