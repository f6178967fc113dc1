//! Rotating Douban credential pool.
//!
//! The cursor marks where the next resolution starts its walk through the
//! pool. It only moves after a key has actually worked, so a run of failures
//! never skips keys that were not tried.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered set of API keys plus a rotation cursor.
#[derive(Debug, Default)]
pub struct ApiKeyPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl ApiKeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self::with_cursor(keys, 0)
    }

    /// Pool whose first rotation starts at `start` (wrapped to the pool size).
    pub fn with_cursor(keys: Vec<String>, start: usize) -> Self {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        let start = if keys.is_empty() { 0 } else { start % keys.len() };
        Self {
            keys,
            cursor: AtomicUsize::new(start),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Every key once, as `(pool_index, key)`, starting at the cursor and wrapping.
    pub fn rotation(&self) -> Vec<(usize, &str)> {
        let n = self.keys.len();
        let start = self.cursor();
        (0..n)
            .map(|i| {
                let idx = (start + i) % n;
                (idx, self.keys[idx].as_str())
            })
            .collect()
    }

    /// Record that the key at `index` succeeded: the next rotation starts after it.
    pub fn mark_success(&self, index: usize) {
        if self.keys.is_empty() {
            return;
        }
        let next = (index + 1) % self.keys.len();
        let prev = self.cursor.swap(next, Ordering::SeqCst);
        tracing::debug!(from = prev, to = next, "douban: advanced key cursor");
    }
}
