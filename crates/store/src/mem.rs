//! The mem cache: byte-bounded FIFO queue of blob bytes.
//!
//! Caches whole blobs against their cells. Entries are appended at the
//! back, evicted from the front, and promoted to the back when re-pushed
//! (FIFO with an LRU touch). Eviction stops as soon as the incoming entry
//! fits, so the budget is best-effort: a warm cache can momentarily sit
//! above the limit by at most one blob.
//!
//! Interior state lives behind a mutex so the read path can install
//! entries while the store holds only its read lock.
//!
//! # Lock ordering
//!
//! The interior lock is acquired first and individual cell locks are taken
//! one at a time underneath it. Callers must not hold any cell lock when
//! calling into the cache.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cell::CellRef;

/// Byte-bounded FIFO cache of cell blobs.
pub struct Mem {
    inner: Mutex<MemInner>,
}

struct MemInner {
    /// Insertion-ordered queue; front is next to evict.
    queue: VecDeque<CellRef>,
    /// Key lookup for hit detection and removal.
    keys: HashMap<Vec<u8>, CellRef>,
    /// Running total of cached `used` bytes.
    size: i64,
}

impl Mem {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self { inner: Mutex::new(MemInner { queue: VecDeque::new(), keys: HashMap::new(), size: 0 }) }
    }

    /// Installs `blob` as the cell's cached bytes and appends the cell to
    /// the queue.
    ///
    /// A cell that is already cached is promoted to the back instead.
    /// Otherwise cells are evicted from the front until the new entry fits
    /// within `max_bytes`; if the queue drains first, the entry is admitted
    /// anyway (best-effort bound).
    pub fn push(&self, cell: &CellRef, blob: &[u8], max_bytes: i64) {
        let mut inner = self.inner.lock();
        let (id, key, used) = {
            let c = cell.read();
            (c.id, c.key.clone(), c.used)
        };
        debug_assert!(!key.is_empty(), "cached cells must be live");

        if inner.keys.contains_key(&key) {
            if let Some(pos) = inner.queue.iter().position(|c| c.read().id == id) {
                if let Some(handle) = inner.queue.remove(pos) {
                    inner.queue.push_back(handle);
                }
            }
            return;
        }

        while !inner.queue.is_empty() && inner.size + used > max_bytes {
            if let Some(front) = inner.queue.pop_front() {
                let mut evicted = front.write();
                inner.size -= evicted.used;
                inner.keys.remove(&evicted.key);
                evicted.cache = None;
            }
        }

        cell.write().cache = Some(blob.to_vec());
        inner.keys.insert(key, Arc::clone(cell));
        inner.queue.push_back(Arc::clone(cell));
        inner.size += used;
    }

    /// Unlinks the cell from the queue and clears its cache slot.
    pub fn remove(&self, cell: &CellRef) {
        let mut inner = self.inner.lock();
        let (id, key) = {
            let c = cell.read();
            (c.id, c.key.clone())
        };
        if inner.keys.remove(&key).is_some() {
            if let Some(pos) = inner.queue.iter().position(|c| c.read().id == id) {
                inner.queue.remove(pos);
            }
            let mut c = cell.write();
            inner.size -= c.used;
            c.cache = None;
        }
    }

    /// Returns the total cached bytes.
    pub fn size(&self) -> i64 {
        self.inner.lock().size
    }

    /// Returns the number of cached cells.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Checks if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Evicts everything, clearing each cell's cache slot.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        while let Some(cell) = inner.queue.pop_front() {
            cell.write().cache = None;
        }
        inner.keys.clear();
        inner.size = 0;
    }
}

impl Default for Mem {
    fn default() -> Self {
        Self::new()
    }
}
