//! Id pool for allocating fids and tags.
//!
//! A bitmap tracks which ids are in use; a bounded free-list cache absorbs
//! the common alloc-then-free-soon-after churn so most calls don't have to
//! scan the bitmap. One reserved sentinel value (`NOFID`/`NOTAG`) is never
//! handed out.

use tokio::sync::Mutex;

const CACHE_CAPACITY: usize = 64;

struct Inner {
    bitmap: Vec<u64>,
    next_scan: usize,
    sentinel: u32,
}

impl Inner {
    fn alloc(&mut self) -> Option<u32> {
        let words = self.bitmap.len();
        for i in 0..words {
            let idx = (self.next_scan + i) % words;
            let word = self.bitmap[idx];
            if word != u64::MAX {
                let bit = (!word).trailing_zeros();
                let id = (idx as u32) * 64 + bit;
                if id == self.sentinel {
                    // skip the reserved sentinel value by marking it
                    // permanently used and retrying the same word
                    self.bitmap[idx] |= 1 << bit;
                    continue;
                }
                self.bitmap[idx] |= 1 << bit;
                self.next_scan = idx;
                return Some(id);
            }
        }
        None
    }

    fn grow_and_alloc(&mut self) -> u32 {
        let idx = self.bitmap.len();
        self.bitmap.push(0);
        let id = (idx as u32) * 64;
        if id == self.sentinel {
            self.bitmap[idx] |= 1;
            self.grow_and_alloc()
        } else {
            self.bitmap[idx] |= 1;
            id
        }
    }

    fn free(&mut self, id: u32) {
        let idx = (id / 64) as usize;
        let bit = id % 64;
        if idx < self.bitmap.len() {
            self.bitmap[idx] &= !(1 << bit);
        }
    }
}

/// Allocates and reclaims 32-bit ids (fids or tags), excluding one reserved
/// sentinel value.
pub struct IdPool {
    inner: Mutex<Inner>,
    cache: Mutex<Vec<u32>>,
}

impl IdPool {
    /// Build a pool that never hands out `sentinel` (`NOFID` or `NOTAG`).
    pub fn new(sentinel: u32) -> IdPool {
        IdPool {
            inner: Mutex::new(Inner {
                bitmap: Vec::new(),
                next_scan: 0,
                sentinel,
            }),
            cache: Mutex::new(Vec::with_capacity(CACHE_CAPACITY)),
        }
    }

    /// Allocate the next free id.
    pub async fn get_id(&self) -> u32 {
        if let Some(id) = self.cache.lock().await.pop() {
            return id;
        }

        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.alloc() {
            return id;
        }
        inner.grow_and_alloc()
    }

    /// Return an id to the pool, making it available for reuse.
    pub async fn put_id(&self, id: u32) {
        let mut cache = self.cache.lock().await;
        if cache.len() < CACHE_CAPACITY {
            cache.push(id);
            return;
        }
        drop(cache);
        self.inner.lock().await.free(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_distinct_ids() {
        let pool = IdPool::new(u32::MAX);
        let a = pool.get_id().await;
        let b = pool.get_id().await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn never_hands_out_sentinel() {
        let pool = IdPool::new(0);
        for _ in 0..200 {
            assert_ne!(pool.get_id().await, 0);
        }
    }

    #[tokio::test]
    async fn reuses_freed_ids() {
        let pool = IdPool::new(u32::MAX);
        let id = pool.get_id().await;
        pool.put_id(id).await;
        let again = pool.get_id().await;
        assert_eq!(id, again);
    }
}
