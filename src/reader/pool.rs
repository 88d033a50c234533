//! Scratch buffer pooling
//!
//! Each decoded element is first captured as bytes. Reusing those buffers
//! keeps the per-element path free of allocations once the pool is warm.
//!
//! - Buffers are returned by the guard's `Drop`, on every exit path
//! - Pool size is bounded; extra buffers are simply freed
//! - Pooling never changes results

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct PoolCounters {
    acquired: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
}

#[derive(Debug)]
struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    buffer_capacity: usize,
    counters: PoolCounters,
}

/// Shared pool of byte buffers
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub reused: u64,
    pub returned: u64,
    pub pooled: usize,
}

impl BufferPool {
    /// Creates a pool keeping at most `max_pooled` buffers
    pub fn new(max_pooled: usize, buffer_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_pooled)),
                max_pooled,
                buffer_capacity,
                counters: PoolCounters::default(),
            }),
        }
    }

    /// Takes a cleared buffer from the pool, allocating if none is free
    pub fn acquire(&self) -> PooledBuffer {
        self.inner.counters.acquired.fetch_add(1, Ordering::Relaxed);

        let reused = match self.inner.free.lock() {
            Ok(mut free) => free.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };
        let buffer = match reused {
            Some(buffer) => {
                self.inner.counters.reused.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => Vec::with_capacity(self.inner.buffer_capacity),
        };

        PooledBuffer {
            buffer,
            pool: Arc::clone(&self.inner),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let pooled = match self.inner.free.lock() {
            Ok(free) => free.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        PoolStats {
            acquired: self.inner.counters.acquired.load(Ordering::Relaxed),
            reused: self.inner.counters.reused.load(Ordering::Relaxed),
            returned: self.inner.counters.returned.load(Ordering::Relaxed),
            pooled,
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16, 4096)
    }
}

/// A buffer on loan from a [`BufferPool`]
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.counters.returned.fetch_add(1, Ordering::Relaxed);

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();

        let mut free = match self.pool.free.lock() {
            Ok(free) => free,
            Err(poisoned) => poisoned.into_inner(),
        };
        if free.len() < self.pool.max_pooled {
            free.push(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_returned_on_drop() {
        let pool = BufferPool::new(2, 64);
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"{\"a\":1}");
        }
        let stats = pool.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.returned, 1);
        assert_eq!(stats.pooled, 1);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(1, 8);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.stats().pooled, 1);
        assert_eq!(pool.stats().returned, 2);
    }

    #[test]
    fn test_returned_on_error_path() {
        fn fails(pool: &BufferPool) -> Result<(), &'static str> {
            let _buf = pool.acquire();
            Err("decode failed")
        }

        let pool = BufferPool::default();
        assert!(fails(&pool).is_err());
        assert_eq!(pool.stats().returned, 1);
    }
}
