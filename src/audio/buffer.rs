//! Jitter buffer for inbound audio payloads
//!
//! A byte-bounded FIFO of payload chunks shared between the network
//! receive path (producer) and the decode consumer. When a chunk does not
//! fit, the oldest chunks are evicted to make room: live audio favors
//! recency over completeness, and the network path never waits on the
//! consumer.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Ring {
    chunks: VecDeque<Bytes>,
    used: usize,
}

/// Bounded byte ring with overwrite-oldest policy
pub struct JitterBuffer {
    ring: Mutex<Ring>,
    /// Signalled on every successful send
    data_ready: Condvar,
    capacity: usize,
    max_evictions: usize,
    received: AtomicUsize,
    evicted_chunks: AtomicUsize,
    evicted_bytes: AtomicUsize,
    rejected: AtomicUsize,
}

impl JitterBuffer {
    /// Create a buffer holding at most `capacity` bytes. A single send
    /// evicts at most `max_evictions` chunks before giving up.
    pub fn new(capacity: usize, max_evictions: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                chunks: VecDeque::new(),
                used: 0,
            }),
            data_ready: Condvar::new(),
            capacity,
            max_evictions,
            received: AtomicUsize::new(0),
            evicted_chunks: AtomicUsize::new(0),
            evicted_bytes: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        }
    }

    /// Enqueue one chunk, evicting the oldest chunks if the ring is full.
    ///
    /// Waits at most `max_wait` for the lock. Returns `false` when the
    /// chunk could not be stored: lock timeout, chunk larger than the
    /// whole ring, or eviction budget exhausted. Empty chunks are accepted
    /// and ignored.
    pub fn send(&self, data: Bytes, max_wait: Duration) -> bool {
        if data.is_empty() {
            return true;
        }
        if data.len() > self.capacity {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let Some(mut ring) = self.ring.try_lock_for(max_wait) else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let mut evictions = 0;
        while ring.used + data.len() > self.capacity {
            if evictions == self.max_evictions {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            let Some(oldest) = ring.chunks.pop_front() else {
                break;
            };
            ring.used -= oldest.len();
            evictions += 1;
            self.evicted_chunks.fetch_add(1, Ordering::Relaxed);
            self.evicted_bytes.fetch_add(oldest.len(), Ordering::Relaxed);
        }

        ring.used += data.len();
        ring.chunks.push_back(data);
        drop(ring);

        self.received.fetch_add(1, Ordering::Relaxed);
        self.data_ready.notify_all();
        true
    }

    /// Dequeue the oldest chunk, waiting up to `max_wait` for one.
    ///
    /// `None` means the wait timed out.
    pub fn receive(&self, max_wait: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + max_wait;
        let mut ring = self.ring.lock();
        while ring.chunks.is_empty() {
            if self.data_ready.wait_until(&mut ring, deadline).timed_out() {
                break;
            }
        }
        let chunk = ring.chunks.pop_front()?;
        ring.used -= chunk.len();
        Some(chunk)
    }

    /// Block until at least `min_bytes` are buffered or `max_wait`
    /// elapses. Returns the fill level seen last.
    pub fn wait_for_level(&self, min_bytes: usize, max_wait: Duration) -> usize {
        let deadline = Instant::now() + max_wait;
        let mut ring = self.ring.lock();
        while ring.used < min_bytes {
            if self.data_ready.wait_until(&mut ring, deadline).timed_out() {
                break;
            }
        }
        ring.used
    }

    /// Bytes currently buffered
    pub fn used_bytes(&self) -> usize {
        self.ring.lock().used
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_bytes(&self) -> usize {
        self.capacity - self.used_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.used_bytes() == 0
    }

    /// Drop everything buffered
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        ring.chunks.clear();
        ring.used = 0;
    }

    /// Get statistics
    pub fn stats(&self) -> JitterBufferStats {
        let ring = self.ring.lock();
        JitterBufferStats {
            used: ring.used,
            chunks: ring.chunks.len(),
            capacity: self.capacity,
            received: self.received.load(Ordering::Relaxed),
            evicted_chunks: self.evicted_chunks.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn contents(&self) -> Vec<u8> {
        let ring = self.ring.lock();
        ring.chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone)]
pub struct JitterBufferStats {
    pub used: usize,
    pub chunks: usize,
    pub capacity: usize,
    pub received: usize,
    pub evicted_chunks: usize,
    pub evicted_bytes: usize,
    pub rejected: usize,
}

impl JitterBufferStats {
    pub fn free(&self) -> usize {
        self.capacity - self.used
    }

    /// Fraction of accepted chunks later overwritten before playback
    pub fn overwrite_rate(&self) -> f32 {
        if self.received == 0 {
            0.0
        } else {
            self.evicted_chunks as f32 / self.received as f32
        }
    }
}

/// Thread-safe handle to a jitter buffer
pub type SharedJitterBuffer = Arc<JitterBuffer>;
