//! Fixed pool of output buffers
//!
//! Buffers cycle between an `empty` and a `ready` queue. Ownership moves
//! with the buffer itself: a caller holds a buffer only through a guard,
//! so a buffer can never sit in both queues or be submitted twice.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One fixed-capacity output buffer
#[derive(Debug)]
pub struct AudioBuffer {
    index: usize,
    data: Box<[u8]>,
    len: usize,
}

impl AudioBuffer {
    fn new(index: usize, size: usize) -> Self {
        Self {
            index,
            data: vec![0u8; size].into_boxed_slice(),
            len: 0,
        }
    }

    /// Slot number in the pool
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes actually used
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append as many bytes as fit; returns how many were taken.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.data[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        n
    }

    /// Append whole little-endian samples; returns how many were taken.
    pub fn extend_from_samples(&mut self, samples: &[i16]) -> usize {
        let n = samples.len().min(self.remaining() / 2);
        for (slot, sample) in self.data[self.len..self.len + n * 2]
            .chunks_exact_mut(2)
            .zip(&samples[..n])
        {
            slot.copy_from_slice(&sample.to_le_bytes());
        }
        self.len += n * 2;
        n
    }
}

/// Pool of `N` buffers shared by the decode consumer and the sink writer
pub struct BufferPool {
    empty_tx: Sender<AudioBuffer>,
    empty_rx: Receiver<AudioBuffer>,
    ready_tx: Sender<AudioBuffer>,
    ready_rx: Receiver<AudioBuffer>,
    count: usize,
    buffer_size: usize,
    /// Buffers currently out on a guard
    held: AtomicUsize,
    acquire_timeouts: AtomicUsize,
    submitted: AtomicUsize,
    drained: AtomicUsize,
}

impl BufferPool {
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let (empty_tx, empty_rx) = bounded(count);
        let (ready_tx, ready_rx) = bounded(count);
        for index in 0..count {
            // Capacity is exactly `count`, cannot fail
            let _ = empty_tx.try_send(AudioBuffer::new(index, buffer_size));
        }
        Self {
            empty_tx,
            empty_rx,
            ready_tx,
            ready_rx,
            count,
            buffer_size,
            held: AtomicUsize::new(0),
            acquire_timeouts: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
            drained: AtomicUsize::new(0),
        }
    }

    /// Take an empty buffer, waiting up to `max_wait`.
    ///
    /// The buffer comes back cleared. Dropping the guard without
    /// submitting returns it to the empty queue.
    pub fn acquire(&self, max_wait: Duration) -> Option<AcquiredBuffer<'_>> {
        match self.empty_rx.recv_timeout(max_wait) {
            Ok(mut buffer) => {
                buffer.clear();
                self.held.fetch_add(1, Ordering::AcqRel);
                Some(AcquiredBuffer {
                    pool: self,
                    buffer: Some(buffer),
                })
            }
            Err(_) => {
                self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Hand a filled buffer to the sink side.
    pub fn submit(&self, mut guard: AcquiredBuffer<'_>) {
        if let Some(buffer) = guard.buffer.take() {
            self.release(buffer, true);
            self.submitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the oldest ready buffer, waiting up to `max_wait`.
    ///
    /// Dropping the guard recycles the buffer to the empty queue.
    pub fn drain(&self, max_wait: Duration) -> Option<DrainedBuffer<'_>> {
        let buffer = self.ready_rx.recv_timeout(max_wait).ok()?;
        self.held.fetch_add(1, Ordering::AcqRel);
        self.drained.fetch_add(1, Ordering::Relaxed);
        Some(DrainedBuffer {
            pool: self,
            buffer: Some(buffer),
        })
    }

    fn release(&self, buffer: AudioBuffer, ready: bool) {
        let result = if ready {
            self.ready_tx.try_send(buffer)
        } else {
            self.empty_tx.try_send(buffer)
        };
        // Both queues can hold every buffer, so a full queue means the
        // accounting is already broken
        if let Err(e) = result {
            tracing::error!("Buffer pool queue rejected buffer {}", e.into_inner().index);
        }
        self.held.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffers waiting for the sink
    pub fn ready_len(&self) -> usize {
        self.ready_rx.len()
    }

    pub fn empty_len(&self) -> usize {
        self.empty_rx.len()
    }

    /// Every buffer is in exactly one of: empty queue, ready queue, held.
    ///
    /// Only meaningful while no other thread is mid-transfer.
    pub fn is_consistent(&self) -> bool {
        self.empty_len() + self.ready_len() + self.held.load(Ordering::Acquire) == self.count
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            count: self.count,
            empty: self.empty_len(),
            ready: self.ready_len(),
            held: self.held.load(Ordering::Acquire),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
        }
    }
}

/// Buffer pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub count: usize,
    pub empty: usize,
    pub ready: usize,
    pub held: usize,
    pub acquire_timeouts: usize,
    pub submitted: usize,
    pub drained: usize,
}

/// Exclusive access to an acquired buffer (producer side)
pub struct AcquiredBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Option<AudioBuffer>,
}

impl Deref for AcquiredBuffer<'_> {
    type Target = AudioBuffer;

    fn deref(&self) -> &AudioBuffer {
        // Only `submit` and `drop` take the buffer out
        self.buffer.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for AcquiredBuffer<'_> {
    fn deref_mut(&mut self) -> &mut AudioBuffer {
        self.buffer.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for AcquiredBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer, false);
        }
    }
}

/// A ready buffer being written to the sink (consumer side)
pub struct DrainedBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Option<AudioBuffer>,
}

impl Deref for DrainedBuffer<'_> {
    type Target = AudioBuffer;

    fn deref(&self) -> &AudioBuffer {
        self.buffer.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for DrainedBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer, false);
        }
    }
}
