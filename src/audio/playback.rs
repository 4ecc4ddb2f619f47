//! Playback gating and the two real-time loops around the buffer pool
//!
//! ```text
//! JitterBuffer ──> PlaybackConsumer ──> BufferPool ──> SinkWriter ──> PlaybackSink
//!                  (state machine,                     (records write
//!                   decode, volume)                     liveness, faults)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::buffer::JitterBuffer;
use crate::audio::device::{PlaybackSink, VolumeInput};
use crate::audio::pool::BufferPool;
use crate::codec::AudioDecoder;
use crate::shutdown::ShutdownSignal;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    Idle = 0,
    Buffering = 1,
    Playing = 2,
    Underrun = 3,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Buffering,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Underrun,
            _ => PlaybackState::Idle,
        }
    }
}

/// Last state published by the state machine, readable from any thread
#[derive(Debug)]
pub struct SharedPlaybackState(AtomicU8);

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self(AtomicU8::new(PlaybackState::Idle as u8))
    }

    pub fn get(&self) -> PlaybackState {
        PlaybackState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.get() == PlaybackState::Playing
    }

    fn publish(&self, state: PlaybackState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for SharedPlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware write liveness, written by the sink writer and read by the
/// state machine
#[derive(Debug)]
pub struct SinkHealth {
    origin: Instant,
    /// Microseconds since `origin` of the last successful write, 0 = never
    last_write_us: AtomicU64,
    fault: AtomicBool,
    writes: AtomicU64,
    bytes_written: AtomicU64,
    faults: AtomicU64,
}

impl SinkHealth {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_write_us: AtomicU64::new(0),
            fault: AtomicBool::new(false),
            writes: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }

    pub fn record_write(&self, bytes: usize) {
        let us = self.origin.elapsed().as_micros() as u64;
        self.last_write_us.store(us.max(1), Ordering::Release);
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn last_write(&self) -> Option<Instant> {
        match self.last_write_us.load(Ordering::Acquire) {
            0 => None,
            us => Some(self.origin + Duration::from_micros(us)),
        }
    }

    /// Raise the fault flag (write failure or DMA error)
    pub fn flag_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        self.fault.store(true, Ordering::Release);
    }

    /// Consume the fault flag
    pub fn take_fault(&self) -> bool {
        self.fault.swap(false, Ordering::AcqRel)
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            writes: self.writes.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

impl Default for SinkHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink statistics
#[derive(Debug, Clone)]
pub struct SinkStats {
    pub writes: u64,
    pub bytes_written: u64,
    pub faults: u64,
}

/// Converts jitter fill level and sink liveness into a playback state.
///
/// Refill and drain use different conditions: entering `Playing` needs
/// `start_threshold` bytes, leaving it needs an empty buffer *and* a
/// stalled sink.
pub struct PlaybackStateMachine {
    state: PlaybackState,
    published: Arc<SharedPlaybackState>,
    start_threshold: usize,
    stall_timeout: Duration,
    playing_since: Option<Instant>,
    underruns: u64,
}

impl PlaybackStateMachine {
    pub fn new(
        start_threshold: usize,
        stall_timeout: Duration,
        published: Arc<SharedPlaybackState>,
    ) -> Self {
        published.publish(PlaybackState::Idle);
        Self {
            state: PlaybackState::Idle,
            published,
            start_threshold,
            stall_timeout,
            playing_since: None,
            underruns: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn start_threshold(&self) -> usize {
        self.start_threshold
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Run one evaluation step.
    ///
    /// `last_write` is the time of the last successful hardware write and
    /// `fault` reports a sink fault since the previous step.
    pub fn evaluate(
        &mut self,
        used: usize,
        last_write: Option<Instant>,
        fault: bool,
        now: Instant,
    ) -> PlaybackState {
        let next = if fault {
            PlaybackState::Underrun
        } else if used >= self.start_threshold {
            PlaybackState::Playing
        } else {
            match self.state {
                PlaybackState::Playing if used == 0 && self.stalled(last_write, now) => {
                    PlaybackState::Underrun
                }
                PlaybackState::Idle if used > 0 => PlaybackState::Buffering,
                state => state,
            }
        };

        if next != self.state {
            self.transition(next, used, fault, now);
        }
        next
    }

    fn stalled(&self, last_write: Option<Instant>, now: Instant) -> bool {
        // A sink that has not written since playback began counts from
        // the moment playback began
        let reference = match (last_write, self.playing_since) {
            (Some(write), Some(since)) => write.max(since),
            (Some(write), None) => write,
            (None, Some(since)) => since,
            (None, None) => return true,
        };
        now.saturating_duration_since(reference) > self.stall_timeout
    }

    fn transition(&mut self, next: PlaybackState, used: usize, fault: bool, now: Instant) {
        match next {
            PlaybackState::Playing => {
                self.playing_since = Some(now);
                tracing::info!("Playback started ({} bytes buffered)", used);
            }
            PlaybackState::Underrun => {
                self.playing_since = None;
                self.underruns += 1;
                if fault {
                    tracing::warn!("Sink fault, playback underrun");
                } else {
                    tracing::warn!("Playback underrun: buffer empty and sink stalled");
                }
            }
            _ => {
                tracing::debug!("Playback {:?} -> {:?}", self.state, next);
            }
        }
        self.state = next;
        self.published.publish(next);
    }
}

/// Copy samples into pool buffers, submitting each one.
///
/// Returns `false` if a buffer could not be acquired in time; the rest of
/// the chunk is dropped.
fn fill_pool(pool: &BufferPool, samples: &[i16], acquire_wait: Duration) -> bool {
    let mut rest = samples;
    while !rest.is_empty() {
        let Some(mut buffer) = pool.acquire(acquire_wait) else {
            return false;
        };
        let taken = buffer.extend_from_samples(rest);
        if taken == 0 {
            return false;
        }
        rest = &rest[taken..];
        pool.submit(buffer);
    }
    true
}

/// Jitter consumer: gates on the state machine, decodes, fills the pool.
pub struct PlaybackConsumer {
    jitter: Arc<JitterBuffer>,
    pool: Arc<BufferPool>,
    health: Arc<SinkHealth>,
    volume: Arc<dyn VolumeInput>,
    machine: PlaybackStateMachine,
    decoder: AudioDecoder,
    /// Bumped by the connection handler whenever a session ends
    session: Arc<AtomicU64>,
    decoding_session: u64,
    poll_interval: Duration,
    acquire_wait: Duration,
    dropped_chunks: u64,
}

impl PlaybackConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jitter: Arc<JitterBuffer>,
        pool: Arc<BufferPool>,
        health: Arc<SinkHealth>,
        volume: Arc<dyn VolumeInput>,
        machine: PlaybackStateMachine,
        decoder: AudioDecoder,
        session: Arc<AtomicU64>,
        poll_interval: Duration,
        acquire_wait: Duration,
    ) -> Self {
        let decoding_session = session.load(Ordering::Acquire);
        Self {
            jitter,
            pool,
            health,
            volume,
            machine,
            decoder,
            session,
            decoding_session,
            poll_interval,
            acquire_wait,
            dropped_chunks: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.machine.state()
    }

    /// Chunks lost to pool exhaustion
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks
    }

    /// One loop iteration. Blocks at most about one poll interval plus
    /// one acquire wait.
    pub fn step(&mut self) -> PlaybackState {
        let state = self.machine.evaluate(
            self.jitter.used_bytes(),
            self.health.last_write(),
            self.health.take_fault(),
            Instant::now(),
        );

        if state != PlaybackState::Playing {
            self.jitter
                .wait_for_level(self.machine.start_threshold(), self.poll_interval);
            return state;
        }

        let Some(chunk) = self.jitter.receive(self.poll_interval) else {
            return state;
        };
        // Checked after receive so a chunk from a new session never sees
        // the previous session's ADPCM state
        let session = self.session.load(Ordering::Acquire);
        if session != self.decoding_session {
            self.decoding_session = session;
            self.decoder.reset();
            tracing::debug!("New session, decoder state reset");
        }
        let volume = self.volume.current_volume();
        match self.decoder.decode(&chunk, volume) {
            Ok(samples) => {
                if !fill_pool(&self.pool, samples, self.acquire_wait) {
                    self.dropped_chunks += 1;
                    tracing::debug!("No free output buffer, dropped audio chunk");
                }
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable audio frame: {}", e);
            }
        }
        state
    }

    pub fn run(mut self, shutdown: &ShutdownSignal) {
        tracing::debug!("Playback consumer started");
        while !shutdown.is_requested() {
            self.step();
        }
        let stats = self.decoder.stats();
        tracing::debug!(
            "Playback consumer stopped: {} frames decoded, {} rejected, {} underruns",
            stats.frames_decoded,
            stats.frames_rejected,
            self.machine.underruns()
        );
    }
}

/// Drains ready buffers into the hardware sink.
pub struct SinkWriter {
    pool: Arc<BufferPool>,
    health: Arc<SinkHealth>,
    sink: Box<dyn PlaybackSink>,
    write_timeout: Duration,
    poll_interval: Duration,
}

impl SinkWriter {
    pub fn new(
        pool: Arc<BufferPool>,
        health: Arc<SinkHealth>,
        sink: Box<dyn PlaybackSink>,
        write_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            health,
            sink,
            write_timeout,
            poll_interval,
        }
    }

    pub fn step(&mut self) {
        if let Some(fault) = self.sink.poll_fault() {
            tracing::warn!("Playback sink fault: {}", fault);
            self.health.flag_fault();
        }

        let Some(buffer) = self.pool.drain(self.poll_interval) else {
            return;
        };
        write_all(
            self.sink.as_mut(),
            &self.health,
            buffer.as_slice(),
            self.write_timeout,
        );
    }

    pub fn run(mut self, shutdown: &ShutdownSignal) {
        tracing::debug!("Sink writer started");
        while !shutdown.is_requested() {
            self.step();
        }
        tracing::debug!("Sink writer stopped");
    }
}

/// Write one buffer, allowing short writes, within a total `timeout`.
/// A failed write raises the fault flag; the rest of the buffer is lost.
fn write_all(sink: &mut dyn PlaybackSink, health: &SinkHealth, bytes: &[u8], timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let mut offset = 0;
    while offset < bytes.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::debug!("Sink write timed out, {} bytes lost", bytes.len() - offset);
            return;
        }
        match sink.write(&bytes[offset..], remaining) {
            Ok(0) => {}
            Ok(n) => {
                offset += n;
                health.record_write(n);
            }
            Err(e) => {
                tracing::warn!("Sink write failed: {}", e);
                health.flag_fault();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::error::AudioError;
    use bytes::Bytes;
    use parking_lot::Mutex;

    const THRESHOLD: usize = 100;
    const STALL: Duration = Duration::from_millis(300);

    fn machine() -> (PlaybackStateMachine, Arc<SharedPlaybackState>) {
        let shared = Arc::new(SharedPlaybackState::new());
        (PlaybackStateMachine::new(THRESHOLD, STALL, shared.clone()), shared)
    }

    #[test]
    fn test_threshold_sequence_without_writes() {
        let (mut sm, shared) = machine();
        let t0 = Instant::now();

        assert_eq!(sm.evaluate(0, None, false, t0), PlaybackState::Idle);
        assert_eq!(sm.evaluate(THRESHOLD - 1, None, false, t0), PlaybackState::Buffering);
        assert_eq!(sm.evaluate(THRESHOLD, None, false, t0), PlaybackState::Playing);
        assert!(shared.is_playing());

        // Empty but not yet stalled
        let early = t0 + STALL / 2;
        assert_eq!(sm.evaluate(0, None, false, early), PlaybackState::Playing);

        let late = t0 + STALL + Duration::from_millis(1);
        assert_eq!(sm.evaluate(0, None, false, late), PlaybackState::Underrun);
        assert_eq!(shared.get(), PlaybackState::Underrun);
        assert_eq!(sm.underruns(), 1);
    }

    #[test]
    fn test_recent_write_prevents_underrun() {
        let (mut sm, _) = machine();
        let t0 = Instant::now();
        sm.evaluate(THRESHOLD, None, false, t0);

        let write = t0 + Duration::from_millis(250);
        let now = t0 + Duration::from_millis(400);
        assert_eq!(sm.evaluate(0, Some(write), false, now), PlaybackState::Playing);
    }

    #[test]
    fn test_underrun_needs_empty_buffer() {
        let (mut sm, _) = machine();
        let t0 = Instant::now();
        sm.evaluate(THRESHOLD, None, false, t0);
        let late = t0 + STALL * 2;
        assert_eq!(sm.evaluate(1, None, false, late), PlaybackState::Playing);
    }

    #[test]
    fn test_fault_forces_underrun_and_rearms() {
        let (mut sm, _) = machine();
        let t0 = Instant::now();
        sm.evaluate(THRESHOLD * 4, None, false, t0);
        assert_eq!(sm.evaluate(THRESHOLD * 4, None, true, t0), PlaybackState::Underrun);
        // Below threshold the machine stays in underrun
        assert_eq!(sm.evaluate(THRESHOLD - 1, None, false, t0), PlaybackState::Underrun);
        assert_eq!(sm.evaluate(THRESHOLD, None, false, t0), PlaybackState::Playing);
    }

    #[test]
    fn test_sink_health() {
        let health = SinkHealth::new();
        assert!(health.last_write().is_none());
        health.record_write(64);
        assert!(health.last_write().is_some());

        assert!(!health.take_fault());
        health.flag_fault();
        assert!(health.take_fault());
        assert!(!health.take_fault());
        assert_eq!(health.stats().faults, 1);
    }

    struct RecordingSink {
        written: Arc<Mutex<Vec<u8>>>,
        fail: bool,
    }

    impl PlaybackSink for RecordingSink {
        fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<usize, AudioError> {
            if self.fail {
                return Err(AudioError::SinkWrite("i2s".to_string()));
            }
            // Short writes of at most 3 bytes
            let n = bytes.len().min(3);
            self.written.lock().extend_from_slice(&bytes[..n]);
            Ok(n)
        }
    }

    #[test]
    fn test_consumer_to_sink() {
        let jitter = Arc::new(JitterBuffer::new(1024, 8));
        let pool = Arc::new(BufferPool::new(4, 8));
        let health = Arc::new(SinkHealth::new());
        let shared = Arc::new(SharedPlaybackState::new());
        let volume: Arc<dyn VolumeInput> = Arc::new(crate::audio::device::Volume::new(1.0));

        let mut consumer = PlaybackConsumer::new(
            jitter.clone(),
            pool.clone(),
            health.clone(),
            volume,
            PlaybackStateMachine::new(4, STALL, shared.clone()),
            AudioDecoder::new(Codec::Pcm8, false),
            Arc::new(AtomicU64::new(0)),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );

        jitter.send(Bytes::from_static(&[1, 2, 3, 4, 5]), Duration::from_millis(5));
        assert_eq!(consumer.step(), PlaybackState::Playing);
        assert!(shared.is_playing());
        // 5 mono samples = 10 bytes = two pool buffers
        assert_eq!(pool.ready_len(), 2);

        let written = Arc::new(Mutex::new(Vec::new()));
        let mut writer = SinkWriter::new(
            pool.clone(),
            health.clone(),
            Box::new(RecordingSink {
                written: written.clone(),
                fail: false,
            }),
            Duration::from_millis(50),
            Duration::from_millis(5),
        );
        writer.step();
        writer.step();

        let expected: Vec<u8> = [1i16, 2, 3, 4, 5]
            .iter()
            .flat_map(|&s| (s << 8).to_le_bytes())
            .collect();
        assert_eq!(*written.lock(), expected);
        assert!(health.last_write().is_some());
        assert!(pool.is_consistent());
        assert_eq!(pool.empty_len(), 4);
    }

    #[test]
    fn test_write_failure_raises_fault() {
        let pool = Arc::new(BufferPool::new(2, 8));
        let health = Arc::new(SinkHealth::new());
        let mut buffer = pool.acquire(Duration::from_millis(5)).unwrap();
        buffer.extend_from_slice(&[0; 4]);
        pool.submit(buffer);

        let mut writer = SinkWriter::new(
            pool.clone(),
            health.clone(),
            Box::new(RecordingSink {
                written: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            }),
            Duration::from_millis(50),
            Duration::from_millis(5),
        );
        writer.step();
        assert!(health.take_fault());
        // The buffer is recycled even though the write failed
        assert_eq!(pool.empty_len(), 2);
    }

    /// Sink that reports one DMA error, then accepts everything
    struct DmaFaultSink {
        pending_fault: bool,
    }

    impl PlaybackSink for DmaFaultSink {
        fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<usize, AudioError> {
            Ok(bytes.len())
        }

        fn poll_fault(&mut self) -> Option<AudioError> {
            std::mem::take(&mut self.pending_fault).then_some(AudioError::DmaFault)
        }
    }

    #[test]
    fn test_dma_fault_forces_underrun_with_full_buffer() {
        let jitter = Arc::new(JitterBuffer::new(1024, 8));
        let pool = Arc::new(BufferPool::new(4, 8));
        let health = Arc::new(SinkHealth::new());
        let shared = Arc::new(SharedPlaybackState::new());
        let volume: Arc<dyn VolumeInput> = Arc::new(crate::audio::device::Volume::new(1.0));

        let mut consumer = PlaybackConsumer::new(
            jitter.clone(),
            pool.clone(),
            health.clone(),
            volume,
            PlaybackStateMachine::new(4, STALL, shared.clone()),
            AudioDecoder::new(Codec::Pcm8, false),
            Arc::new(AtomicU64::new(0)),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );
        let mut writer = SinkWriter::new(
            pool.clone(),
            health.clone(),
            Box::new(DmaFaultSink {
                pending_fault: true,
            }),
            Duration::from_millis(50),
            Duration::from_millis(5),
        );

        jitter.send(Bytes::from_static(&[1; 8]), Duration::from_millis(5));
        jitter.send(Bytes::from_static(&[2; 8]), Duration::from_millis(5));
        assert_eq!(consumer.step(), PlaybackState::Playing);
        assert!(jitter.used_bytes() >= 4);

        writer.step();
        assert_eq!(health.stats().faults, 1);

        // Still above the start threshold, yet the fault wins
        assert_eq!(consumer.step(), PlaybackState::Underrun);
        assert_eq!(shared.get(), PlaybackState::Underrun);
        assert!(jitter.used_bytes() >= 4);

        // The fault is consumed once; the next evaluation re-arms
        assert_eq!(consumer.step(), PlaybackState::Playing);
    }
}
