//! Audio hardware collaborators
//!
//! The pipeline talks to the playback sink, the microphone, the volume
//! control and the presence flag only through these traits. Real drivers
//! live outside the core (see `audio::host` for the cpal-backed ones).

use atomic_float::AtomicF32;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::AudioError;

/// Hardware playback sink
pub trait PlaybackSink: Send {
    /// Write interleaved 16-bit LE PCM, blocking at most `timeout`.
    ///
    /// Returns the number of bytes accepted, which may be short.
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, AudioError>;

    /// Asynchronous fault raised by the hardware since the last call
    /// (a DMA error on the device).
    fn poll_fault(&mut self) -> Option<AudioError> {
        None
    }
}

/// Hardware microphone
pub trait MicrophoneSource: Send {
    /// Fill `buf` with mono samples; returns how many were read.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, AudioError>;
}

/// Playback volume source
pub trait VolumeInput: Send + Sync {
    /// Current volume in `[0.0, 1.0]`
    fn current_volume(&self) -> f32;
}

/// External session activity flag
pub trait PresenceSignal: Send + Sync {
    fn is_session_active(&self) -> bool;
}

/// Lock-free volume scalar: one writer (the control input), many readers.
#[derive(Debug)]
pub struct Volume(AtomicF32);

impl Volume {
    pub fn new(level: f32) -> Self {
        Self(AtomicF32::new(level.clamp(0.0, 1.0)))
    }

    pub fn set(&self, level: f32) {
        self.0.store(level.clamp(0.0, 1.0), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl VolumeInput for Volume {
    fn current_volume(&self) -> f32 {
        self.get()
    }
}

/// Presence signal for devices without a presence sensor
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysActive;

impl PresenceSignal for AlwaysActive {
    fn is_session_active(&self) -> bool {
        true
    }
}

/// Paces `bytes` at a given byte rate, like hardware consuming samples.
struct Pacer {
    bytes_per_sec: u64,
    started: Option<Instant>,
    consumed: u64,
}

impl Pacer {
    fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec: bytes_per_sec.max(1),
            started: None,
            consumed: 0,
        }
    }

    /// Account for `bytes` and sleep until real time catches up,
    /// never longer than `limit`.
    fn pace(&mut self, bytes: usize, limit: Duration) {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.consumed += bytes as u64;
        let due = Duration::from_micros(self.consumed * 1_000_000 / self.bytes_per_sec);
        let elapsed = started.elapsed();
        if due > elapsed {
            thread::sleep((due - elapsed).min(limit));
        } else if elapsed - due > Duration::from_secs(1) {
            // Fell far behind (e.g. after a pause); restart the clock
            self.started = Some(Instant::now());
            self.consumed = 0;
        }
    }
}

/// Sink that discards audio at the hardware rate
pub struct NullSink {
    pacer: Pacer,
    bytes_written: u64,
}

impl NullSink {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            pacer: Pacer::new(sample_rate as u64 * channels as u64 * 2),
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl PlaybackSink for NullSink {
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, AudioError> {
        self.pacer.pace(bytes.len(), timeout);
        self.bytes_written += bytes.len() as u64;
        Ok(bytes.len())
    }
}

/// Microphone producing digital silence at the capture rate
pub struct SilentMicrophone {
    pacer: Pacer,
}

impl SilentMicrophone {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            pacer: Pacer::new(sample_rate as u64 * 2),
        }
    }
}

impl MicrophoneSource for SilentMicrophone {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, AudioError> {
        buf.fill(0);
        self.pacer.pace(buf.len() * 2, Duration::from_secs(1));
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_is_clamped() {
        let volume = Volume::new(2.0);
        assert_eq!(volume.current_volume(), 1.0);
        volume.set(-0.5);
        assert_eq!(volume.current_volume(), 0.0);
        volume.set(0.25);
        assert_eq!(volume.current_volume(), 0.25);
    }

    #[test]
    fn test_null_sink_is_paced() {
        // 1000 Hz mono: 2000 bytes per second
        let mut sink = NullSink::new(1000, 1);
        let start = Instant::now();
        for _ in 0..4 {
            assert_eq!(sink.write(&[0u8; 100], Duration::from_secs(1)).unwrap(), 100);
        }
        // 400 bytes = 200 ms of audio
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(sink.bytes_written(), 400);
    }

    #[test]
    fn test_silent_microphone() {
        let mut mic = SilentMicrophone::new(16000);
        let mut buf = [7i16; 32];
        assert_eq!(mic.read(&mut buf).unwrap(), 32);
        assert!(buf.iter().all(|&s| s == 0));
    }
}
