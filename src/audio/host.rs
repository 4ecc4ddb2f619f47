//! cpal-backed sink and microphone for running the core on a desktop host
//!
//! cpal streams are not `Send` on every platform, so each stream lives on
//! its own thread and exchanges samples with the pipeline through
//! lock-free queues.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::device::{MicrophoneSource, PlaybackSink};
use crate::error::AudioError;

/// Device-side buffering of the playback queue
const SINK_QUEUE_MS: usize = 200;

/// Keeps a stream thread alive until dropped
struct StreamThread {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn `build` on a named thread and wait for it to report whether
    /// the stream started.
    fn spawn<F>(name: &str, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Blocks until the owner drops the sender
                let _ = stop_rx.recv();
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamError("stream thread exited".to_string()))
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn stream_config(sample_rate: u32, channels: u16) -> StreamConfig {
    StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Default output device as a [`PlaybackSink`]
pub struct CpalSink {
    queue: Arc<ArrayQueue<i16>>,
    errors: Receiver<AudioError>,
    _stream: StreamThread,
}

impl CpalSink {
    pub fn open(sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let capacity = sample_rate as usize * channels as usize * SINK_QUEUE_MS / 1000;
        let queue = Arc::new(ArrayQueue::new(capacity.max(1)));
        let (error_tx, errors) = bounded::<AudioError>(16);

        let callback_queue = queue.clone();
        let stream = StreamThread::spawn("audio-host-out", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))?;
            tracing::info!(
                "Opening output device {}",
                device.name().unwrap_or_else(|_| "Unknown".to_string())
            );
            device
                .build_output_stream(
                    &stream_config(sample_rate, channels),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for out in data.iter_mut() {
                            *out = callback_queue
                                .pop()
                                .map_or(0.0, |sample| sample as f32 / 32768.0);
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                )
                .map_err(|e| AudioError::StreamError(e.to_string()))
        })?;

        Ok(Self {
            queue,
            errors,
            _stream: stream,
        })
    }
}

impl PlaybackSink for CpalSink {
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, AudioError> {
        let deadline = Instant::now() + timeout;
        let mut written = 0;
        for pair in bytes.chunks_exact(2) {
            let mut sample = i16::from_le_bytes([pair[0], pair[1]]);
            // Wait for the device to consume
            while let Err(rejected) = self.queue.push(sample) {
                if Instant::now() >= deadline {
                    return Ok(written);
                }
                sample = rejected;
                thread::sleep(Duration::from_millis(1));
            }
            written += 2;
        }
        Ok(written)
    }

    fn poll_fault(&mut self) -> Option<AudioError> {
        self.errors.try_recv().ok()
    }
}

/// Default input device as a mono [`MicrophoneSource`]
pub struct CpalMicrophone {
    chunks: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    errors: Receiver<AudioError>,
    read_timeout: Duration,
    _stream: StreamThread,
}

impl CpalMicrophone {
    pub fn open(sample_rate: u32) -> Result<Self, AudioError> {
        let (chunk_tx, chunks) = bounded::<Vec<i16>>(64);
        let (error_tx, errors) = bounded::<AudioError>(16);

        let stream = StreamThread::spawn("audio-host-in", move || {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))?;
            tracing::info!(
                "Opening input device {}",
                device.name().unwrap_or_else(|_| "Unknown".to_string())
            );
            device
                .build_input_stream(
                    &stream_config(sample_rate, 1),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let chunk = data
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                            .collect();
                        // Overflow drops the chunk
                        let _ = chunk_tx.try_send(chunk);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                )
                .map_err(|e| AudioError::StreamError(e.to_string()))
        })?;

        Ok(Self {
            chunks,
            pending: VecDeque::new(),
            errors,
            read_timeout: Duration::from_millis(100),
            _stream: stream,
        })
    }
}

impl MicrophoneSource for CpalMicrophone {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, AudioError> {
        if let Ok(e) = self.errors.try_recv() {
            return Err(AudioError::SourceRead(e.to_string()));
        }
        let deadline = Instant::now() + self.read_timeout;
        while self.pending.len() < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.chunks.recv_timeout(remaining) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => break,
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, sample) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        Ok(n)
    }
}
