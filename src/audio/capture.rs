//! Microphone uplink
//!
//! Reads fixed-size chunks from the microphone, encodes them as µ-law
//! `0x02` frames and hands them to the transport. While the device is
//! playing (or the session is inactive) the microphone is still read but
//! full-size silence frames are sent instead, so the peer keeps its frame
//! timing without hearing the device's own playback.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::device::{MicrophoneSource, PresenceSignal};
use crate::audio::playback::SharedPlaybackState;
use crate::codec::MicEncoder;
use crate::error::TransportError;
use crate::network::liveness::LivenessState;
use crate::network::transport::Transport;
use crate::shutdown::ShutdownSignal;

/// What one encoder iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkAction {
    /// Transport down, nothing read
    Offline,
    Sent,
    SentSilence,
    /// Read or send failed; chunk dropped
    Dropped,
}

pub struct OutboundEncoder {
    mic: Box<dyn MicrophoneSource>,
    encoder: MicEncoder,
    transport: Arc<dyn Transport>,
    liveness: Arc<LivenessState>,
    playback: Arc<SharedPlaybackState>,
    presence: Arc<dyn PresenceSignal>,
    samples: Vec<i16>,
    poll_interval: Duration,
    frames_dropped: u64,
}

impl OutboundEncoder {
    pub fn new(
        mic: Box<dyn MicrophoneSource>,
        chunk_samples: usize,
        transport: Arc<dyn Transport>,
        liveness: Arc<LivenessState>,
        playback: Arc<SharedPlaybackState>,
        presence: Arc<dyn PresenceSignal>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            mic,
            encoder: MicEncoder::new(chunk_samples),
            transport,
            liveness,
            playback,
            presence,
            samples: vec![0; chunk_samples],
            poll_interval,
            frames_dropped: 0,
        }
    }

    /// Whether the uplink currently sends silence
    pub fn is_muted(&self) -> bool {
        self.playback.is_playing() || !self.presence.is_session_active()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn step(&mut self) -> UplinkAction {
        if !self.liveness.wait_connected(self.poll_interval) {
            return UplinkAction::Offline;
        }

        let read = match self.mic.read(&mut self.samples) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Microphone read failed: {}", e);
                self.frames_dropped += 1;
                // Avoid spinning on a dead device
                thread::sleep(self.poll_interval);
                return UplinkAction::Dropped;
            }
        };

        let muted = self.is_muted();
        let frame = if muted {
            self.encoder.silence()
        } else {
            self.encoder.encode(&self.samples[..read])
        };

        match self.transport.send_binary(frame) {
            Ok(()) if muted => UplinkAction::SentSilence,
            Ok(()) => UplinkAction::Sent,
            Err(TransportError::NotConnected) => UplinkAction::Offline,
            Err(e) => {
                self.frames_dropped += 1;
                tracing::debug!("Dropped microphone frame: {}", e);
                UplinkAction::Dropped
            }
        }
    }

    pub fn run(mut self, shutdown: &ShutdownSignal) {
        tracing::debug!("Microphone encoder started");
        while !shutdown.is_requested() {
            self.step();
        }
        let stats = self.encoder.stats();
        tracing::debug!(
            "Microphone encoder stopped: {} frames, {} silent, {} dropped",
            stats.frames_encoded,
            stats.silent_frames,
            self.frames_dropped
        );
    }
}
