//! Inbound frame demultiplexer
//!
//! Runs inline on the network receive path, so every operation here is
//! either immediate or bounded by `send_wait`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::buffer::JitterBuffer;
use crate::error::ProtocolError;
use crate::network::liveness::LivenessState;
use crate::network::transport::{OtaTrigger, Transport};
use crate::protocol::{ControlCommand, Frame, FrameType};

/// Log target for text frames sent by the peer
pub const PEER_LOG_TARGET: &str = "audio_link::peer";

/// What happened to one routed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Text,
    Audio { accepted: bool },
    RfidAck,
    Control(ControlCommand),
    Ping { pong_sent: bool },
    Pong,
    Dropped(ProtocolError),
}

pub struct FrameRouter {
    jitter: Arc<JitterBuffer>,
    liveness: Arc<LivenessState>,
    transport: Arc<dyn Transport>,
    ota: Arc<dyn OtaTrigger>,
    send_wait: Duration,
    frames_routed: AtomicU64,
    frames_dropped: AtomicU64,
    audio_dropped: AtomicU64,
}

impl FrameRouter {
    pub fn new(
        jitter: Arc<JitterBuffer>,
        liveness: Arc<LivenessState>,
        transport: Arc<dyn Transport>,
        ota: Arc<dyn OtaTrigger>,
        send_wait: Duration,
    ) -> Self {
        Self {
            jitter,
            liveness,
            transport,
            ota,
            send_wait,
            frames_routed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            audio_dropped: AtomicU64::new(0),
        }
    }

    /// Dispatch one inbound message by its type byte.
    pub fn route(&self, raw: &[u8]) -> RouteOutcome {
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping inbound frame: {}", e);
                return RouteOutcome::Dropped(e);
            }
        };
        self.frames_routed.fetch_add(1, Ordering::Relaxed);

        match frame.frame_type {
            FrameType::Text => {
                tracing::info!(target: PEER_LOG_TARGET, "{}", String::from_utf8_lossy(&frame.payload));
                RouteOutcome::Text
            }
            FrameType::Audio => {
                let len = frame.payload.len();
                let accepted = self.jitter.send(frame.payload, self.send_wait);
                if !accepted {
                    self.audio_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Jitter buffer rejected {} audio bytes, dropped", len);
                } else {
                    tracing::trace!("Queued {} audio bytes", len);
                }
                RouteOutcome::Audio { accepted }
            }
            FrameType::Rfid => {
                tracing::debug!("RFID event acknowledged by peer");
                RouteOutcome::RfidAck
            }
            FrameType::Control => self.handle_control(&frame.payload),
            FrameType::Ping => {
                let pong_sent = match self.transport.send_binary(Frame::pong().encode()) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("Failed to answer ping: {}", e);
                        false
                    }
                };
                self.liveness.record_ping(Instant::now());
                tracing::trace!("Ping from peer");
                RouteOutcome::Ping { pong_sent }
            }
            FrameType::Pong => {
                tracing::trace!("Pong from peer");
                RouteOutcome::Pong
            }
        }
    }

    fn handle_control(&self, payload: &[u8]) -> RouteOutcome {
        match ControlCommand::parse(payload) {
            Ok(ControlCommand::Ota { url }) => {
                tracing::info!("Peer announced firmware at {}", url);
                self.ota.start_update(&url);
                RouteOutcome::Control(ControlCommand::Ota { url })
            }
            Ok(ControlCommand::Unrecognized(command)) => {
                tracing::warn!("Ignoring unrecognized control command: {}", command);
                RouteOutcome::Control(ControlCommand::Unrecognized(command))
            }
            Err(e) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping control frame: {}", e);
                RouteOutcome::Dropped(e)
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            frames_routed: self.frames_routed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            audio_dropped: self.audio_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Router statistics
#[derive(Debug, Clone)]
pub struct RouterStats {
    pub frames_routed: u64,
    pub frames_dropped: u64,
    pub audio_dropped: u64,
}
