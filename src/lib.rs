//! # Audio Link
//!
//! Real-time audio delivery core for a network-connected audio device:
//! one persistent duplex connection carries multiplexed audio, text and
//! control frames; inbound audio is de-jittered, decoded and fed to the
//! playback hardware while the microphone is streamed back to the peer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                                 PEER                                     │
//! └───────────────────────────────────┬──────────────────────────────────────┘
//!                                     │ WebSocket (network::websocket)
//!                                     │ Frames: [Type|Payload]
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        FrameRouter (network::router)                     │
//! │   0x01 text ─> log   0x04 OTA=<url> ─> OtaTrigger   0x05 ping ─> 0x06    │
//! └──────────┬───────────────────────────────────────────────────┬───────────┘
//!            │ 0x02 audio                                        │ ping time
//!            ▼                                                   ▼
//! ┌──────────────────────┐                          ┌────────────────────────┐
//! │     JitterBuffer     │                          │   LivenessWatchdog     │
//! │  (overwrite oldest)  │                          │ timeout ─> reconnect   │
//! └──────────┬───────────┘                          └────────────────────────┘
//!            │ gated by PlaybackStateMachine
//!            ▼                                       ┌───────────────────────┐
//! ┌──────────────────────┐   ┌──────────────────┐    │      Microphone       │
//! │  Decoder thread      │   │   BufferPool     │    └──────────┬────────────┘
//! │  ADPCM / PCM8 / PCM16├──>│  empty <-> ready ├─┐             ▼
//! │  volume, stereo      │   └──────────────────┘ │  ┌───────────────────────┐
//! └──────────────────────┘                        │  │ OutboundEncoder       │
//!                                                 │  │ µ-law, silence while  │
//!            ┌────────────────────────────────────┘  │ playing               │
//!            ▼                                       └──────────┬────────────┘
//! ┌──────────────────────┐                                      │ 0x02 frames
//! │ Sink writer thread   │                                      ▼
//! │ ─> PlaybackSink      │                                    PEER
//! └──────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod protocol;
pub mod shutdown;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use pipeline::{Collaborators, Pipeline, PipelineContext, PipelineStats};
