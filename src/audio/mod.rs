//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
#[cfg(feature = "host-audio")]
pub mod host;
pub mod playback;
pub mod pool;

pub use buffer::{JitterBuffer, JitterBufferStats};
pub use capture::{OutboundEncoder, UplinkAction};
pub use device::{
    AlwaysActive, MicrophoneSource, NullSink, PlaybackSink, PresenceSignal, SilentMicrophone,
    Volume, VolumeInput,
};
#[cfg(feature = "host-audio")]
pub use host::{CpalMicrophone, CpalSink};
pub use playback::{
    PlaybackConsumer, PlaybackState, PlaybackStateMachine, SharedPlaybackState, SinkHealth,
    SinkWriter,
};
pub use pool::{AudioBuffer, BufferPool, PoolStats};
