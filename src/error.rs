//! Error types for the audio delivery core

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio hardware and pipeline errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Sink write failed: {0}")]
    SinkWrite(String),

    #[error("Sink reported a DMA fault")]
    DmaFault,

    #[error("Microphone read failed: {0}")]
    SourceRead(String),
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Payload truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("Invalid ADPCM step index: {0}")]
    InvalidIndex(u8),

    #[error("Odd PCM16 payload length: {0}")]
    OddLength(usize),
}

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown frame type: 0x{0:02X}")]
    UnknownType(u8),

    #[error("Control payload is not valid UTF-8")]
    InvalidText,

    #[error("RFID UID too long: {0} bytes")]
    UidTooLong(usize),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Outbound queue full")]
    QueueFull,

    #[error("Transport closed")]
    Closed,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
