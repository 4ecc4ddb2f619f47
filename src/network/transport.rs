//! Transport-side collaborator interfaces

use bytes::Bytes;

use crate::error::TransportError;

/// Opaque duplex byte channel to the peer.
///
/// All methods are non-blocking: they may be called from real-time
/// threads. Connection progress is reported back through
/// [`FrameHandler::on_connected`] / [`FrameHandler::on_disconnected`].
pub trait Transport: Send + Sync {
    /// Request a (re)connection.
    fn connect(&self) -> Result<(), TransportError>;

    /// Tear down the current connection, if any.
    fn disconnect(&self);

    /// Queue one complete frame for sending.
    fn send_binary(&self, frame: Bytes) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

/// Receiver of inbound frames and connection lifecycle events
pub trait FrameHandler: Send + Sync {
    /// One inbound message, type byte included
    fn on_frame(&self, raw: &[u8]);

    fn on_connected(&self);

    fn on_disconnected(&self);
}

/// Firmware update collaborator
pub trait OtaTrigger: Send + Sync {
    fn start_update(&self, url: &str);
}

/// OTA trigger for hosts that cannot flash themselves: logs the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyOta;

impl OtaTrigger for LogOnlyOta {
    fn start_update(&self, url: &str) {
        tracing::info!("Firmware update requested: {}", url);
    }
}
