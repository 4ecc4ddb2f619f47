//! Network subsystem: inbound routing, liveness and the peer transport

pub mod liveness;
pub mod router;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use liveness::{LivenessState, LivenessWatchdog, WatchdogAction};
pub use router::{FrameRouter, RouteOutcome, RouterStats};
pub use transport::{FrameHandler, LogOnlyOta, OtaTrigger, Transport};
#[cfg(feature = "websocket")]
pub use websocket::{WsDriver, WsTransport};
