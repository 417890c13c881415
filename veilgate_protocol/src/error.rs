// Error types for the wire layer.
//
// `ProtocolError` covers failures that end a session: socket bring-up and
// malformed fixed-width serialisations. `PacketError` covers per-packet
// failures: the sender is disconnected, the packet dropped, and the session
// carries on.

use thiserror::Error;

/// Session-fatal wire-layer failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("socket bind failed: {0}")]
    Bind(#[source] std::io::Error),

    #[error("socket listen failed: {0}")]
    Listen(#[source] std::io::Error),

    #[error("endpoint buffer has {0} bytes, expected 16")]
    EndpointLength(usize),
}

/// Per-packet failures. Recoverable: log, drop the packet, disconnect the
/// sender if it came over a stream.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("frame length {0} exceeds the frame cap")]
    OversizedFrame(usize),

    #[error("no complete frame available")]
    FrameNotReady,

    #[error("packet rejected: {0}")]
    Malformed(String),
}
