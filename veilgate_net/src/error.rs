// Session-level error type.
//
// Transport I/O problems never appear here; the transport absorbs them
// (see `transport/overlay.rs`). What remains is the caller-facing surface:
// bring-up failures out of `create`/`join`, and misuse of the send API.

use thiserror::Error;
use veilgate_protocol::{PlayerId, ProtocolError};

#[derive(Debug, Error)]
pub enum SessionError {
    /// The overlay network did not come online within the bounded wait.
    #[error("overlay network did not come online")]
    NetworkOffline,

    /// Discovery found no session with the requested game name.
    #[error("no session found for the requested game name")]
    GameNotFound,

    /// The master never answered the join request.
    #[error("join handshake timed out")]
    JoinTimeout,

    /// `PLR_MASTER` is resolved on receive; senders must address a real
    /// player or broadcast.
    #[error("cannot send to the master pseudo-address")]
    UnresolvedMaster,

    /// Destination outside the player range and not a known pseudo-id.
    #[error("invalid destination {0:?}")]
    InvalidDestination(PlayerId),

    /// Socket bring-up failed underneath `create`/`join`.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
