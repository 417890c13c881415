// Transport abstraction for the session layer.
//
// The session is written purely against this trait; `OverlayTransport`
// drives real sockets on the virtual overlay and `LoopbackTransport` is an
// in-memory mesh with the same observable contract, used by the integration
// tests.
//
// The contract for `recv` is a full tick: accept pending connections, drain
// every peer's send queue, pull readable bytes into the per-peer frame
// queues, read at most one OOB datagram, then hand back the next complete
// packet. OOB traffic comes first, in-band streams after, scanning peers in
// their iteration order. Errors on established connections are absorbed;
// the affected endpoints come back out of `take_failed` instead.

use rand::Rng;
use veilgate_protocol::{Endpoint, ProtocolError};

mod loopback;
mod overlay;

pub use loopback::{LoopbackNet, LoopbackTransport};
pub use overlay::{Overlay, OverlayTransport, DEFAULT_PORT, DISCOVERY_MULTICAST_ADDR};

/// Alphabet for generated game names. Consonant-heavy on purpose: the names
/// are meant to be typed, not pronounced.
const GAME_NAME_ALPHABET: &[u8] = b"abcdefghkopqrstuvwxyz";

/// Length of a generated game name.
const GAME_NAME_LEN: usize = 5;

/// Capability set the session layer consumes.
pub trait Transport: Send {
    /// True once the underlying network is ready and the listening sockets
    /// are bound. Idempotent; a bind failure is fatal.
    fn network_online(&mut self) -> Result<bool, ProtocolError>;

    /// Queue one whole frame for `peer`. Never blocks; the queue drains on
    /// later `recv` ticks, lazily connecting if needed. Returns false only
    /// when the payload cannot be framed at all.
    fn send(&mut self, peer: Endpoint, data: &[u8]) -> bool;

    /// Fire-and-forget datagram to `peer`.
    fn send_oob(&mut self, peer: Endpoint, data: &[u8]);

    /// Fire-and-forget datagram to the discovery multicast group.
    fn send_oob_mc(&mut self, data: &[u8]);

    /// One tick; returns the next complete packet, if any.
    fn recv(&mut self) -> Option<(Endpoint, Vec<u8>)>;

    /// Endpoints whose connections died since the last call.
    fn take_failed(&mut self) -> Vec<Endpoint>;

    /// Close `peer`'s stream, if any, and forget the peer. Idempotent.
    fn disconnect(&mut self, peer: Endpoint);

    /// A fresh random game name for hosting.
    fn default_game_name(&self) -> String {
        let mut rng = rand::rng();
        (0..GAME_NAME_LEN)
            .map(|_| GAME_NAME_ALPHABET[rng.random_range(0..GAME_NAME_ALPHABET.len())] as char)
            .collect()
    }
}
