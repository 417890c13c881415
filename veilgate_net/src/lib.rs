// veilgate_net — peer-to-peer mesh session layer for Veilgate multiplayer.
//
// Up to four participants form a fully-connected mesh over a virtual IPv6
// overlay: one listening TCP socket and one UDP socket per host, one TCP
// stream per peer. UDP carries out-of-band discovery (game-name probes and
// answers); TCP carries the framed in-band traffic, including the join
// handshake and the opaque game packets this layer ferries for the
// application.
//
// Module overview:
// - `transport/`:  The `Transport` capability trait, the socket driver for
//                  the overlay (`OverlayTransport`), and the in-memory mesh
//                  the tests run on (`LoopbackTransport`).
// - `session.rs`:  The session proper — create/join lifecycle, discovery,
//                  join handshake with cookie correlation, admission,
//                  packet routing, and derived master election.
// - `error.rs`:    `SessionError`, the caller-facing error surface.
//
// Wire types (endpoints, framing, the packet model and codec contract) live
// in `veilgate_protocol`, shared with the packet factory.
//
// Threading: none. All state is driven from the thread that calls
// `create`/`join`/`poll`/`send`/`leave`; socket I/O is non-blocking and the
// only sleeps are the bounded waits inside `create` and `join`.

pub mod error;
pub mod session;
pub mod transport;

pub use error::SessionError;
pub use session::{Session, SessionConfig, SessionPhase};
pub use transport::{
    LoopbackNet, LoopbackTransport, Overlay, OverlayTransport, Transport, DEFAULT_PORT,
};
