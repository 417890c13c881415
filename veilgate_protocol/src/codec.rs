// Codec contract between the session layer and the packet factory.
//
// The session constructs `Packet` values and hands them to a `PacketCodec`
// for the wire; inbound buffers go the other way. Encryption and
// authentication live entirely behind this trait. The session trusts that
// a successfully decoded packet is authentic, which is why it is willing to
// learn peer addresses from the transport-level sender of such packets.
//
// Encoded bytes carry no length prefix. The transport adds one per frame on
// TCP streams; a UDP datagram is the encoded bytes as-is.

use crate::error::PacketError;
use crate::packet::Packet;

/// External packet factory: construct, parse, authenticate.
pub trait PacketCodec: Send {
    /// Install the session password used to key the wire form.
    fn set_password(&mut self, password: &str);

    /// Serialise a packet to its wire form (no length prefix).
    fn encode(&self, pkt: &Packet) -> Vec<u8>;

    /// Parse and authenticate an inbound buffer.
    fn decode(&self, bytes: &[u8]) -> Result<Packet, PacketError>;
}

/// Plaintext codec: JSON wire form, no encryption or authentication.
///
/// The password is ignored; sessions built on this codec rely on the
/// overlay network for access control. It is also the codec the test suites
/// run against.
#[derive(Debug, Default)]
pub struct PlainCodec;

impl PlainCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketCodec for PlainCodec {
    fn set_password(&mut self, _password: &str) {}

    fn encode(&self, pkt: &Packet) -> Vec<u8> {
        // Packet contains nothing a serializer can reject.
        serde_json::to_vec(pkt).expect("packet serialisation cannot fail")
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet, PacketError> {
        serde_json::from_slice(bytes).map_err(|e| PacketError::Malformed(e.to_string()))
    }
}
