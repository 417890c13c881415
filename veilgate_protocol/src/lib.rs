// veilgate_protocol — wire-level types for the Veilgate mesh session layer.
//
// This crate defines the value types and contracts shared by the session
// layer (`veilgate_net`) and the packet factory: endpoint addresses, player
// ids, stream framing, and the packet/codec model. It owns no sockets and
// no session state.
//
// Module overview:
// - `types.rs`:    `PlayerId` (with the `BROADCAST`/`MASTER` pseudo-ids),
//                  `Cookie`, `MAX_PLAYERS`.
// - `endpoint.rs`: 16-byte IPv6 overlay addresses, ordered and map-keyable,
//                  with the fixed-width wire form.
// - `framing.rs`:  Length-delimited frame reassembly for peer TCP streams:
//                  4-byte little-endian prefix, arbitrary chunk splits.
// - `packet.rs`:   The decoded packet model — handshake bodies plus the
//                  opaque application `Message`.
// - `codec.rs`:    The `PacketCodec` contract and the plaintext JSON
//                  implementation.
// - `error.rs`:    `ProtocolError` (session-fatal) and `PacketError`
//                  (per-packet, recoverable).

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod framing;
pub mod packet;
pub mod types;

pub use codec::{PacketCodec, PlainCodec};
pub use endpoint::{Endpoint, ENDPOINT_LEN};
pub use error::{PacketError, ProtocolError};
pub use framing::{FrameQueue, MAX_FRAME_LEN};
pub use packet::{Packet, PacketBody};
pub use types::{Cookie, PlayerId, MAX_PLAYERS};

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a packet with the plaintext codec, push it through a frame
    /// queue, decode, and compare.
    fn roundtrip(pkt: &Packet) {
        let codec = PlainCodec::new();
        let wire = codec.encode(pkt);

        let mut q = FrameQueue::new();
        q.write(&FrameQueue::make_frame(&wire).unwrap());
        let recovered = codec.decode(&q.read_packet().unwrap()).unwrap();
        assert_eq!(&recovered, pkt);
    }

    #[test]
    fn roundtrip_info_request() {
        roundtrip(&Packet::new(
            PlayerId::BROADCAST,
            PlayerId::MASTER,
            PacketBody::InfoRequest,
        ));
    }

    #[test]
    fn roundtrip_info_reply() {
        roundtrip(&Packet::new(
            PlayerId::BROADCAST,
            PlayerId::MASTER,
            PacketBody::InfoReply {
                game_name: b"kvothe".to_vec(),
            },
        ));
    }

    #[test]
    fn roundtrip_join_request() {
        roundtrip(&Packet::new(
            PlayerId::BROADCAST,
            PlayerId::MASTER,
            PacketBody::JoinRequest {
                cookie: Cookie(0xDEAD_BEEF),
                game_info: vec![1, 2, 3],
            },
        ));
    }

    #[test]
    fn roundtrip_join_accept() {
        roundtrip(&Packet::new(
            PlayerId(0),
            PlayerId::BROADCAST,
            PacketBody::JoinAccept {
                cookie: Cookie(0xCAFE_BABE),
                new_player: PlayerId(1),
                game_info: vec![0xFF; 64],
            },
        ));
    }

    #[test]
    fn roundtrip_connect_info() {
        let ep = Endpoint::parse("fd00::1").unwrap();
        roundtrip(&Packet::new(
            PlayerId::MASTER,
            PlayerId::BROADCAST,
            PacketBody::ConnectInfo {
                new_player: PlayerId(2),
                peer_addr: ep.serialize(),
            },
        ));
    }

    #[test]
    fn roundtrip_message() {
        roundtrip(&Packet::new(
            PlayerId(3),
            PlayerId::BROADCAST,
            PacketBody::Message {
                payload: vec![9; 300],
            },
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        let codec = PlainCodec::new();
        assert!(matches!(
            codec.decode(b"\x00\x01\x02not json"),
            Err(PacketError::Malformed(_))
        ));
    }

    #[test]
    fn connect_info_addr_deserialises_back() {
        let ep = Endpoint::parse("fd80::c0:ffee").unwrap();
        let pkt = Packet::new(
            PlayerId::MASTER,
            PlayerId::BROADCAST,
            PacketBody::ConnectInfo {
                new_player: PlayerId(1),
                peer_addr: ep.serialize(),
            },
        );
        let codec = PlainCodec::new();
        let back = codec.decode(&codec.encode(&pkt)).unwrap();
        let PacketBody::ConnectInfo { peer_addr, .. } = back.body else {
            panic!("expected ConnectInfo, got {:?}", back.body);
        };
        assert_eq!(Endpoint::deserialize(&peer_addr).unwrap(), ep);
    }
}
