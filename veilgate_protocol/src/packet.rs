// Packet model shared by the session layer and the codec.
//
// A `Packet` is the decoded form the session routes on: source, destination,
// and a typed body. Handshake bodies carry their typed fields; everything
// the application exchanges travels as the opaque `Message` body, so this
// layer never inspects game payloads.
//
// Addresses inside bodies (`ConnectInfo::peer_addr`) stay in their 16-byte
// wire form rather than as `Endpoint` values: the codec must not need to
// understand overlay addressing to move them.

use serde::{Deserialize, Serialize};

use crate::types::{Cookie, PlayerId};

/// Typed packet payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PacketBody {
    /// Discovery probe, multicast by a prospective joiner.
    InfoRequest,
    /// Discovery answer from a session master, carrying its game name.
    InfoReply { game_name: Vec<u8> },
    /// Join handshake opener, unicast to the discovered master.
    JoinRequest { cookie: Cookie, game_info: Vec<u8> },
    /// Master's admission, echoing the request cookie and assigning an id.
    JoinAccept {
        cookie: Cookie,
        new_player: PlayerId,
        game_info: Vec<u8>,
    },
    /// Master's announcement of an existing peer to a fresh joiner.
    ConnectInfo {
        new_player: PlayerId,
        peer_addr: Vec<u8>,
    },
    /// Opaque application payload, delivered upward untouched.
    Message { payload: Vec<u8> },
}

/// One routed packet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub src: PlayerId,
    pub dest: PlayerId,
    pub body: PacketBody,
}

impl Packet {
    pub fn new(src: PlayerId, dest: PlayerId, body: PacketBody) -> Self {
        Packet { src, dest, body }
    }
}
