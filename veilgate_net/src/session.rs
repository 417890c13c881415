// Mesh session layer: discovery, join handshake, admission, routing.
//
// A `Session` owns a transport and a codec and drives the whole lifecycle
// from one thread: `create` makes this host the sole (master) participant
// of a fresh session; `join` discovers a running session by game name over
// OOB multicast, then asks its master for a player slot. After that the
// mesh is symmetric. Every participant routes packets the same way, and
// mastership is derived, never negotiated: the lowest occupied id is the
// master, so admissions keep working when the founding host leaves.
//
// Peer-table writes funnel through `bind_slot`/`clear_slot`, which keep the
// connected table in lockstep and evict a stale slot when an endpoint moves.
// The transport absorbs socket errors; the session only learns about dead
// peers through `take_failed` at the top of each pump, and clears their
// slots so the next admission can reuse them.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};

use veilgate_protocol::{
    Cookie, Endpoint, Packet, PacketBody, PacketCodec, PlayerId, MAX_PLAYERS,
};

use crate::error::SessionError;
use crate::transport::Transport;

/// How many times the bounded waits poll before giving up.
pub const WAIT_ATTEMPTS: u32 = 500;

/// Sleep between polls; together with [`WAIT_ATTEMPTS`] this bounds every
/// wait at five seconds.
pub const WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Where the session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    NetworkWait,
    Discovering,
    Joining,
    Connected,
    Failed,
    Left,
}

/// Knobs for `Session::new`. The defaults are what the game uses; tests
/// tighten the wait bounds.
pub struct SessionConfig {
    /// Opaque game-state blob handed to joiners by the master.
    pub game_init_info: Vec<u8>,
    pub wait_attempts: u32,
    pub wait_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            game_init_info: Vec::new(),
            wait_attempts: WAIT_ATTEMPTS,
            wait_interval: WAIT_INTERVAL,
        }
    }
}

/// One participant's session state.
pub struct Session {
    transport: Box<dyn Transport>,
    codec: Box<dyn PacketCodec>,
    phase: SessionPhase,
    plr_self: PlayerId,
    peers: [Option<Endpoint>; MAX_PLAYERS],
    connected: [bool; MAX_PLAYERS],
    cookie_self: Cookie,
    game_name: String,
    first_peer: Option<Endpoint>,
    game_init_info: Vec<u8>,
    inbox: VecDeque<Packet>,
    wait_attempts: u32,
    wait_interval: Duration,
}

impl Session {
    pub fn new(
        transport: Box<dyn Transport>,
        codec: Box<dyn PacketCodec>,
        config: SessionConfig,
    ) -> Self {
        Session {
            transport,
            codec,
            phase: SessionPhase::Idle,
            plr_self: PlayerId::BROADCAST,
            peers: [None; MAX_PLAYERS],
            connected: [false; MAX_PLAYERS],
            cookie_self: Cookie::default(),
            game_name: String::new(),
            first_peer: None,
            game_init_info: config.game_init_info,
            inbox: VecDeque::new(),
            wait_attempts: config.wait_attempts,
            wait_interval: config.wait_interval,
        }
    }

    // -----------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------

    /// Host a new session under `game_name`. On success this host is player
    /// 0 and, being the only participant, the master.
    pub fn create(&mut self, game_name: &str, password: &str) -> Result<PlayerId, SessionError> {
        self.codec.set_password(password);
        self.game_name = game_name.to_string();
        self.phase = SessionPhase::NetworkWait;
        if !self.wait_network()? {
            self.phase = SessionPhase::Failed;
            return Err(SessionError::NetworkOffline);
        }
        self.plr_self = PlayerId(0);
        self.connected[0] = true;
        self.phase = SessionPhase::Connected;
        debug!("hosting '{}' as player 0", self.game_name);
        Ok(self.plr_self)
    }

    /// Join the session named `game_name`: discover its master over OOB
    /// multicast, then run the join handshake against it.
    pub fn join(&mut self, game_name: &str, password: &str) -> Result<PlayerId, SessionError> {
        self.codec.set_password(password);
        self.game_name = game_name.to_string();
        self.phase = SessionPhase::NetworkWait;
        if !self.wait_network()? {
            self.phase = SessionPhase::Failed;
            return Err(SessionError::NetworkOffline);
        }
        self.phase = SessionPhase::Discovering;
        if !self.wait_first_peer() {
            self.phase = SessionPhase::Failed;
            return Err(SessionError::GameNotFound);
        }
        self.phase = SessionPhase::Joining;
        self.wait_join();
        if self.plr_self == PlayerId::BROADCAST {
            self.phase = SessionPhase::Failed;
            return Err(SessionError::JoinTimeout);
        }
        self.phase = SessionPhase::Connected;
        Ok(self.plr_self)
    }

    /// One non-blocking pump of the transport.
    pub fn poll(&mut self) {
        self.pump();
    }

    /// Route an outbound packet by its destination.
    ///
    /// Sends to self are dropped silently, as are sends to a vacant slot
    /// (the peer is simply gone). Addressing `MASTER` is an error: the
    /// master pseudo-address is resolved by receivers, so the application
    /// must resolve it before sending.
    pub fn send(&mut self, pkt: &Packet) -> Result<(), SessionError> {
        if let Some(idx) = pkt.dest.index() {
            if pkt.dest == self.plr_self {
                return Ok(());
            }
            if let Some(ep) = self.peers[idx] {
                let bytes = self.codec.encode(pkt);
                self.transport.send(ep, &bytes);
            }
            Ok(())
        } else if pkt.dest == PlayerId::BROADCAST {
            let bytes = self.codec.encode(pkt);
            for ep in self.peers.iter().flatten() {
                self.transport.send(*ep, &bytes);
            }
            Ok(())
        } else if pkt.dest == PlayerId::MASTER {
            Err(SessionError::UnresolvedMaster)
        } else {
            Err(SessionError::InvalidDestination(pkt.dest))
        }
    }

    /// Next application packet delivered by the mesh, if any.
    pub fn take_message(&mut self) -> Option<Packet> {
        self.inbox.pop_front()
    }

    /// Drop the connection to `plr` and vacate its slot.
    pub fn disconnect_net(&mut self, plr: PlayerId) {
        let Some(idx) = plr.index() else {
            return;
        };
        if let Some(ep) = self.peers[idx] {
            self.transport.disconnect(ep);
        }
        self.clear_slot(idx);
    }

    /// Leave the session: broadcast the application's leave packet, flush
    /// once, then tear the mesh down.
    pub fn leave(&mut self, pkt: &Packet) -> Result<(), SessionError> {
        let result = self.send(pkt);
        self.pump();
        for idx in 0..MAX_PLAYERS {
            if let Some(ep) = self.peers[idx] {
                self.transport.disconnect(ep);
            }
            self.peers[idx] = None;
            self.connected[idx] = false;
        }
        self.plr_self = PlayerId::BROADCAST;
        self.first_peer = None;
        self.inbox.clear();
        self.phase = SessionPhase::Left;
        result
    }

    /// A fresh random game name for hosting.
    pub fn default_game_name(&self) -> String {
        self.transport.default_game_name()
    }

    // -----------------------------------------------------------------
    // Read-only state
    // -----------------------------------------------------------------

    pub fn self_id(&self) -> PlayerId {
        self.plr_self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn game_name(&self) -> &str {
        &self.game_name
    }

    /// Game-state blob: the local one when hosting, the master's copy after
    /// a successful join.
    pub fn game_init_info(&self) -> &[u8] {
        &self.game_init_info
    }

    pub fn peer(&self, plr: PlayerId) -> Option<Endpoint> {
        plr.index().and_then(|idx| self.peers[idx])
    }

    pub fn is_connected(&self, plr: PlayerId) -> bool {
        plr.index().is_some_and(|idx| self.connected[idx])
    }

    /// The current master: the lowest occupied player id, or our own id
    /// when no peers exist. Derived state; there is no election traffic.
    pub fn master(&self) -> PlayerId {
        let mut master = self.plr_self;
        for idx in 0..MAX_PLAYERS {
            if self.peers[idx].is_some() {
                master = master.min(PlayerId(idx as u8));
            }
        }
        master
    }

    // -----------------------------------------------------------------
    // Bounded waits
    // -----------------------------------------------------------------

    fn wait_network(&mut self) -> Result<bool, SessionError> {
        for _ in 0..self.wait_attempts {
            if self.transport.network_online()? {
                return Ok(true);
            }
            thread::sleep(self.wait_interval);
        }
        Ok(self.transport.network_online()?)
    }

    fn wait_first_peer(&mut self) -> bool {
        let probe = Packet::new(PlayerId::BROADCAST, PlayerId::MASTER, PacketBody::InfoRequest);
        let bytes = self.codec.encode(&probe);
        for _ in 0..self.wait_attempts {
            self.transport.send_oob_mc(&bytes);
            self.pump();
            if self.first_peer.is_some() {
                break;
            }
            thread::sleep(self.wait_interval);
        }
        self.first_peer.is_some()
    }

    fn wait_join(&mut self) {
        let Some(first_peer) = self.first_peer else {
            return;
        };
        self.cookie_self = Cookie(rand::random());
        let request = Packet::new(
            PlayerId::BROADCAST,
            PlayerId::MASTER,
            PacketBody::JoinRequest {
                cookie: self.cookie_self,
                game_info: self.game_init_info.clone(),
            },
        );
        let bytes = self.codec.encode(&request);
        self.transport.send(first_peer, &bytes);
        for _ in 0..self.wait_attempts {
            self.pump();
            if self.plr_self != PlayerId::BROADCAST {
                break;
            }
            thread::sleep(self.wait_interval);
        }
    }

    // -----------------------------------------------------------------
    // Inbound path
    // -----------------------------------------------------------------

    /// Drain the transport: retire dead peers, then decode and route every
    /// pending packet. A packet the codec rejects costs the sender its
    /// connection.
    fn pump(&mut self) {
        for ep in self.transport.take_failed() {
            if self.first_peer == Some(ep) {
                self.first_peer = None;
            }
            if let Some(idx) = self.slot_of(ep) {
                debug!("lost connection to player {idx} at {ep}");
                self.clear_slot(idx);
            }
        }
        while let Some((sender, bytes)) = self.transport.recv() {
            match self.codec.decode(&bytes) {
                Ok(pkt) => self.route(pkt, sender),
                Err(e) => {
                    warn!("dropping packet from {sender}: {e}");
                    self.transport.disconnect(sender);
                }
            }
        }
    }

    fn route(&mut self, pkt: Packet, sender: Endpoint) {
        // Discovery plane: src and dest are both pseudo-addresses.
        if pkt.src == PlayerId::BROADCAST && pkt.dest == PlayerId::MASTER {
            match pkt.body {
                PacketBody::JoinRequest { cookie, .. } => {
                    self.handle_join_request(cookie, sender);
                }
                PacketBody::InfoRequest => self.handle_info_request(sender),
                PacketBody::InfoReply { game_name } => {
                    self.handle_info_reply(&game_name, sender);
                }
                _ => {}
            }
            return;
        }

        // Master announcements of new peers.
        if pkt.src == PlayerId::MASTER {
            if let PacketBody::ConnectInfo {
                new_player,
                peer_addr,
            } = &pkt.body
            {
                self.handle_connect_info(*new_player, peer_addr);
                return;
            }
        }

        let Some(src_idx) = pkt.src.index() else {
            // The codec authenticated a packet no peer can legitimately
            // produce; the session cannot trust anything past this point.
            error!("authenticated packet with impossible source {:?}", pkt.src);
            std::process::abort();
        };

        // Normal in-band packet. The sender address on an authenticated
        // packet is the freshest knowledge of where that player lives.
        if pkt.src == self.plr_self {
            warn!("dropping packet claiming our own id from {sender}");
            return;
        }
        self.bind_slot(src_idx, sender);
        if pkt.dest != self.plr_self && pkt.dest != PlayerId::BROADCAST {
            return;
        }
        self.recv_local(pkt);
    }

    /// Deliver upward. The join acceptance is consumed here instead: it is
    /// addressed to the session itself, not the game.
    fn recv_local(&mut self, pkt: Packet) {
        if let PacketBody::JoinAccept {
            cookie,
            new_player,
            game_info,
        } = &pkt.body
        {
            if self.plr_self != PlayerId::BROADCAST {
                return;
            }
            if *cookie != self.cookie_self {
                warn!("join accept with a stale cookie, ignoring");
                return;
            }
            let Some(idx) = new_player.index() else {
                warn!("join accept assigned impossible id {new_player:?}");
                return;
            };
            self.plr_self = *new_player;
            self.connected[idx] = true;
            self.game_init_info = game_info.clone();
            debug!("joined '{}' as player {idx}", self.game_name);
            return;
        }
        self.inbox.push_back(pkt);
    }

    /// Admission, served by whoever receives the request (the joiner sent
    /// it to the master it discovered). The new peer gets the lowest vacant
    /// slot, the address of one existing peer to bootstrap its table, and
    /// the acceptance echoing its cookie; the existing peers get the joiner
    /// announced to them, and their traffic teaches the joiner the rest of
    /// the mesh. A full session stays silent.
    fn handle_join_request(&mut self, cookie: Cookie, sender: Endpoint) {
        let self_idx = self.plr_self.index();
        let slot = (0..MAX_PLAYERS)
            .find(|&i| Some(i) != self_idx && self.peers[i].is_none());
        let Some(new_idx) = slot else {
            debug!("session full, ignoring join request from {sender}");
            return;
        };
        self.bind_slot(new_idx, sender);

        // Announce the joiner to everyone already in the mesh.
        let announcement = Packet::new(
            PlayerId::MASTER,
            PlayerId::BROADCAST,
            PacketBody::ConnectInfo {
                new_player: PlayerId(new_idx as u8),
                peer_addr: sender.serialize(),
            },
        );
        let announcement = self.codec.encode(&announcement);
        for j in 0..MAX_PLAYERS {
            if Some(j) == self_idx || j == new_idx {
                continue;
            }
            if let Some(peer) = self.peers[j] {
                self.transport.send(peer, &announcement);
            }
        }

        // Forward one existing peer; the joiner learns the rest from their
        // traffic as it arrives.
        for j in 0..MAX_PLAYERS {
            if Some(j) == self_idx || j == new_idx {
                continue;
            }
            if let Some(peer_addr) = self.peers[j] {
                let info = Packet::new(
                    PlayerId::MASTER,
                    PlayerId::BROADCAST,
                    PacketBody::ConnectInfo {
                        new_player: PlayerId(j as u8),
                        peer_addr: peer_addr.serialize(),
                    },
                );
                let bytes = self.codec.encode(&info);
                self.transport.send(sender, &bytes);
                break;
            }
        }

        let accept = Packet::new(
            self.plr_self,
            PlayerId::BROADCAST,
            PacketBody::JoinAccept {
                cookie,
                new_player: PlayerId(new_idx as u8),
                game_info: self.game_init_info.clone(),
            },
        );
        let bytes = self.codec.encode(&accept);
        self.transport.send(sender, &bytes);
        debug!("admitted {sender} as player {new_idx}");
    }

    /// Discovery probe: only the master of a joined session answers, over
    /// OOB, with its game name.
    fn handle_info_request(&mut self, sender: Endpoint) {
        if self.plr_self == PlayerId::BROADCAST || self.master() != self.plr_self {
            return;
        }
        let reply = Packet::new(
            PlayerId::BROADCAST,
            PlayerId::MASTER,
            PacketBody::InfoReply {
                game_name: self.game_name.clone().into_bytes(),
            },
        );
        let bytes = self.codec.encode(&reply);
        self.transport.send_oob(sender, &bytes);
    }

    /// Discovery answer: the first master advertising our game name becomes
    /// the join target.
    fn handle_info_reply(&mut self, game_name: &[u8], sender: Endpoint) {
        if self.first_peer.is_none() && game_name == self.game_name.as_bytes() {
            debug!("found '{}' at {sender}", self.game_name);
            self.first_peer = Some(sender);
        }
    }

    fn handle_connect_info(&mut self, new_player: PlayerId, peer_addr: &[u8]) {
        let Some(idx) = new_player.index() else {
            warn!("peer announcement for impossible id {new_player:?}");
            return;
        };
        if Some(idx) == self.plr_self.index() {
            return;
        }
        match Endpoint::deserialize(peer_addr) {
            Ok(ep) => self.bind_slot(idx, ep),
            Err(e) => warn!("peer announcement with a bad address: {e}"),
        }
    }

    // -----------------------------------------------------------------
    // Peer table
    // -----------------------------------------------------------------

    fn slot_of(&self, ep: Endpoint) -> Option<usize> {
        (0..MAX_PLAYERS).find(|&i| self.peers[i] == Some(ep))
    }

    /// Put `ep` into `idx`, keeping the connected table in lockstep and
    /// evicting any stale slot that still holds the same endpoint.
    fn bind_slot(&mut self, idx: usize, ep: Endpoint) {
        for j in 0..MAX_PLAYERS {
            if j != idx && self.peers[j] == Some(ep) {
                self.peers[j] = None;
                self.connected[j] = self.plr_self.index() == Some(j);
            }
        }
        self.peers[idx] = Some(ep);
        self.connected[idx] = true;
    }

    fn clear_slot(&mut self, idx: usize) {
        self.peers[idx] = None;
        self.connected[idx] = self.plr_self.index() == Some(idx);
    }
}
