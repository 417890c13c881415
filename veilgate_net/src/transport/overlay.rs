// Socket driver for the virtual IPv6 overlay.
//
// Owns three kinds of socket: one listening TCP socket and one UDP socket,
// both bound to the overlay interface on the session port, plus one TCP
// stream per peer. Everything is non-blocking; each `recv` call performs a
// full tick (accept, drain send queues, pull readable bytes, one UDP
// datagram) and then returns the next complete packet, OOB first.
//
// Outbound connections are lazy: `send` only queues a frame, and the first
// drain attempt for a peer without a stream issues a non-blocking connect.
// The connect result is deliberately ignored. Queued sends retry every
// tick, and a connection that never materialises eventually fails a write,
// which retires the peer through `take_failed`.
//
// I/O errors on an established peer never escape this module: the peer is
// dropped, the endpoint recorded for `take_failed`, and the tick goes on.

use std::collections::{BTreeMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6, TcpListener, TcpStream, UdpSocket};

use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};

use veilgate_protocol::{Endpoint, FrameQueue, ProtocolError};

use super::Transport;

/// Well-known session port on the overlay.
pub const DEFAULT_PORT: u16 = 6112;

/// Link-scope multicast group the discovery probes go to.
pub const DISCOVERY_MULTICAST_ADDR: [u8; 16] = [
    0xff, 0x0e, 0, 0, 0, 0, 0, 0, 0x56, 0x45, 0x49, 0x4c, 0x47, 0x41, 0x54, 0x45,
];

/// Receive buffer for one socket read.
const PKTBUF_LEN: usize = 65536;

const LISTEN_BACKLOG: i32 = 10;

/// Overlay network handle: a ZeroTier-like library that brings up a virtual
/// IPv6 interface and then exposes ordinary sockets bound to it.
pub trait Overlay: Send {
    /// Begin bringing the overlay up. Called once, from the transport
    /// constructor.
    fn start(&mut self);

    /// True once the overlay interface is usable.
    fn ready(&self) -> bool;
}

#[derive(Default)]
struct PeerConn {
    stream: Option<TcpStream>,
    send_queue: VecDeque<Vec<u8>>,
    recv_queue: FrameQueue,
}

/// Transport over the virtual overlay.
pub struct OverlayTransport {
    overlay: Box<dyn Overlay>,
    port: u16,
    listener: Option<TcpListener>,
    udp: Option<UdpSocket>,
    peers: BTreeMap<Endpoint, PeerConn>,
    oob_queue: VecDeque<(Endpoint, Vec<u8>)>,
    failed: Vec<Endpoint>,
}

impl OverlayTransport {
    pub fn new(overlay: Box<dyn Overlay>) -> Self {
        Self::with_port(overlay, DEFAULT_PORT)
    }

    /// Use a non-standard port. Every instance in one session must agree on
    /// the port; this mainly exists for tests and local multi-instance runs.
    pub fn with_port(mut overlay: Box<dyn Overlay>, port: u16) -> Self {
        overlay.start();
        OverlayTransport {
            overlay,
            port,
            listener: None,
            udp: None,
            peers: BTreeMap::new(),
            oob_queue: VecDeque::new(),
            failed: Vec::new(),
        }
    }

    fn bind_udp(&self) -> Result<UdpSocket, ProtocolError> {
        let socket =
            Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).map_err(ProtocolError::Bind)?;
        socket.set_reuse_address(true).map_err(ProtocolError::Bind)?;
        let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, self.port, 0, 0);
        socket.bind(&SocketAddr::V6(addr).into()).map_err(ProtocolError::Bind)?;
        socket.set_nonblocking(true).map_err(ProtocolError::Bind)?;
        let udp: UdpSocket = socket.into();
        let group = Ipv6Addr::from(DISCOVERY_MULTICAST_ADDR);
        if let Err(e) = udp.join_multicast_v6(&group, 0) {
            // Discovery still works for directed probes; only the multicast
            // listen side is degraded.
            warn!("joining discovery multicast group failed: {e}");
        }
        Ok(udp)
    }

    fn bind_listener(&self) -> Result<TcpListener, ProtocolError> {
        let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))
            .map_err(ProtocolError::Bind)?;
        socket.set_reuse_address(true).map_err(ProtocolError::Bind)?;
        let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, self.port, 0, 0);
        socket.bind(&SocketAddr::V6(addr).into()).map_err(ProtocolError::Bind)?;
        socket.listen(LISTEN_BACKLOG).map_err(ProtocolError::Listen)?;
        socket.set_nonblocking(true).map_err(ProtocolError::Bind)?;
        Ok(socket.into())
    }

    fn accept_all(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let SocketAddr::V6(addr) = addr else {
                        continue;
                    };
                    let ep = Endpoint::from(*addr.ip());
                    if stream.set_nonblocking(true).is_err() || stream.set_nodelay(true).is_err() {
                        continue;
                    }
                    let conn = self.peers.entry(ep).or_default();
                    if conn.stream.is_some() {
                        warn!("accept from {ep}: overwriting existing connection");
                    }
                    conn.stream = Some(stream);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    /// Drain every peer's send queue as far as the sockets allow.
    fn drain_send_queues(&mut self) {
        let mut dead = Vec::new();
        for (ep, conn) in self.peers.iter_mut() {
            if let Err(e) = drain_peer(conn, *ep, self.port) {
                debug!("send to {ep} failed: {e}");
                dead.push(*ep);
            }
        }
        for ep in dead {
            self.drop_peer(ep);
        }
    }

    /// Pull all readable bytes from every peer stream into its frame queue.
    fn recv_from_peers(&mut self) {
        let mut dead = Vec::new();
        let mut buf = [0u8; PKTBUF_LEN];
        for (ep, conn) in self.peers.iter_mut() {
            let Some(stream) = conn.stream.as_mut() else {
                continue;
            };
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => {
                        debug!("peer {ep} closed the connection");
                        dead.push(*ep);
                        break;
                    }
                    Ok(n) => conn.recv_queue.write(&buf[..n]),
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(ref e) if e.kind() == ErrorKind::NotConnected => break,
                    Err(e) => {
                        debug!("recv from {ep} failed: {e}");
                        dead.push(*ep);
                        break;
                    }
                }
            }
        }
        for ep in dead {
            self.drop_peer(ep);
        }
    }

    /// Read at most one pending datagram per tick, so OOB traffic cannot
    /// starve the in-band streams.
    fn recv_from_udp(&mut self) {
        let Some(udp) = &self.udp else {
            return;
        };
        let mut buf = [0u8; PKTBUF_LEN];
        match udp.recv_from(&mut buf) {
            Ok((n, SocketAddr::V6(addr))) => {
                let ep = Endpoint::from(*addr.ip());
                self.oob_queue.push_back((ep, buf[..n].to_vec()));
            }
            Ok(_) | Err(_) => {}
        }
    }

    fn drop_peer(&mut self, peer: Endpoint) {
        if self.peers.remove(&peer).is_some() {
            self.failed.push(peer);
        }
    }
}

impl Transport for OverlayTransport {
    fn network_online(&mut self) -> Result<bool, ProtocolError> {
        if !self.overlay.ready() {
            return Ok(false);
        }
        if self.udp.is_none() {
            self.udp = Some(self.bind_udp()?);
        }
        if self.listener.is_none() {
            self.listener = Some(self.bind_listener()?);
        }
        Ok(true)
    }

    fn send(&mut self, peer: Endpoint, data: &[u8]) -> bool {
        match FrameQueue::make_frame(data) {
            Ok(frame) => {
                self.peers.entry(peer).or_default().send_queue.push_back(frame);
                true
            }
            Err(e) => {
                warn!("dropping unframeable payload for {peer}: {e}");
                false
            }
        }
    }

    fn send_oob(&mut self, peer: Endpoint, data: &[u8]) {
        let Some(udp) = &self.udp else {
            return;
        };
        let addr = SocketAddrV6::new(peer.to_ipv6(), self.port, 0, 0);
        if let Err(e) = udp.send_to(data, addr) {
            debug!("oob send to {peer} failed: {e}");
        }
    }

    fn send_oob_mc(&mut self, data: &[u8]) {
        self.send_oob(Endpoint::from_bytes(DISCOVERY_MULTICAST_ADDR), data);
    }

    fn recv(&mut self) -> Option<(Endpoint, Vec<u8>)> {
        self.accept_all();
        self.drain_send_queues();
        self.recv_from_peers();
        self.recv_from_udp();

        if let Some(item) = self.oob_queue.pop_front() {
            return Some(item);
        }

        let mut poisoned = None;
        for (ep, conn) in self.peers.iter_mut() {
            if !conn.recv_queue.packet_ready() {
                continue;
            }
            match conn.recv_queue.read_packet() {
                Ok(data) => return Some((*ep, data)),
                Err(e) => {
                    warn!("corrupt stream from {ep}: {e}");
                    poisoned = Some(*ep);
                    break;
                }
            }
        }
        if let Some(ep) = poisoned {
            self.drop_peer(ep);
        }
        None
    }

    fn take_failed(&mut self) -> Vec<Endpoint> {
        std::mem::take(&mut self.failed)
    }

    fn disconnect(&mut self, peer: Endpoint) {
        // Dropping the PeerConn closes its stream.
        self.peers.remove(&peer);
    }
}

/// Write out as much of one peer's queue as the socket accepts. A partial
/// write leaves the unsent suffix at the head of the queue.
fn drain_peer(conn: &mut PeerConn, peer: Endpoint, port: u16) -> std::io::Result<()> {
    if conn.send_queue.is_empty() {
        return Ok(());
    }
    if conn.stream.is_none() {
        conn.stream = Some(lazy_connect(peer, port)?);
    }
    let Some(stream) = conn.stream.as_mut() else {
        return Ok(());
    };
    while let Some(front) = conn.send_queue.front_mut() {
        match stream.write(front) {
            Ok(n) if n < front.len() => {
                front.drain(..n);
                return Ok(());
            }
            Ok(_) => {
                conn.send_queue.pop_front();
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(ref e) if e.kind() == ErrorKind::NotConnected => return Ok(()),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Open a non-blocking stream towards `peer` and start connecting. The
/// connect is not awaited; callers retry their writes on later ticks.
fn lazy_connect(peer: Endpoint, port: u16) -> std::io::Result<TcpStream> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    let addr = SocketAddrV6::new(peer.to_ipv6(), port, 0, 0);
    // In-progress is the expected outcome of a non-blocking connect; real
    // failures surface on the first write.
    let _ = socket.connect(&SocketAddr::V6(addr).into());
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticOverlay {
        ready: bool,
    }

    impl Overlay for StaticOverlay {
        fn start(&mut self) {}
        fn ready(&self) -> bool {
            self.ready
        }
    }

    fn online_transport() -> OverlayTransport {
        // Port 0 keeps parallel test runs from colliding.
        OverlayTransport::with_port(Box::new(StaticOverlay { ready: true }), 0)
    }

    #[test]
    fn offline_overlay_reports_offline_without_binding() {
        let mut t = OverlayTransport::with_port(Box::new(StaticOverlay { ready: false }), 0);
        assert!(!t.network_online().unwrap());
        assert!(t.udp.is_none());
        assert!(t.listener.is_none());
    }

    #[test]
    fn network_online_binds_once_and_is_idempotent() {
        let mut t = online_transport();
        assert!(t.network_online().unwrap());
        assert!(t.udp.is_some());
        assert!(t.listener.is_some());
        assert!(t.network_online().unwrap());
    }

    #[test]
    fn send_queues_one_frame() {
        let mut t = online_transport();
        let peer = Endpoint::parse("fd00::5").unwrap();
        assert!(t.send(peer, b"payload"));
        let conn = t.peers.get(&peer).unwrap();
        assert_eq!(conn.send_queue.len(), 1);
        assert_eq!(
            conn.send_queue.front().unwrap().as_slice(),
            FrameQueue::make_frame(b"payload").unwrap().as_slice()
        );
    }

    #[test]
    fn oversized_payload_is_refused() {
        let mut t = online_transport();
        let peer = Endpoint::parse("fd00::6").unwrap();
        assert!(!t.send(peer, &vec![0u8; veilgate_protocol::MAX_FRAME_LEN + 1]));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut t = online_transport();
        let peer = Endpoint::parse("fd00::7").unwrap();
        t.send(peer, b"x");
        t.disconnect(peer);
        t.disconnect(peer);
        assert!(t.peers.is_empty());
        // Explicit disconnects are not failures.
        assert!(t.take_failed().is_empty());
    }

    #[test]
    fn default_game_name_uses_the_alphabet() {
        let t = online_transport();
        let name = t.default_game_name();
        assert_eq!(name.len(), 5);
        assert!(name.bytes().all(|b| super::super::GAME_NAME_ALPHABET.contains(&b)));
    }
}
