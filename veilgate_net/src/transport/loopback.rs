// In-memory mesh transport.
//
// `LoopbackNet` is a process-local stand-in for the overlay: every attached
// endpoint gets a node holding its OOB datagram queue and one frame queue
// per inbound link. `send` runs the payload through the real wire framing,
// so reassembly is exercised end-to-end even without sockets.
//
// Test hooks mirror the failure modes the socket driver produces: a node
// can be taken offline before bring-up (`set_online`) and a live node can
// be killed mid-session (`kill`), which surfaces on every linked survivor
// as a `take_failed` entry, the same signal a dead TCP connection would
// produce.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use veilgate_protocol::{Endpoint, FrameQueue, ProtocolError};

use super::Transport;

#[derive(Default)]
struct Node {
    online: bool,
    oob: VecDeque<(Endpoint, Vec<u8>)>,
    /// Inbound byte streams, one per connected sender.
    streams: BTreeMap<Endpoint, FrameQueue>,
    /// Endpoints this node has a live connection with.
    links: BTreeSet<Endpoint>,
    failed: Vec<Endpoint>,
}

#[derive(Default)]
struct NetInner {
    nodes: BTreeMap<Endpoint, Node>,
}

/// Shared in-memory network. Attach one transport per simulated host.
#[derive(Default)]
pub struct LoopbackNet {
    inner: Mutex<NetInner>,
}

impl LoopbackNet {
    pub fn new() -> Arc<LoopbackNet> {
        Arc::new(LoopbackNet::default())
    }

    /// Register `endpoint` and hand back its transport. Re-attaching an
    /// endpoint resets its node.
    pub fn attach(self: &Arc<Self>, endpoint: Endpoint) -> LoopbackTransport {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(
            endpoint,
            Node {
                online: true,
                ..Node::default()
            },
        );
        LoopbackTransport {
            net: Arc::clone(self),
            local: endpoint,
        }
    }

    /// Toggle a node's "overlay ready" state.
    pub fn set_online(&self, endpoint: Endpoint, online: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(node) = inner.nodes.get_mut(&endpoint) {
            node.online = online;
        }
    }

    /// Remove a node abruptly. Every survivor that had a connection to it
    /// observes the loss as a transport failure.
    pub fn kill(&self, endpoint: Endpoint) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.remove(&endpoint);
        for node in inner.nodes.values_mut() {
            let linked = node.links.remove(&endpoint);
            let streamed = node.streams.remove(&endpoint).is_some();
            if linked || streamed {
                node.failed.push(endpoint);
            }
        }
    }
}

/// One host's view of a [`LoopbackNet`].
pub struct LoopbackTransport {
    net: Arc<LoopbackNet>,
    local: Endpoint,
}

impl LoopbackTransport {
    pub fn endpoint(&self) -> Endpoint {
        self.local
    }
}

impl Transport for LoopbackTransport {
    fn network_online(&mut self) -> Result<bool, ProtocolError> {
        let inner = self.net.inner.lock().unwrap();
        Ok(inner.nodes.get(&self.local).is_some_and(|n| n.online))
    }

    fn send(&mut self, peer: Endpoint, data: &[u8]) -> bool {
        let Ok(frame) = FrameQueue::make_frame(data) else {
            return false;
        };
        let mut inner = self.net.inner.lock().unwrap();
        let local = self.local;
        match inner.nodes.get_mut(&peer) {
            Some(node) => {
                node.streams.entry(local).or_default().write(&frame);
                node.links.insert(local);
            }
            None => {
                // Connection refused: the peer is gone.
                if let Some(me) = inner.nodes.get_mut(&local) {
                    if me.links.remove(&peer) || !me.failed.contains(&peer) {
                        me.failed.push(peer);
                    }
                    me.streams.remove(&peer);
                }
                return true;
            }
        }
        if let Some(me) = inner.nodes.get_mut(&local) {
            me.links.insert(peer);
        }
        true
    }

    fn send_oob(&mut self, peer: Endpoint, data: &[u8]) {
        let mut inner = self.net.inner.lock().unwrap();
        let local = self.local;
        if let Some(node) = inner.nodes.get_mut(&peer) {
            node.oob.push_back((local, data.to_vec()));
        }
    }

    fn send_oob_mc(&mut self, data: &[u8]) {
        let mut inner = self.net.inner.lock().unwrap();
        let local = self.local;
        for (ep, node) in inner.nodes.iter_mut() {
            if *ep != local {
                node.oob.push_back((local, data.to_vec()));
            }
        }
    }

    fn recv(&mut self) -> Option<(Endpoint, Vec<u8>)> {
        let mut inner = self.net.inner.lock().unwrap();
        let node = inner.nodes.get_mut(&self.local)?;

        if let Some(item) = node.oob.pop_front() {
            return Some(item);
        }

        let mut poisoned = None;
        for (sender, stream) in node.streams.iter_mut() {
            if !stream.packet_ready() {
                continue;
            }
            match stream.read_packet() {
                Ok(data) => return Some((*sender, data)),
                Err(_) => {
                    poisoned = Some(*sender);
                    break;
                }
            }
        }
        if let Some(sender) = poisoned {
            node.streams.remove(&sender);
            node.links.remove(&sender);
            node.failed.push(sender);
        }
        None
    }

    fn take_failed(&mut self) -> Vec<Endpoint> {
        let mut inner = self.net.inner.lock().unwrap();
        match inner.nodes.get_mut(&self.local) {
            Some(node) => std::mem::take(&mut node.failed),
            None => Vec::new(),
        }
    }

    fn disconnect(&mut self, peer: Endpoint) {
        let mut inner = self.net.inner.lock().unwrap();
        let local = self.local;
        if let Some(me) = inner.nodes.get_mut(&local) {
            me.links.remove(&peer);
            me.streams.remove(&peer);
        }
        // The far side sees the close as a dead connection.
        if let Some(them) = inner.nodes.get_mut(&peer) {
            if them.links.remove(&local) | them.streams.remove(&local).is_some() {
                them.failed.push(local);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(n: u8) -> Endpoint {
        let mut octets = [0u8; 16];
        octets[0] = 0xfd;
        octets[15] = n;
        Endpoint::from_bytes(octets)
    }

    #[test]
    fn oob_is_returned_before_in_band() {
        let net = LoopbackNet::new();
        let mut a = net.attach(ep(1));
        let mut b = net.attach(ep(2));

        a.send(ep(2), b"stream");
        a.send_oob(ep(2), b"datagram");

        let (from, data) = b.recv().unwrap();
        assert_eq!(from, ep(1));
        assert_eq!(data, b"datagram");

        let (from, data) = b.recv().unwrap();
        assert_eq!(from, ep(1));
        assert_eq!(data, b"stream");

        assert!(b.recv().is_none());
    }

    #[test]
    fn per_peer_delivery_is_fifo() {
        let net = LoopbackNet::new();
        let mut a = net.attach(ep(1));
        let mut b = net.attach(ep(2));

        for payload in [&b"one"[..], b"two", b"three"] {
            a.send(ep(2), payload);
        }
        assert_eq!(b.recv().unwrap().1, b"one");
        assert_eq!(b.recv().unwrap().1, b"two");
        assert_eq!(b.recv().unwrap().1, b"three");
    }

    #[test]
    fn multicast_reaches_everyone_but_the_sender() {
        let net = LoopbackNet::new();
        let mut a = net.attach(ep(1));
        let mut b = net.attach(ep(2));
        let mut c = net.attach(ep(3));

        a.send_oob_mc(b"probe");
        assert_eq!(b.recv().unwrap(), (ep(1), b"probe".to_vec()));
        assert_eq!(c.recv().unwrap(), (ep(1), b"probe".to_vec()));
        assert!(a.recv().is_none());
    }

    #[test]
    fn kill_surfaces_as_failure_on_linked_peers() {
        let net = LoopbackNet::new();
        let mut a = net.attach(ep(1));
        let mut b = net.attach(ep(2));

        a.send(ep(2), b"hello");
        b.recv();
        assert!(a.take_failed().is_empty());

        net.kill(ep(2));
        assert_eq!(a.take_failed(), vec![ep(2)]);
        // Drained: the failure is reported once.
        assert!(a.take_failed().is_empty());
        // Sends to the dead endpoint keep reporting it.
        a.send(ep(2), b"into the void");
        assert_eq!(a.take_failed(), vec![ep(2)]);
    }

    #[test]
    fn disconnect_notifies_the_far_side() {
        let net = LoopbackNet::new();
        let mut a = net.attach(ep(1));
        let mut b = net.attach(ep(2));

        a.send(ep(2), b"hello");
        assert!(b.recv().is_some());

        a.disconnect(ep(2));
        assert_eq!(b.take_failed(), vec![ep(1)]);
        assert!(a.take_failed().is_empty());
    }

    #[test]
    fn offline_node_reports_offline() {
        let net = LoopbackNet::new();
        let mut a = net.attach(ep(1));
        assert!(a.network_online().unwrap());
        net.set_online(ep(1), false);
        assert!(!a.network_online().unwrap());
    }
}
