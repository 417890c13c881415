// Test-only harness for mesh session integration tests.
//
// Wraps a real `Session` (over the in-memory `LoopbackTransport` and the
// plaintext codec) in a thread-friendly shell: sessions that must react to
// other participants (answering discovery probes, serving admissions) get
// a background pump thread that calls `poll()` on a short cadence, while
// the session under test is driven synchronously from the test body.
//
// The only test-specific code is this pumping and the blocking wait
// helpers; discovery, admission, and routing all run the same code paths
// as the live game.
//
// See also: `tests/mesh_sessions.rs` for the scenarios.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use veilgate_net::transport::LoopbackNet;
use veilgate_net::{Session, SessionConfig, SessionError};
use veilgate_protocol::{Endpoint, Packet, PacketBody, PlainCodec, PlayerId, MAX_PLAYERS};

/// Default timeout for blocking wait operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Cadence of background pump threads and wait loops.
pub const PUMP_INTERVAL: Duration = Duration::from_millis(1);

/// Deterministic overlay address for simulated host `n`.
pub fn test_endpoint(n: u8) -> Endpoint {
    let mut octets = [0u8; 16];
    octets[0] = 0xfd;
    octets[15] = n;
    Endpoint::from_bytes(octets)
}

/// One simulated participant: a real session on the loopback mesh.
pub struct TestPeer {
    pub endpoint: Endpoint,
    session: Arc<Mutex<Session>>,
    pump: Option<PumpHandle>,
}

struct PumpHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TestPeer {
    pub fn new(net: &Arc<LoopbackNet>, n: u8) -> Self {
        Self::with_init_info(net, n, Vec::new())
    }

    /// Like [`new`](Self::new) but with a game-state blob the session hands
    /// to joiners when it serves as master.
    pub fn with_init_info(net: &Arc<LoopbackNet>, n: u8, game_init_info: Vec<u8>) -> Self {
        let endpoint = test_endpoint(n);
        let transport = net.attach(endpoint);
        let session = Session::new(
            Box::new(transport),
            Box::new(PlainCodec::new()),
            SessionConfig {
                game_init_info,
                // Keep the five-second bound but poll fast.
                wait_interval: PUMP_INTERVAL,
                ..SessionConfig::default()
            },
        );
        TestPeer {
            endpoint,
            session: Arc::new(Mutex::new(session)),
            pump: None,
        }
    }

    pub fn create(&self, game_name: &str, password: &str) -> PlayerId {
        self.session
            .lock()
            .unwrap()
            .create(game_name, password)
            .expect("create failed")
    }

    pub fn join(&self, game_name: &str, password: &str) -> PlayerId {
        self.try_join(game_name, password).expect("join failed")
    }

    pub fn try_join(&self, game_name: &str, password: &str) -> Result<PlayerId, SessionError> {
        self.session.lock().unwrap().join(game_name, password)
    }

    /// Start pumping this peer's session in the background so it reacts to
    /// discovery probes, join requests, and mesh traffic.
    pub fn start_pump(&mut self) {
        if self.pump.is_some() {
            return;
        }
        let keep_running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&keep_running);
        let session = Arc::clone(&self.session);
        let thread = thread::spawn(move || {
            while flag.load(Ordering::SeqCst) {
                session.lock().unwrap().poll();
                thread::sleep(PUMP_INTERVAL);
            }
        });
        self.pump = Some(PumpHandle {
            keep_running,
            thread: Some(thread),
        });
    }

    pub fn stop_pump(&mut self) {
        if let Some(mut pump) = self.pump.take() {
            pump.keep_running.store(false, Ordering::SeqCst);
            if let Some(thread) = pump.thread.take() {
                let _ = thread.join();
            }
        }
    }

    /// Run `f` against the locked session.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.session.lock().unwrap())
    }

    /// Broadcast an opaque application payload from this peer.
    pub fn broadcast(&self, payload: &[u8]) {
        self.with_session(|s| {
            let pkt = Packet::new(
                s.self_id(),
                PlayerId::BROADCAST,
                PacketBody::Message {
                    payload: payload.to_vec(),
                },
            );
            s.send(&pkt).expect("broadcast failed");
        });
    }

    /// Pump once and drain every queued application packet.
    pub fn drain_messages(&self) -> Vec<Packet> {
        self.with_session(|s| {
            s.poll();
            let mut out = Vec::new();
            while let Some(pkt) = s.take_message() {
                out.push(pkt);
            }
            out
        })
    }

    /// True once some drained packet carries `payload`.
    pub fn received_payload(&self, payload: &[u8]) -> bool {
        self.drain_messages().iter().any(|pkt| {
            matches!(&pkt.body, PacketBody::Message { payload: p } if p.as_slice() == payload)
        })
    }

    /// Blocking poll until `pred` holds, panicking after [`POLL_TIMEOUT`].
    pub fn wait_until(&self, what: &str, pred: impl Fn(&Session) -> bool) {
        let start = Instant::now();
        loop {
            let done = self.with_session(|s| {
                s.poll();
                pred(s)
            });
            if done {
                return;
            }
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            thread::sleep(PUMP_INTERVAL);
        }
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

/// Check the session-state invariants that must hold in every reachable
/// state: the own slot stays empty, the connected table mirrors the peer
/// table, endpoints are unique, and mastership is the lowest connected id.
pub fn assert_invariants(session: &Session) {
    let self_id = session.self_id();
    if self_id.is_real() {
        assert!(
            session.peer(self_id).is_none(),
            "own peer slot must stay empty"
        );
    }

    let mut seen = Vec::new();
    let mut lowest_connected = None;
    for i in 0..MAX_PLAYERS as u8 {
        let id = PlayerId(i);
        let occupied = session.peer(id).is_some();
        assert_eq!(
            session.is_connected(id),
            id == self_id || occupied,
            "connected table out of step at {i}"
        );
        if let Some(ep) = session.peer(id) {
            assert!(!seen.contains(&ep), "endpoint {ep} appears in two slots");
            seen.push(ep);
        }
        if session.is_connected(id) && lowest_connected.is_none() {
            lowest_connected = Some(id);
        }
    }

    if let Some(lowest) = lowest_connected {
        assert_eq!(session.master(), lowest, "master must be lowest connected id");
    }
}
