//! Host-relay session transport.
//!
//! One participant hosts; everyone else connects to the host. The host
//! relays every data message to all peers except its sender, which gives
//! the session a star topology with eventual consistency and no direct
//! peer-to-peer links:
//!
//! ```text
//!  Peer A ──┐                 ┌── Peer C
//!            ├──── Host ──────┤
//!  Peer B ──┘      │          └── Peer D
//!                  ▼
//!        relay Data(X) to all except X
//! ```
//!
//! The transport itself performs no I/O: packet delivery is an external
//! collaborator behind the [`PacketSocket`] trait, assumed to provide
//! reliable, ordered, fragmentable delivery plus connect/disconnect events.
//! Everything here runs on a single cooperative tick thread — `tick()` is
//! called once per frame, drains the socket until it is empty, and
//! dispatches inbound payloads to the registered variables by leading id.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::wire::{self, VariableId, WireError};

/// Opaque identifier of a connected endpoint, unique within a session.
pub type PeerId = u64;

/// Events surfaced by the external packet layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A peer connected (on a client: the host connection came up).
    Connected(PeerId),
    /// A peer disconnected or timed out.
    Disconnected(PeerId),
    /// A data message arrived from a peer.
    Data(PeerId, Vec<u8>),
}

/// Addressing for outbound sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    /// Every connected peer.
    All,
    /// One specific peer.
    Peer(PeerId),
    /// Every connected peer except one (the relay primitive).
    AllExcept(PeerId),
}

/// The external packet-delivery collaborator.
///
/// Implementations must deliver sends reliably and in order, fragment large
/// payloads transparently, and surface results only through the
/// non-blocking [`poll`](PacketSocket::poll) call.
pub trait PacketSocket {
    fn listen(&mut self, port: u16) -> Result<(), SessionError>;
    fn connect(&mut self, address: &str) -> Result<(), SessionError>;
    fn shutdown(&mut self);
    fn is_running(&self) -> bool;
    /// Next pending event, or `None` when the queue is empty. Never blocks.
    fn poll(&mut self) -> Option<SocketEvent>;
    fn send(&mut self, target: SendTarget, bytes: &[u8]);
}

/// Shared handle to the socket; the transport and every replicated
/// variable send through the same one.
pub type SharedSocket = Rc<RefCell<dyn PacketSocket>>;

/// Session lifecycle. `Disconnected` is terminal until an explicit
/// restart via [`SessionTransport::stop`] + `host`/`join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Hosting,
    Connecting,
    Connected,
    Disconnected,
}

/// Events emitted by [`SessionTransport::tick`] for the session layer
/// (spawn registries, UI) to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    /// A client lost its connection to the host; the session is over and
    /// all replicated objects should be torn down.
    HostLost,
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A variable id is already bound. Registration happens at
    /// construction time, so this is a programmer error — fail fast.
    DuplicateId(VariableId),
    /// The underlying packet layer refused to start.
    Socket(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "variable id {id} is already in use"),
            Self::Socket(e) => write!(f, "packet socket error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Anything that can consume an inbound `[id][payload]` message.
///
/// Implemented by `SyncVar`; the id header is still present so targets can
/// reuse the plain message decoders.
pub trait NetTarget {
    fn receive_message(&mut self, bytes: &[u8]) -> Result<(), WireError>;
}

/// Transport tuning knobs.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Minimum interval between full inbound drains. Calls to `tick()`
    /// inside the window return no events without polling.
    pub tick_interval: Duration,
    /// Soft per-tick processing budget; exceeding it logs a warning.
    pub tick_budget: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            // ~60 Hz
            tick_interval: Duration::from_micros(16_667),
            tick_budget: Duration::from_millis(2),
        }
    }
}

/// Transport statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    pub messages_received: u64,
    pub messages_relayed: u64,
    /// Inbound messages with no registered variable or an undecodable id.
    pub messages_dropped: u64,
}

/// The variable registry: id → weakly-held receive target.
///
/// Entries are weak so that dropping a variable unbinds it; dead entries
/// are pruned lazily on lookup.
#[derive(Default)]
struct Registry {
    targets: HashMap<VariableId, Weak<RefCell<dyn NetTarget>>>,
}

impl Registry {
    fn bind(
        &mut self,
        id: VariableId,
        target: &Rc<RefCell<dyn NetTarget>>,
    ) -> Result<(), SessionError> {
        if let Some(existing) = self.targets.get(&id) {
            if existing.strong_count() > 0 {
                return Err(SessionError::DuplicateId(id));
            }
        }
        self.targets.insert(id, Rc::downgrade(target));
        Ok(())
    }

    fn unbind(&mut self, id: VariableId) {
        self.targets.remove(&id);
    }

    fn lookup(&mut self, id: VariableId) -> Option<Rc<RefCell<dyn NetTarget>>> {
        match self.targets.get(&id) {
            Some(weak) => match weak.upgrade() {
                Some(target) => Some(target),
                None => {
                    self.targets.remove(&id);
                    None
                }
            },
            None => None,
        }
    }
}

/// Cloneable handle used by replicated variables: bind/unbind against the
/// registry and send through the shared socket. Injected explicitly into
/// every dependent — there is no process-wide transport singleton.
#[derive(Clone)]
pub struct SessionHandle {
    registry: Rc<RefCell<Registry>>,
    socket: SharedSocket,
}

impl SessionHandle {
    /// Bind `target` to `id`. Fails fast on a live duplicate binding.
    pub fn bind(
        &self,
        id: VariableId,
        target: &Rc<RefCell<dyn NetTarget>>,
    ) -> Result<(), SessionError> {
        self.registry.borrow_mut().bind(id, target)
    }

    /// Unbind `id`. Idempotent.
    pub fn unbind(&self, id: VariableId) {
        self.registry.borrow_mut().unbind(id);
    }

    /// Broadcast a pre-encoded message to every connected peer.
    pub fn send_to_all(&self, bytes: &[u8]) {
        self.socket.borrow_mut().send(SendTarget::All, bytes);
    }
}

/// The session transport: role + lifecycle + per-tick inbound pump.
pub struct SessionTransport {
    handle: SessionHandle,
    state: SessionState,
    is_host: bool,
    host_peer: Option<PeerId>,
    peers: HashSet<PeerId>,
    config: TransportConfig,
    last_tick: Option<Instant>,
    stats: TransportStats,
}

impl SessionTransport {
    pub fn new(socket: SharedSocket) -> Self {
        Self::with_config(socket, TransportConfig::default())
    }

    pub fn with_config(socket: SharedSocket, config: TransportConfig) -> Self {
        Self {
            handle: SessionHandle { registry: Rc::new(RefCell::new(Registry::default())), socket },
            state: SessionState::Idle,
            is_host: false,
            host_peer: None,
            peers: HashSet::new(),
            config,
            last_tick: None,
            stats: TransportStats::default(),
        }
    }

    /// Cloneable handle for constructing replicated variables.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn peers(&self) -> &HashSet<PeerId> {
        &self.peers
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Open a listening endpoint and become the session host.
    pub fn host(&mut self, port: u16) -> Result<(), SessionError> {
        self.teardown();
        self.handle.socket.borrow_mut().listen(port)?;
        self.is_host = true;
        self.state = SessionState::Hosting;
        log::info!("hosting session on port {port}");
        Ok(())
    }

    /// Connect to a session host.
    pub fn join(&mut self, address: &str) -> Result<(), SessionError> {
        self.teardown();
        self.handle.socket.borrow_mut().connect(address)?;
        self.is_host = false;
        self.state = SessionState::Connecting;
        log::info!("joining session at {address}");
        Ok(())
    }

    /// Stop the session and return to `Idle`. Connection and peer state is
    /// cleared synchronously; unacknowledged in-flight sends are abandoned.
    pub fn stop(&mut self) {
        self.teardown();
        self.state = SessionState::Idle;
    }

    fn teardown(&mut self) {
        self.handle.socket.borrow_mut().shutdown();
        self.peers.clear();
        self.host_peer = None;
        self.is_host = false;
    }

    /// Register a receive target at `id`.
    pub fn register(
        &self,
        id: VariableId,
        target: &Rc<RefCell<dyn NetTarget>>,
    ) -> Result<(), SessionError> {
        self.handle.bind(id, target)
    }

    /// Unregister `id`. Idempotent.
    pub fn unregister(&self, id: VariableId) {
        self.handle.unbind(id);
    }

    /// Send to every connected peer.
    pub fn send_to_all(&self, bytes: &[u8]) {
        self.handle.socket.borrow_mut().send(SendTarget::All, bytes);
    }

    /// Send to a single peer.
    pub fn send_to_peer(&self, peer: PeerId, bytes: &[u8]) {
        self.handle.socket.borrow_mut().send(SendTarget::Peer(peer), bytes);
    }

    /// Send to every connected peer except `peer`.
    pub fn send_except(&self, peer: PeerId, bytes: &[u8]) {
        self.handle.socket.borrow_mut().send(SendTarget::AllExcept(peer), bytes);
    }

    /// Drain all pending inbound events and dispatch them.
    ///
    /// Runs at most once per configured tick interval; earlier calls
    /// return no events. An unconnected session yields zero events rather
    /// than stalling, and no call here ever blocks on the network.
    pub fn tick(&mut self) -> Vec<SessionEvent> {
        if let Some(last) = self.last_tick {
            if last.elapsed() < self.config.tick_interval {
                return Vec::new();
            }
        }
        self.last_tick = Some(Instant::now());

        let started = Instant::now();
        let mut events = Vec::new();

        loop {
            let event = self.handle.socket.borrow_mut().poll();
            match event {
                None => break,
                Some(SocketEvent::Connected(peer)) => {
                    self.peers.insert(peer);
                    if !self.is_host && self.state == SessionState::Connecting {
                        self.host_peer = Some(peer);
                        self.state = SessionState::Connected;
                    }
                    events.push(SessionEvent::PeerConnected(peer));
                }
                Some(SocketEvent::Disconnected(peer)) => {
                    self.peers.remove(&peer);
                    events.push(SessionEvent::PeerDisconnected(peer));
                    if self.host_peer == Some(peer) {
                        // The host is gone; the session is over.
                        self.handle.socket.borrow_mut().shutdown();
                        self.peers.clear();
                        self.host_peer = None;
                        self.state = SessionState::Disconnected;
                        events.push(SessionEvent::HostLost);
                    }
                }
                Some(SocketEvent::Data(from, bytes)) => {
                    self.stats.messages_received += 1;
                    if self.is_host {
                        // Relay verbatim before local dispatch, never back
                        // to the sender.
                        self.handle.socket.borrow_mut().send(SendTarget::AllExcept(from), &bytes);
                        self.stats.messages_relayed += 1;
                    }
                    self.dispatch(&bytes);
                }
            }
        }

        let elapsed = started.elapsed();
        if elapsed > self.config.tick_budget {
            log::warn!("slow transport tick: {elapsed:?} (budget {:?})", self.config.tick_budget);
        }

        events
    }

    /// Route one inbound message to the variable registered at its leading
    /// id. A failure here affects only this message.
    fn dispatch(&mut self, bytes: &[u8]) {
        let id = match wire::peek_id(bytes) {
            Ok(id) => id,
            Err(e) => {
                self.stats.messages_dropped += 1;
                log::warn!("dropping inbound message with unreadable id: {e}");
                return;
            }
        };

        let target = self.handle.registry.borrow_mut().lookup(id);
        match target {
            Some(target) => {
                if let Err(e) = target.borrow_mut().receive_message(bytes) {
                    self.stats.messages_dropped += 1;
                    log::warn!("dropping undecodable message for variable {id}: {e}");
                }
            }
            None => {
                self.stats.messages_dropped += 1;
                log::debug!("no variable registered at id {id}, dropping message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted socket: events are queued by the test, sends are recorded.
    #[derive(Default)]
    struct ScriptedSocket {
        running: bool,
        inbox: std::collections::VecDeque<SocketEvent>,
        sent: Vec<(SendTarget, Vec<u8>)>,
    }

    impl PacketSocket for ScriptedSocket {
        fn listen(&mut self, _port: u16) -> Result<(), SessionError> {
            self.running = true;
            Ok(())
        }
        fn connect(&mut self, _address: &str) -> Result<(), SessionError> {
            self.running = true;
            Ok(())
        }
        fn shutdown(&mut self) {
            self.running = false;
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn poll(&mut self) -> Option<SocketEvent> {
            self.inbox.pop_front()
        }
        fn send(&mut self, target: SendTarget, bytes: &[u8]) {
            self.sent.push((target, bytes.to_vec()));
        }
    }

    struct Recorder(Vec<Vec<u8>>);

    impl NetTarget for Recorder {
        fn receive_message(&mut self, bytes: &[u8]) -> Result<(), WireError> {
            self.0.push(bytes.to_vec());
            Ok(())
        }
    }

    fn instant_config() -> TransportConfig {
        TransportConfig { tick_interval: Duration::ZERO, ..TransportConfig::default() }
    }

    fn scripted_transport() -> (Rc<RefCell<ScriptedSocket>>, SessionTransport) {
        let socket = Rc::new(RefCell::new(ScriptedSocket::default()));
        let transport = SessionTransport::with_config(socket.clone(), instant_config());
        (socket, transport)
    }

    #[test]
    fn test_state_machine() {
        let (_, mut transport) = scripted_transport();
        assert_eq!(transport.state(), SessionState::Idle);

        transport.host(4000).unwrap();
        assert_eq!(transport.state(), SessionState::Hosting);
        assert!(transport.is_host());

        transport.stop();
        assert_eq!(transport.state(), SessionState::Idle);
        assert!(!transport.is_host());

        transport.join("10.0.0.1:4000").unwrap();
        assert_eq!(transport.state(), SessionState::Connecting);
    }

    #[test]
    fn test_client_connects_then_loses_host() {
        let (socket, mut transport) = scripted_transport();
        transport.join("10.0.0.1:4000").unwrap();

        socket.borrow_mut().inbox.push_back(SocketEvent::Connected(1));
        let events = transport.tick();
        assert_eq!(events, vec![SessionEvent::PeerConnected(1)]);
        assert_eq!(transport.state(), SessionState::Connected);
        assert!(transport.peers().contains(&1));

        socket.borrow_mut().inbox.push_back(SocketEvent::Disconnected(1));
        let events = transport.tick();
        assert_eq!(events, vec![SessionEvent::PeerDisconnected(1), SessionEvent::HostLost]);
        assert_eq!(transport.state(), SessionState::Disconnected);
        assert!(transport.peers().is_empty());
    }

    #[test]
    fn test_peer_disconnect_on_host_is_not_fatal() {
        let (socket, mut transport) = scripted_transport();
        transport.host(4000).unwrap();

        socket.borrow_mut().inbox.push_back(SocketEvent::Connected(7));
        socket.borrow_mut().inbox.push_back(SocketEvent::Disconnected(7));
        let events = transport.tick();

        assert_eq!(
            events,
            vec![SessionEvent::PeerConnected(7), SessionEvent::PeerDisconnected(7)]
        );
        assert_eq!(transport.state(), SessionState::Hosting);
    }

    #[test]
    fn test_host_relays_to_all_except_sender() {
        let (socket, mut transport) = scripted_transport();
        transport.host(4000).unwrap();

        let message = wire::encode(55, &123_i32);
        socket.borrow_mut().inbox.push_back(SocketEvent::Data(3, message.clone()));
        transport.tick();

        let sent = socket.borrow().sent.clone();
        assert_eq!(sent, vec![(SendTarget::AllExcept(3), message)]);
        assert_eq!(transport.stats().messages_relayed, 1);
    }

    #[test]
    fn test_client_never_relays() {
        let (socket, mut transport) = scripted_transport();
        transport.join("10.0.0.1:4000").unwrap();

        socket.borrow_mut().inbox.push_back(SocketEvent::Connected(1));
        socket.borrow_mut().inbox.push_back(SocketEvent::Data(1, wire::encode(55, &1_i32)));
        transport.tick();

        assert!(socket.borrow().sent.is_empty());
        assert_eq!(transport.stats().messages_relayed, 0);
    }

    #[test]
    fn test_dispatch_routes_by_leading_id() {
        let (socket, mut transport) = scripted_transport();
        transport.host(4000).unwrap();

        let recorder = Rc::new(RefCell::new(Recorder(Vec::new())));
        let target: Rc<RefCell<dyn NetTarget>> = recorder.clone();
        transport.register(9, &target).unwrap();

        let matching = wire::encode(9, &1_i32);
        let unmatched = wire::encode(10, &2_i32);
        socket.borrow_mut().inbox.push_back(SocketEvent::Data(2, matching.clone()));
        socket.borrow_mut().inbox.push_back(SocketEvent::Data(2, unmatched));
        transport.tick();

        assert_eq!(recorder.borrow().0, vec![matching]);
        assert_eq!(transport.stats().messages_dropped, 1);
    }

    struct Decoding(Vec<i32>);

    impl NetTarget for Decoding {
        fn receive_message(&mut self, bytes: &[u8]) -> Result<(), WireError> {
            let (_, value) = wire::decode::<i32>(bytes)?;
            self.0.push(value);
            Ok(())
        }
    }

    #[test]
    fn test_decode_failure_drops_only_that_message() {
        let (socket, mut transport) = scripted_transport();
        transport.host(4000).unwrap();

        let decoding = Rc::new(RefCell::new(Decoding(Vec::new())));
        let target: Rc<RefCell<dyn NetTarget>> = decoding.clone();
        transport.register(9, &target).unwrap();

        let mut truncated = wire::encode(9, &7_i32);
        truncated.truncate(6);
        let valid = wire::encode(9, &8_i32);
        socket.borrow_mut().inbox.push_back(SocketEvent::Data(2, truncated));
        socket.borrow_mut().inbox.push_back(SocketEvent::Data(2, valid));
        transport.tick();

        assert_eq!(decoding.borrow().0, vec![8], "the valid message still arrives");
        assert_eq!(transport.stats().messages_dropped, 1);
        assert_eq!(transport.stats().messages_received, 2);
    }

    #[test]
    fn test_duplicate_registration_fails_fast() {
        let (_, transport) = scripted_transport();

        let a: Rc<RefCell<dyn NetTarget>> = Rc::new(RefCell::new(Recorder(Vec::new())));
        let b: Rc<RefCell<dyn NetTarget>> = Rc::new(RefCell::new(Recorder(Vec::new())));

        transport.register(1, &a).unwrap();
        assert_eq!(transport.register(1, &b), Err(SessionError::DuplicateId(1)));
    }

    #[test]
    fn test_dropped_target_frees_its_id() {
        let (_, transport) = scripted_transport();

        let a: Rc<RefCell<dyn NetTarget>> = Rc::new(RefCell::new(Recorder(Vec::new())));
        transport.register(1, &a).unwrap();
        drop(a);

        let b: Rc<RefCell<dyn NetTarget>> = Rc::new(RefCell::new(Recorder(Vec::new())));
        transport.register(1, &b).unwrap();
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let (_, transport) = scripted_transport();
        let a: Rc<RefCell<dyn NetTarget>> = Rc::new(RefCell::new(Recorder(Vec::new())));
        transport.register(1, &a).unwrap();

        transport.unregister(1);
        transport.unregister(1);

        let b: Rc<RefCell<dyn NetTarget>> = Rc::new(RefCell::new(Recorder(Vec::new())));
        transport.register(1, &b).unwrap();
    }

    #[test]
    fn test_tick_interval_gates_polling() {
        let socket = Rc::new(RefCell::new(ScriptedSocket::default()));
        let mut transport = SessionTransport::with_config(
            socket.clone(),
            TransportConfig { tick_interval: Duration::from_secs(3600), ..Default::default() },
        );
        transport.host(4000).unwrap();

        socket.borrow_mut().inbox.push_back(SocketEvent::Connected(1));
        assert_eq!(transport.tick().len(), 1);

        // Within the interval: no polling, no events.
        socket.borrow_mut().inbox.push_back(SocketEvent::Connected(2));
        assert!(transport.tick().is_empty());
        assert_eq!(socket.borrow().inbox.len(), 1);
    }

    #[test]
    fn test_unconnected_tick_yields_nothing() {
        let (_, mut transport) = scripted_transport();
        assert!(transport.tick().is_empty());
    }

    #[test]
    fn test_send_primitives_address_correctly() {
        let (socket, transport) = scripted_transport();

        transport.send_to_all(b"a");
        transport.send_to_peer(4, b"b");
        transport.send_except(4, b"c");

        let sent = socket.borrow().sent.clone();
        assert_eq!(sent[0].0, SendTarget::All);
        assert_eq!(sent[1].0, SendTarget::Peer(4));
        assert_eq!(sent[2].0, SendTarget::AllExcept(4));
    }
}
