//! In-process packet socket over a shared hub.
//!
//! [`MemoryHub`] is a star-topology message board living entirely in one
//! process: the first socket to `listen` becomes the hub's host, every
//! later `connect` attaches as a client with a single logical link to the
//! host. Delivery is synchronous enqueue + polled dequeue, so multi-party
//! sessions can be driven deterministically from a single thread. This is
//! the socket the integration tests run on; production sessions plug a
//! real network socket into the same [`PacketSocket`] trait.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::session::{PacketSocket, PeerId, SendTarget, SessionError, SocketEvent};

struct HubState {
    next_peer: PeerId,
    host: Option<PeerId>,
    /// Client peer ids in attach order, so fan-out is deterministic.
    clients: Vec<PeerId>,
    inboxes: HashMap<PeerId, VecDeque<SocketEvent>>,
}

impl HubState {
    fn push(&mut self, peer: PeerId, event: SocketEvent) {
        if let Some(inbox) = self.inboxes.get_mut(&peer) {
            inbox.push_back(event);
        }
    }
}

/// A shared in-process hub that [`MemorySocket`]s attach to.
#[derive(Clone)]
pub struct MemoryHub {
    state: Rc<RefCell<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(HubState {
                next_peer: 1,
                host: None,
                clients: Vec::new(),
                inboxes: HashMap::new(),
            })),
        }
    }

    /// A detached socket on this hub; `listen` or `connect` attaches it.
    pub fn socket(&self) -> Rc<RefCell<MemorySocket>> {
        Rc::new(RefCell::new(MemorySocket {
            state: self.state.clone(),
            id: None,
            is_host: false,
        }))
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint on a [`MemoryHub`].
pub struct MemorySocket {
    state: Rc<RefCell<HubState>>,
    id: Option<PeerId>,
    is_host: bool,
}

impl PacketSocket for MemorySocket {
    fn listen(&mut self, _port: u16) -> Result<(), SessionError> {
        let mut state = self.state.borrow_mut();
        if state.host.is_some() {
            return Err(SessionError::Socket("hub already has a host".into()));
        }
        let id = state.next_peer;
        state.next_peer += 1;
        state.host = Some(id);
        state.inboxes.insert(id, VecDeque::new());
        self.id = Some(id);
        self.is_host = true;
        Ok(())
    }

    fn connect(&mut self, _address: &str) -> Result<(), SessionError> {
        let mut state = self.state.borrow_mut();
        let host = state
            .host
            .ok_or_else(|| SessionError::Socket("no host on hub".into()))?;
        let id = state.next_peer;
        state.next_peer += 1;
        state.clients.push(id);
        state.inboxes.insert(id, VecDeque::new());
        state.push(host, SocketEvent::Connected(id));
        state.push(id, SocketEvent::Connected(host));
        self.id = Some(id);
        self.is_host = false;
        Ok(())
    }

    fn shutdown(&mut self) {
        let Some(id) = self.id.take() else { return };
        let mut state = self.state.borrow_mut();
        state.inboxes.remove(&id);
        if self.is_host {
            state.host = None;
            let clients = std::mem::take(&mut state.clients);
            for client in clients {
                state.push(client, SocketEvent::Disconnected(id));
            }
        } else {
            state.clients.retain(|&c| c != id);
            if let Some(host) = state.host {
                state.push(host, SocketEvent::Disconnected(id));
            }
        }
        self.is_host = false;
    }

    fn is_running(&self) -> bool {
        self.id.is_some()
    }

    fn poll(&mut self) -> Option<SocketEvent> {
        let id = self.id?;
        self.state.borrow_mut().inboxes.get_mut(&id)?.pop_front()
    }

    fn send(&mut self, target: SendTarget, bytes: &[u8]) {
        let Some(id) = self.id else { return };
        let mut state = self.state.borrow_mut();
        if self.is_host {
            let recipients: Vec<PeerId> = match target {
                SendTarget::All => state.clients.clone(),
                SendTarget::Peer(peer) => {
                    state.clients.iter().copied().filter(|&c| c == peer).collect()
                }
                SendTarget::AllExcept(peer) => {
                    state.clients.iter().copied().filter(|&c| c != peer).collect()
                }
            };
            for client in recipients {
                state.push(client, SocketEvent::Data(id, bytes.to_vec()));
            }
        } else {
            // A client's only link is the host; addressing beyond that is
            // the host's relay job.
            if let Some(host) = state.host {
                state.push(host, SocketEvent::Data(id, bytes.to_vec()));
            }
        }
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(socket: &Rc<RefCell<MemorySocket>>) -> Vec<SocketEvent> {
        let mut events = Vec::new();
        while let Some(event) = socket.borrow_mut().poll() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_connect_requires_host() {
        let hub = MemoryHub::new();
        let lone = hub.socket();
        assert!(lone.borrow_mut().connect("host").is_err());
    }

    #[test]
    fn test_connect_notifies_both_ends() {
        let hub = MemoryHub::new();
        let host = hub.socket();
        let client = hub.socket();

        host.borrow_mut().listen(0).unwrap();
        client.borrow_mut().connect("host").unwrap();

        assert_eq!(drain(&host), vec![SocketEvent::Connected(2)]);
        assert_eq!(drain(&client), vec![SocketEvent::Connected(1)]);
    }

    #[test]
    fn test_single_host_per_hub() {
        let hub = MemoryHub::new();
        let first = hub.socket();
        let second = hub.socket();

        first.borrow_mut().listen(0).unwrap();
        assert!(second.borrow_mut().listen(0).is_err());
    }

    #[test]
    fn test_host_fanout_targets() {
        let hub = MemoryHub::new();
        let host = hub.socket();
        let a = hub.socket();
        let b = hub.socket();

        host.borrow_mut().listen(0).unwrap();
        a.borrow_mut().connect("host").unwrap(); // peer 2
        b.borrow_mut().connect("host").unwrap(); // peer 3

        host.borrow_mut().send(SendTarget::All, b"all");
        host.borrow_mut().send(SendTarget::Peer(2), b"one");
        host.borrow_mut().send(SendTarget::AllExcept(2), b"rest");

        let a_data: Vec<_> = drain(&a)
            .into_iter()
            .filter(|e| matches!(e, SocketEvent::Data(..)))
            .collect();
        let b_data: Vec<_> = drain(&b)
            .into_iter()
            .filter(|e| matches!(e, SocketEvent::Data(..)))
            .collect();

        assert_eq!(
            a_data,
            vec![
                SocketEvent::Data(1, b"all".to_vec()),
                SocketEvent::Data(1, b"one".to_vec()),
            ]
        );
        assert_eq!(
            b_data,
            vec![
                SocketEvent::Data(1, b"all".to_vec()),
                SocketEvent::Data(1, b"rest".to_vec()),
            ]
        );
    }

    #[test]
    fn test_client_sends_reach_only_the_host() {
        let hub = MemoryHub::new();
        let host = hub.socket();
        let a = hub.socket();
        let b = hub.socket();

        host.borrow_mut().listen(0).unwrap();
        a.borrow_mut().connect("host").unwrap();
        b.borrow_mut().connect("host").unwrap();
        drain(&host);
        drain(&a);
        drain(&b);

        a.borrow_mut().send(SendTarget::All, b"hi");

        assert_eq!(drain(&host), vec![SocketEvent::Data(2, b"hi".to_vec())]);
        assert!(drain(&b).is_empty());
    }

    #[test]
    fn test_host_shutdown_disconnects_every_client() {
        let hub = MemoryHub::new();
        let host = hub.socket();
        let a = hub.socket();
        let b = hub.socket();

        host.borrow_mut().listen(0).unwrap();
        a.borrow_mut().connect("host").unwrap();
        b.borrow_mut().connect("host").unwrap();
        drain(&a);
        drain(&b);

        host.borrow_mut().shutdown();

        assert_eq!(drain(&a), vec![SocketEvent::Disconnected(1)]);
        assert_eq!(drain(&b), vec![SocketEvent::Disconnected(1)]);
        assert!(!host.borrow().is_running());
    }

    #[test]
    fn test_client_shutdown_notifies_host() {
        let hub = MemoryHub::new();
        let host = hub.socket();
        let a = hub.socket();

        host.borrow_mut().listen(0).unwrap();
        a.borrow_mut().connect("host").unwrap();
        drain(&host);

        a.borrow_mut().shutdown();

        assert_eq!(drain(&host), vec![SocketEvent::Disconnected(2)]);
    }

    #[test]
    fn test_dropped_socket_detaches() {
        let hub = MemoryHub::new();
        let host = hub.socket();
        host.borrow_mut().listen(0).unwrap();

        {
            let a = hub.socket();
            a.borrow_mut().connect("host").unwrap();
        }

        let events = drain(&host);
        assert_eq!(
            events,
            vec![SocketEvent::Connected(2), SocketEvent::Disconnected(2)]
        );
    }
}
