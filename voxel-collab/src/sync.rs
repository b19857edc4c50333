//! Replicated variables.
//!
//! A [`SyncVar`] is a typed value bound to a wire id on a session. Writing
//! a genuinely new value encodes it and broadcasts immediately; inbound
//! messages routed here by the transport decode, assign, and notify
//! subscribers. Equality gates both directions, so setting the value a
//! variable already holds is a no-op on the wire and a re-delivered
//! message is a no-op locally:
//!
//! ```text
//!   set(v) ──equal?──▶ drop          receive ──equal?──▶ drop
//!      │ new                            │ new
//!      ▼                                ▼
//!   encode ──▶ broadcast            assign ──▶ notify subscribers
//! ```
//!
//! Subscribers observe remote changes only; the local writer already
//! knows what it wrote.

use std::cell::RefCell;
use std::rc::Rc;

use crate::session::{NetTarget, SessionError, SessionHandle};
use crate::wire::{self, VariableId, WireData, WireError};

/// Value equality test used to gate sends and notifications.
pub type Comparer<T> = Box<dyn Fn(&T, &T) -> bool>;

/// A value replicated across the session under a fixed wire id.
pub struct SyncVar<T: WireData + 'static> {
    id: VariableId,
    value: T,
    comparer: Comparer<T>,
    handle: SessionHandle,
    listeners: Vec<Box<dyn FnMut(&T)>>,
}

impl<T: WireData + PartialEq + 'static> SyncVar<T> {
    /// Bind a new variable at `id` using `PartialEq` as the change gate.
    ///
    /// The returned `Rc` is the variable's lifetime: the transport holds
    /// it weakly, so dropping every clone unbinds the id.
    pub fn register(
        handle: &SessionHandle,
        id: VariableId,
        initial: T,
    ) -> Result<Rc<RefCell<Self>>, SessionError> {
        Self::register_with_comparer(handle, id, initial, Box::new(|a: &T, b: &T| a == b))
    }
}

impl<T: WireData + 'static> SyncVar<T> {
    /// Bind with a custom equality test, for values where `PartialEq` is
    /// too strict or too loose a notion of "changed".
    pub fn register_with_comparer(
        handle: &SessionHandle,
        id: VariableId,
        initial: T,
        comparer: Comparer<T>,
    ) -> Result<Rc<RefCell<Self>>, SessionError> {
        let var = Rc::new(RefCell::new(Self {
            id,
            value: initial,
            comparer,
            handle: handle.clone(),
            listeners: Vec::new(),
        }));
        let target: Rc<RefCell<dyn NetTarget>> = var.clone();
        handle.bind(id, &target)?;
        Ok(var)
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn get(&self) -> T {
        self.value.clone()
    }

    pub fn peek(&self) -> &T {
        &self.value
    }

    /// Assign a value. Broadcasts only when the comparer reports a change.
    pub fn set(&mut self, value: T) {
        if (self.comparer)(&self.value, &value) {
            return;
        }
        self.value = value;
        self.handle.send_to_all(&wire::encode(self.id, &self.value));
    }

    /// Subscribe to remote changes, in subscription order.
    pub fn subscribe(&mut self, listener: impl FnMut(&T) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn notify(&mut self) {
        // Swap the list out so listeners never alias the live vector.
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in &mut listeners {
            listener(&self.value);
        }
        listeners.extend(self.listeners.drain(..));
        self.listeners = listeners;
    }
}

impl<T: WireData + 'static> NetTarget for SyncVar<T> {
    fn receive_message(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let (_, value) = wire::decode::<T>(bytes)?;
        if (self.comparer)(&self.value, &value) {
            return Ok(());
        }
        self.value = value;
        self.notify();
        Ok(())
    }
}
