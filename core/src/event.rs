//! Event broadcast and point-to-point requests between modules
//!
//! Payloads are borrowed `dyn Any` values owned by the sender for the duration of
//! the call. Receivers check the id and then downcast; a wrong guess about the
//! payload type yields `None` instead of undefined behaviour.

use crate::module::ModuleId;
use crate::module_manager::ModuleManager;
use std::any::Any;
use std::fmt;

/// Broadcast delivered to every module subscribed to `Capability::Event`
pub struct Event<'a> {
    id: &'a str,
    source: Option<ModuleId>,
    payload: &'a dyn Any,
}

impl<'a> Event<'a> {
    /// Create an event. `source` is `None` for events raised by the core.
    pub fn new(id: &'a str, source: Option<ModuleId>, payload: &'a dyn Any) -> Self {
        Self { id, source, payload }
    }

    pub fn id(&self) -> &str {
        self.id
    }

    pub fn source(&self) -> Option<ModuleId> {
        self.source
    }

    /// The payload, if it has type `T`
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Deliver to all subscribers in priority order
    pub fn send(&self, modules: &mut ModuleManager) {
        modules.send_event(self);
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("source", &self.source)
            .finish()
    }
}

/// Synchronous call addressed to a single module
pub struct Request<'a> {
    id: &'a str,
    source: ModuleId,
    destination: ModuleId,
    payload: &'a dyn Any,
}

impl<'a> Request<'a> {
    pub fn new(id: &'a str, source: ModuleId, destination: ModuleId, payload: &'a dyn Any) -> Self {
        Self {
            id,
            source,
            destination,
            payload,
        }
    }

    pub fn id(&self) -> &str {
        self.id
    }

    pub fn source(&self) -> ModuleId {
        self.source
    }

    pub fn destination(&self) -> ModuleId {
        self.destination
    }

    pub fn data<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Deliver to the destination and return its reply
    pub fn send(&self, modules: &mut ModuleManager) -> Option<Box<dyn Any + Send>> {
        modules.send_request(self)
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .finish()
    }
}

/// Take a typed reply out of a request answer
pub fn reply_as<T: Any>(reply: Option<Box<dyn Any + Send>>) -> Option<T> {
    reply.and_then(|r| r.downcast::<T>().ok()).map(|r| *r)
}
