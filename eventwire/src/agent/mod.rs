//! Protocol agents: the objects that encode, decode and dispatch packets.
//!
//! A [`Server`] owns the rule registries shared by all its connections
//! and creates one [`ServerClient`] per accepted connection; a [`Client`]
//! is the connection-scoped peer object on the other side. All three are
//! cheap-`Clone` handles over shared single-threaded state.
//!
//! The host wires an agent to its transport with two calls: `on_send`
//! installs the outbound packet sink, and `receive_data` is invoked once
//! per deframed inbound packet. Everything in between — verification,
//! short-code negotiation, listener dispatch — happens synchronously
//! inside `receive_data`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

mod client;
mod config;
mod packet;
mod server;
mod server_client;

pub use client::Client;
pub use config::ProtocolConfig;
pub use packet::Packet;
pub use server::Server;
pub use server_client::ServerClient;

pub(crate) use packet::{advert_body_rule, attach_body_rule, parse_negotiation};

/// Error type a listener may surface; dispatch logs it and moves on.
pub type ListenerError = Box<dyn std::error::Error>;

/// An installed event handler. Receives the verified payload and the
/// agent the event arrived on.
pub type EventListener = Rc<dyn Fn(&Value, &dyn EventTarget) -> Result<(), ListenerError>>;

/// The listener-facing surface of a protocol agent.
///
/// Both connection-side agents implement this, so listeners, query
/// processors and operators can be written once against the trait.
pub trait EventTarget {
    /// Trigger the named event on the remote peer, picking the most
    /// compact wire form currently negotiated.
    fn send_trigger(&self, event_name: &str, payload: &Value);

    /// Install a listener for the named event.
    ///
    /// # Errors
    ///
    /// [`crate::error::RuleDefinitionError::ListenerOccupied`] when a
    /// listener for the event is already installed.
    fn install_listener(
        &self,
        event_name: &str,
        listener: EventListener,
    ) -> Result<(), crate::error::RuleDefinitionError>;

    /// Whether a listener for the named event is installed.
    fn has_listener(&self, event_name: &str) -> bool;

    /// An owned handle to this agent, for handlers that outlive the
    /// current dispatch (spawned query processors).
    fn target_handle(&self) -> Rc<dyn EventTarget>;
}

/// Two-tier listener storage: a per-connection override map falling back
/// to a map shared with every connection the same binder was applied to.
#[derive(Default)]
pub(crate) struct ListenerTable {
    local: HashMap<String, EventListener>,
    shared: Option<Rc<HashMap<String, EventListener>>>,
}

impl ListenerTable {
    pub(crate) fn get(&self, event_name: &str) -> Option<EventListener> {
        self.local.get(event_name).cloned().or_else(|| {
            self.shared
                .as_ref()
                .and_then(|shared| shared.get(event_name).cloned())
        })
    }

    pub(crate) fn contains(&self, event_name: &str) -> bool {
        self.local.contains_key(event_name)
            || self
                .shared
                .as_ref()
                .is_some_and(|shared| shared.contains_key(event_name))
    }

    pub(crate) fn is_untouched(&self) -> bool {
        self.local.is_empty() && self.shared.is_none()
    }

    pub(crate) fn insert(
        &mut self,
        event_name: &str,
        listener: EventListener,
    ) -> Result<(), crate::error::RuleDefinitionError> {
        if self.contains(event_name) {
            return Err(crate::error::RuleDefinitionError::ListenerOccupied {
                name: event_name.to_string(),
            });
        }
        self.local.insert(event_name.to_string(), listener);
        Ok(())
    }

    pub(crate) fn attach_shared(&mut self, shared: Rc<HashMap<String, EventListener>>) {
        self.shared = Some(shared);
    }
}

/// Look up and invoke the listener for an event. Listener failures are
/// logged and isolated; one handler's failure never escalates into the
/// dispatch path.
pub(crate) fn dispatch_event(
    target: &dyn EventTarget,
    listeners: &RefCell<ListenerTable>,
    event_name: &str,
    payload: &Value,
) {
    let listener = listeners.borrow().get(event_name);
    match listener {
        Some(listener) => {
            if let Err(error) = listener(payload, target) {
                tracing::error!(event = event_name, error = %error, "event listener failed");
            }
        }
        None => {
            tracing::debug!(event = event_name, "no listener installed for event");
        }
    }
}
