//! Client-side connection agent.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{ProtocolViolation, RuleDefinitionError};
use crate::rule::{EventRule, MappingRules};
use crate::value::Value;

use super::packet::{classify, Packet, PrefixKind};
use super::{
    advert_body_rule, attach_body_rule, dispatch_event, parse_negotiation, EventListener,
    EventTarget, ListenerError, ListenerTable,
};

/// The client end of one connection.
///
/// Owns a connection-scoped registry pair: its own events (declared
/// locally, codes learned from `+` packets) and the server's events
/// (rules synthesized or reconciled from `=` advertisements). Cheap to
/// clone; clones share the same connection state.
#[derive(Clone)]
pub struct Client {
    inner: Rc<ClientInner>,
}

struct ClientInner {
    /// Events the server handles; what `send_trigger` consults.
    server_rules: RefCell<MappingRules>,
    /// Events this client handles; what inbound dispatch consults.
    client_rules: RefCell<MappingRules>,
    send: RefCell<Option<Box<dyn Fn(Packet)>>>,
    listeners: RefCell<ListenerTable>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a detached client agent; wire it up with
    /// [`Client::on_send`] and feed it via [`Client::receive_data`].
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ClientInner {
                server_rules: RefCell::new(MappingRules::new()),
                client_rules: RefCell::new(MappingRules::new()),
                send: RefCell::new(None),
                listeners: RefCell::new(ListenerTable::default()),
            }),
        }
    }

    /// Install the outbound packet sink.
    pub fn on_send(&self, sink: impl Fn(Packet) + 'static) {
        *self.inner.send.borrow_mut() = Some(Box::new(sink));
    }

    /// Declare a rule for an event this client handles. No short code is
    /// assigned; the code arrives later in a `+` packet.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateEventName`] when the name is taken.
    pub fn add_event_rule(
        &self,
        event_name: &str,
        rule: EventRule,
    ) -> Result<(), RuleDefinitionError> {
        self.inner.client_rules.borrow_mut().register(event_name, rule)
    }

    /// Install a listener for the named event.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::ListenerOccupied`] when the slot is taken.
    pub fn set_event_listener<F>(
        &self,
        event_name: &str,
        listener: F,
    ) -> Result<(), RuleDefinitionError>
    where
        F: Fn(&Value, &dyn EventTarget) -> Result<(), ListenerError> + 'static,
    {
        self.inner
            .listeners
            .borrow_mut()
            .insert(event_name, Rc::new(listener))
    }

    /// Process one inbound packet.
    ///
    /// Besides the two dispatch forms, the client handles both
    /// negotiation kinds: `=` advertisements (synthesizing an untyped
    /// rule when it holds none, otherwise attaching the code and
    /// reconciling key order) and `+` attachments (attaching the code to
    /// a locally declared rule and delivering the bundled first payload).
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation`] on any lookup or structural failure.
    pub fn receive_data(&self, prefix: &str, body: &Value) -> Result<(), ProtocolViolation> {
        match classify(prefix) {
            PrefixKind::Empty => Ok(()),
            PrefixKind::Verbose(name) => {
                let rule = self
                    .inner
                    .client_rules
                    .borrow()
                    .rule_by_name(name)
                    .ok_or_else(|| ProtocolViolation::UnknownEventName {
                        name: name.to_string(),
                    })?;
                let meta = rule.borrow().verify_get_object(body)?;
                dispatch_event(self, &self.inner.listeners, name, &meta);
                Ok(())
            }
            PrefixKind::Attach(name) => {
                if !attach_body_rule().verify(body) {
                    return Err(ProtocolViolation::MalformedNegotiation {
                        event: name.to_string(),
                    });
                }
                let neg = parse_negotiation(body).ok_or_else(|| {
                    ProtocolViolation::MalformedNegotiation {
                        event: name.to_string(),
                    }
                })?;
                let rule = self
                    .inner
                    .client_rules
                    .borrow()
                    .rule_by_name(name)
                    .ok_or_else(|| ProtocolViolation::UnknownEventName {
                        name: name.to_string(),
                    })?;
                if !neg.short.is_empty() {
                    self.inner
                        .client_rules
                        .borrow_mut()
                        .assign_code(&neg.short, name)
                        .map_err(|error| ProtocolViolation::NegotiationRejected {
                            event: name.to_string(),
                            message: error.to_string(),
                        })?;
                }
                rule.borrow_mut().reset_key_list(&neg.keys)?;
                if let Some(value) = neg.value {
                    let meta = rule.borrow().verify_get_array(&value)?;
                    dispatch_event(self, &self.inner.listeners, name, &meta);
                }
                Ok(())
            }
            PrefixKind::Advert(name) => {
                if !advert_body_rule().verify(body) {
                    return Err(ProtocolViolation::MalformedNegotiation {
                        event: name.to_string(),
                    });
                }
                let neg = parse_negotiation(body).ok_or_else(|| {
                    ProtocolViolation::MalformedNegotiation {
                        event: name.to_string(),
                    }
                })?;
                let existing = self.inner.server_rules.borrow().rule_by_name(name);
                match existing {
                    None => {
                        // First sight of this server event: learn its
                        // shape from the advertised key list, untyped.
                        let rule = EventRule::untyped(neg.keys.clone()).map_err(|error| {
                            ProtocolViolation::NegotiationRejected {
                                event: name.to_string(),
                                message: error.to_string(),
                            }
                        })?;
                        let mut rules = self.inner.server_rules.borrow_mut();
                        rules.register(name, rule).map_err(|error| {
                            ProtocolViolation::NegotiationRejected {
                                event: name.to_string(),
                                message: error.to_string(),
                            }
                        })?;
                        if !neg.short.is_empty() {
                            rules.assign_code(&neg.short, name).map_err(|error| {
                                ProtocolViolation::NegotiationRejected {
                                    event: name.to_string(),
                                    message: error.to_string(),
                                }
                            })?;
                        }
                    }
                    Some(rule) => {
                        if !neg.short.is_empty() {
                            self.inner
                                .server_rules
                                .borrow_mut()
                                .assign_code(&neg.short, name)
                                .map_err(|error| ProtocolViolation::NegotiationRejected {
                                    event: name.to_string(),
                                    message: error.to_string(),
                                })?;
                        }
                        rule.borrow_mut().reset_key_list(&neg.keys)?;
                    }
                }
                Ok(())
            }
            PrefixKind::Short(short) => {
                let rule = self
                    .inner
                    .client_rules
                    .borrow()
                    .rule_by_short(short)
                    .ok_or_else(|| ProtocolViolation::UnknownShortCode {
                        short: short.to_string(),
                    })?;
                let (event_name, meta) = {
                    let rule = rule.borrow();
                    (rule.event_name().to_string(), rule.verify_get_array(body)?)
                };
                dispatch_event(self, &self.inner.listeners, &event_name, &meta);
                Ok(())
            }
            PrefixKind::Invalid => Err(ProtocolViolation::BadPrefix {
                prefix: prefix.to_string(),
            }),
        }
    }

    /// Trigger an event on the server: the short code with the positional
    /// body once it is known, the verbose form until then.
    pub fn send_trigger(&self, event_name: &str, payload: &Value) {
        let rule = self.inner.server_rules.borrow().rule_by_name(event_name);
        let packet = match rule {
            Some(rule) => {
                let rule = rule.borrow();
                match rule.short_name() {
                    Some(short) => Packet::new(
                        short,
                        rule.meta_obj_to_array(payload).unwrap_or(Value::Undefined),
                    ),
                    None => Packet::new(format!("*{event_name}"), payload.clone()),
                }
            }
            None => Packet::new(format!("*{event_name}"), payload.clone()),
        };
        self.emit(packet);
    }

    fn emit(&self, packet: Packet) {
        let sink = self.inner.send.borrow();
        match sink.as_ref() {
            Some(send) => send(packet),
            None => {
                tracing::debug!(prefix = %packet.prefix, "no outbound sink installed, dropping packet");
            }
        }
    }
}

impl EventTarget for Client {
    fn send_trigger(&self, event_name: &str, payload: &Value) {
        Client::send_trigger(self, event_name, payload);
    }

    fn install_listener(
        &self,
        event_name: &str,
        listener: EventListener,
    ) -> Result<(), RuleDefinitionError> {
        self.inner.listeners.borrow_mut().insert(event_name, listener)
    }

    fn has_listener(&self, event_name: &str) -> bool {
        self.inner.listeners.borrow().contains(event_name)
    }

    fn target_handle(&self) -> Rc<dyn EventTarget> {
        Rc::new(self.clone())
    }
}
