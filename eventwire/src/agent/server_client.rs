//! Per-connection agent on the server side.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use indexmap::IndexMap;

use crate::error::{ProtocolViolation, RuleDefinitionError};
use crate::rule::MappingRules;
use crate::value::Value;

use super::config::ProtocolConfig;
use super::packet::{classify, keys_value, Packet, PrefixKind};
use super::{dispatch_event, EventListener, EventTarget, ListenerError, ListenerTable};

/// One connected client, as seen from the server.
///
/// Borrows the server-wide rule registries and owns the per-connection
/// pieces: the outbound sink, the listener table, and the negotiation
/// state (when each server event's code was advertised, and which client
/// event codes were already attached to an outbound packet).
///
/// Cheap to clone; clones share the same connection state.
#[derive(Clone)]
pub struct ServerClient {
    inner: Rc<ServerClientInner>,
}

struct ServerClientInner {
    server_rules: Rc<RefCell<MappingRules>>,
    client_rules: Rc<RefCell<MappingRules>>,
    config: ProtocolConfig,
    send: RefCell<Option<Box<dyn Fn(Packet)>>>,
    listeners: RefCell<ListenerTable>,
    /// Server event name → when its `=` advertisement went out.
    advertised_at: RefCell<HashMap<String, Instant>>,
    /// Client events whose short code was already sent in a `+` packet.
    attached_codes: RefCell<HashSet<String>>,
}

impl ServerClient {
    pub(crate) fn create(
        server_rules: Rc<RefCell<MappingRules>>,
        client_rules: Rc<RefCell<MappingRules>>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            inner: Rc::new(ServerClientInner {
                server_rules,
                client_rules,
                config,
                send: RefCell::new(None),
                listeners: RefCell::new(ListenerTable::default()),
                advertised_at: RefCell::new(HashMap::new()),
                attached_codes: RefCell::new(HashSet::new()),
            }),
        }
    }

    /// Install the outbound packet sink. The host transmits whatever the
    /// sink receives, in order.
    pub fn on_send(&self, sink: impl Fn(Packet) + 'static) {
        *self.inner.send.borrow_mut() = Some(Box::new(sink));
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

    /// Process one inbound packet. Any failure is a violation fatal to
    /// the call; the host decides whether to drop the connection.
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation`] on unknown codes/names, bad prefixes, body
    /// mismatches and the staleness guard.
    pub fn receive_data(&self, prefix: &str, body: &Value) -> Result<(), ProtocolViolation> {
        match classify(prefix) {
            PrefixKind::Empty => Ok(()),
            PrefixKind::Short(short) => {
                let rule = self
                    .inner
                    .server_rules
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
            PrefixKind::Verbose(name) => {
                let rule = self
                    .inner
                    .server_rules
                    .borrow()
                    .rule_by_name(name)
                    .ok_or_else(|| ProtocolViolation::UnknownEventName {
                        name: name.to_string(),
                    })?;
                // Advertise the short code the first time this event
                // arrives verbose; past the grace window the peer must
                // have switched to it.
                let advert = {
                    let rule = rule.borrow();
                    match rule.short_name() {
                        Some(short) => {
                            let mut advertised = self.inner.advertised_at.borrow_mut();
                            match advertised.get(name) {
                                None => {
                                    advertised.insert(name.to_string(), Instant::now());
                                    let mut body = IndexMap::new();
                                    body.insert("key".to_string(), keys_value(rule.keys()));
                                    body.insert("short".to_string(), Value::from(short));
                                    Some(Packet::new(format!("={name}"), Value::Object(body)))
                                }
                                Some(sent)
                                    if sent.elapsed() > self.inner.config.advert_stale_after =>
                                {
                                    return Err(ProtocolViolation::StaleAdvertisement {
                                        event: name.to_string(),
                                    });
                                }
                                Some(_) => None,
                            }
                        }
                        None => None,
                    }
                };
                if let Some(packet) = advert {
                    tracing::debug!(event = name, "advertising short code to peer");
                    self.emit(packet);
                }
                let meta = rule.borrow().verify_get_object(body)?;
                dispatch_event(self, &self.inner.listeners, name, &meta);
                Ok(())
            }
            PrefixKind::Advert(_) | PrefixKind::Attach(_) | PrefixKind::Invalid => {
                Err(ProtocolViolation::BadPrefix {
                    prefix: prefix.to_string(),
                })
            }
        }
    }

    /// Trigger an event on the connected client.
    ///
    /// Uses the short code once it has been attached; the first send of a
    /// code-carrying event travels as a `+` packet bundling code, key
    /// order and payload; events without a code fall back to the verbose
    /// form.
    pub fn send_trigger(&self, event_name: &str, payload: &Value) {
        let rule = self.inner.client_rules.borrow().rule_by_name(event_name);
        let packet = match rule {
            Some(rule) => {
                let rule = rule.borrow();
                match rule.short_name() {
                    Some(short) => {
                        if self.inner.attached_codes.borrow().contains(event_name) {
                            Packet::new(
                                short,
                                rule.meta_obj_to_array(payload).unwrap_or(Value::Undefined),
                            )
                        } else {
                            self.inner
                                .attached_codes
                                .borrow_mut()
                                .insert(event_name.to_string());
                            let mut body = IndexMap::new();
                            body.insert("short".to_string(), Value::from(short));
                            body.insert("key".to_string(), keys_value(rule.keys()));
                            if let Some(value) = rule.meta_obj_to_array(payload) {
                                body.insert("value".to_string(), value);
                            }
                            Packet::new(format!("+{event_name}"), Value::Object(body))
                        }
                    }
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

    pub(crate) fn listeners_untouched(&self) -> bool {
        self.inner.listeners.borrow().is_untouched()
    }

    pub(crate) fn attach_shared_listeners(&self, shared: Rc<HashMap<String, EventListener>>) {
        self.inner.listeners.borrow_mut().attach_shared(shared);
    }
}

impl EventTarget for ServerClient {
    fn send_trigger(&self, event_name: &str, payload: &Value) {
        ServerClient::send_trigger(self, event_name, payload);
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
