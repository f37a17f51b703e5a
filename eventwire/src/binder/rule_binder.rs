//! Declarative aggregation of rules, listeners and queries.
//!
//! A [`RuleBinder`] collects everything one side of the protocol
//! declares — event rules, listeners, query triples — and later applies
//! it onto live agents: the server-wide rulesets, a per-connection
//! listener table, or a client instance. Pairing a server-bound binder
//! with its client-bound opposite is what lets a query allocate its
//! three events across both sides.
//!
//! The opposite link is symmetric, settable once per pair, and held as a
//! [`Weak`] handle on each side so per-binder ownership stays acyclic.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::agent::{Client, EventListener, EventTarget, ListenerError, Server, ServerClient};
use crate::error::{QueryError, RuleDefinitionError};
use crate::rule::{EventRule, RuleType};
use crate::value::Value;

use super::operator::BinderOperator;

/// Correlation-id key injected into query payloads; reserved.
pub(crate) const QUERY_ID_KEY: &str = "-query-id";
/// Cause key of query error responses; reserved.
pub(crate) const QUERY_CAUSE_KEY: &str = "-cause";

/// Which side of the protocol a binder's declarations belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Events handled by the server.
    Server,
    /// Events handled by the client.
    Client,
}

struct BinderInner {
    bound: Bound,
    names: Vec<String>,
    name_set: HashSet<String>,
    rules: HashMap<String, EventRule>,
    listeners: HashMap<String, EventListener>,
    query_names: Vec<String>,
    query_set: HashSet<String>,
    opposite: Option<Weak<RefCell<BinderInner>>>,
    listener_cache: Option<Rc<HashMap<String, EventListener>>>,
}

impl BinderInner {
    fn new(bound: Bound) -> Self {
        Self {
            bound,
            names: Vec::new(),
            name_set: HashSet::new(),
            rules: HashMap::new(),
            listeners: HashMap::new(),
            query_names: Vec::new(),
            query_set: HashSet::new(),
            opposite: None,
            listener_cache: None,
        }
    }

    fn add_name(&mut self, name: &str) {
        if self.name_set.insert(name.to_string()) {
            self.names.push(name.to_string());
        }
    }

    fn add_query_name(&mut self, name: &str) {
        if self.query_set.insert(name.to_string()) {
            self.query_names.push(name.to_string());
        }
    }

    fn insert_rule(&mut self, name: &str, rule: EventRule) -> Result<(), RuleDefinitionError> {
        self.add_name(name);
        if self.rules.contains_key(name) {
            return Err(RuleDefinitionError::DuplicateDefinition {
                name: name.to_string(),
            });
        }
        self.rules.insert(name.to_string(), rule);
        Ok(())
    }

    fn insert_listener(
        &mut self,
        name: &str,
        listener: EventListener,
    ) -> Result<(), RuleDefinitionError> {
        self.add_name(name);
        if self.listeners.contains_key(name) {
            return Err(RuleDefinitionError::DuplicateDefinition {
                name: name.to_string(),
            });
        }
        self.listeners.insert(name.to_string(), listener);
        self.listener_cache = None;
        Ok(())
    }
}

fn is_valid_event_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Declarative aggregator of rules, listeners and queries for one side.
///
/// Cheap to clone; clones share the same declarations.
#[derive(Clone)]
pub struct RuleBinder {
    inner: Rc<RefCell<BinderInner>>,
}

impl RuleBinder {
    /// Binder for declarations handled by the server side.
    pub fn server_bound() -> Self {
        Self {
            inner: Rc::new(RefCell::new(BinderInner::new(Bound::Server))),
        }
    }

    /// Binder for declarations handled by the client side.
    pub fn client_bound() -> Self {
        Self {
            inner: Rc::new(RefCell::new(BinderInner::new(Bound::Client))),
        }
    }

    /// Which side this binder declares for.
    pub fn bound(&self) -> Bound {
        self.inner.borrow().bound
    }

    /// Pair this binder with its opposite. Symmetric, and settable at
    /// most once per pair; re-binding the same pair is a no-op.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::OppositeAlreadyBound`] /
    /// [`RuleDefinitionError::SelfOpposite`].
    pub fn bind_opposite(&self, other: &RuleBinder) -> Result<(), RuleDefinitionError> {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return Err(RuleDefinitionError::SelfOpposite);
        }
        let self_weak = Rc::downgrade(&self.inner);
        let other_weak = Rc::downgrade(&other.inner);
        if let Some(existing) = &self.inner.borrow().opposite {
            if !existing.ptr_eq(&other_weak) {
                return Err(RuleDefinitionError::OppositeAlreadyBound);
            }
        }
        if let Some(existing) = &other.inner.borrow().opposite {
            if !existing.ptr_eq(&self_weak) {
                return Err(RuleDefinitionError::OppositeAlreadyBound);
            }
        }
        self.inner.borrow_mut().opposite = Some(other_weak);
        other.inner.borrow_mut().opposite = Some(self_weak);
        Ok(())
    }

    fn opposite_inner(&self) -> Result<Rc<RefCell<BinderInner>>, RuleDefinitionError> {
        self.inner
            .borrow()
            .opposite
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(RuleDefinitionError::OppositeMissing)
    }

    /// Declare an event rule. The rule is stored as given; reuse across
    /// binders goes through [`EventRule::detached_copy`].
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::InvalidEventName`] /
    /// [`RuleDefinitionError::DuplicateDefinition`].
    pub fn add_event_rule(&self, event_name: &str, rule: EventRule) -> Result<(), RuleDefinitionError> {
        if !is_valid_event_name(event_name) {
            return Err(RuleDefinitionError::InvalidEventName {
                name: event_name.to_string(),
            });
        }
        self.inner.borrow_mut().insert_rule(event_name, rule)
    }

    /// Declare several event rules at once.
    ///
    /// # Errors
    ///
    /// As [`RuleBinder::add_event_rule`]; declarations before the failing
    /// one stay in place.
    pub fn add_event_rules(
        &self,
        rules: Vec<(&str, EventRule)>,
    ) -> Result<(), RuleDefinitionError> {
        for (name, rule) in rules {
            self.add_event_rule(name, rule)?;
        }
        Ok(())
    }

    /// Declare a listener for an event.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::InvalidEventName`] /
    /// [`RuleDefinitionError::DuplicateDefinition`].
    pub fn set_event_listener<F>(
        &self,
        event_name: &str,
        listener: F,
    ) -> Result<(), RuleDefinitionError>
    where
        F: Fn(&Value, &dyn EventTarget) -> Result<(), ListenerError> + 'static,
    {
        if !is_valid_event_name(event_name) {
            return Err(RuleDefinitionError::InvalidEventName {
                name: event_name.to_string(),
            });
        }
        self.inner
            .borrow_mut()
            .insert_listener(event_name, Rc::new(listener))
    }

    /// Declare several listeners at once.
    ///
    /// # Errors
    ///
    /// As [`RuleBinder::set_event_listener`].
    pub fn set_event_listeners(
        &self,
        listeners: Vec<(&str, EventListener)>,
    ) -> Result<(), RuleDefinitionError> {
        for (name, listener) in listeners {
            if !is_valid_event_name(name) {
                return Err(RuleDefinitionError::InvalidEventName {
                    name: name.to_string(),
                });
            }
            self.inner.borrow_mut().insert_listener(name, listener)?;
        }
        Ok(())
    }

    /// Declare a query: expands into `name-req` on this binder and
    /// `name-rsp` / `name-ersp` on the opposite, each with the
    /// correlation-id field prepended. Requires the opposite bound.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::OppositeMissing`],
    /// [`RuleDefinitionError::ReservedKey`] when a given rule already
    /// uses the correlation key, and the usual name/duplicate errors.
    pub fn add_query_rule(
        &self,
        query_name: &str,
        request: EventRule,
        response: EventRule,
    ) -> Result<(), RuleDefinitionError> {
        if !is_valid_event_name(query_name) {
            return Err(RuleDefinitionError::InvalidEventName {
                name: query_name.to_string(),
            });
        }
        if request.has_key(QUERY_ID_KEY) || response.has_key(QUERY_ID_KEY) {
            return Err(RuleDefinitionError::ReservedKey {
                key: QUERY_ID_KEY.to_string(),
            });
        }
        let opposite = self.opposite_inner()?;

        let request_event = format!("{query_name}-req");
        let respond_event = format!("{query_name}-rsp");
        let error_event = format!("{query_name}-ersp");

        let mut request = request;
        request.add_param_front(QUERY_ID_KEY, Some(RuleType::string()))?;
        let mut response = response;
        response.add_param_front(QUERY_ID_KEY, Some(RuleType::string()))?;
        let error_rule = EventRule::typed(vec![
            (QUERY_ID_KEY, RuleType::string()),
            (
                QUERY_CAUSE_KEY,
                RuleType::string().merge(&RuleType::undefined())?,
            ),
        ])?;

        {
            let mut inner = self.inner.borrow_mut();
            inner.insert_rule(&request_event, request)?;
            inner.add_query_name(query_name);
        }
        {
            let mut opposite = opposite.borrow_mut();
            opposite.insert_rule(&respond_event, response)?;
            opposite.insert_rule(&error_event, error_rule)?;
        }
        Ok(())
    }

    /// Declare several queries at once.
    ///
    /// # Errors
    ///
    /// As [`RuleBinder::add_query_rule`].
    pub fn add_query_rules(
        &self,
        queries: Vec<(&str, EventRule, EventRule)>,
    ) -> Result<(), RuleDefinitionError> {
        for (name, request, response) in queries {
            self.add_query_rule(name, request, response)?;
        }
        Ok(())
    }

    /// Install the processor answering a query: listens on `name-req`,
    /// awaits the processor, and fires `name-rsp` with the correlation id
    /// reinjected — or `name-ersp` carrying the failure's cause.
    ///
    /// The processor future runs on the current-thread task set
    /// (`tokio::task::spawn_local`), so dispatch must happen inside a
    /// `LocalSet`.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::InvalidEventName`] /
    /// [`RuleDefinitionError::DuplicateDefinition`].
    pub fn set_query_processor<F, Fut>(
        &self,
        query_name: &str,
        processor: F,
    ) -> Result<(), RuleDefinitionError>
    where
        F: Fn(Value, Rc<dyn EventTarget>) -> Fut + 'static,
        Fut: Future<Output = Result<Option<Value>, QueryError>> + 'static,
    {
        if !is_valid_event_name(query_name) {
            return Err(RuleDefinitionError::InvalidEventName {
                name: query_name.to_string(),
            });
        }
        let request_event = format!("{query_name}-req");
        let respond_event = format!("{query_name}-rsp");
        let error_event = format!("{query_name}-ersp");
        let query = query_name.to_string();

        let listener: EventListener = Rc::new(move |meta: &Value, target: &dyn EventTarget| {
            let query_id = meta.get(QUERY_ID_KEY).clone();
            let handle = target.target_handle();
            let future = processor(meta.clone(), Rc::clone(&handle));
            let respond_event = respond_event.clone();
            let error_event = error_event.clone();
            let query = query.clone();
            tokio::task::spawn_local(async move {
                match future.await {
                    Ok(result) => {
                        let mut body = match result {
                            None => IndexMap::new(),
                            Some(Value::Object(map)) => map,
                            Some(_) => {
                                tracing::error!(
                                    query = %query,
                                    "query processor returned a non-object result"
                                );
                                let mut body = IndexMap::new();
                                body.insert(QUERY_ID_KEY.to_string(), query_id);
                                handle.send_trigger(&error_event, &Value::Object(body));
                                return;
                            }
                        };
                        body.insert(QUERY_ID_KEY.to_string(), query_id);
                        handle.send_trigger(&respond_event, &Value::Object(body));
                    }
                    Err(error) => {
                        let mut body = IndexMap::new();
                        body.insert(QUERY_ID_KEY.to_string(), query_id);
                        match error.wire_cause() {
                            Some(cause) => {
                                body.insert(QUERY_CAUSE_KEY.to_string(), Value::Str(cause));
                            }
                            None => {
                                tracing::error!(
                                    query = %query,
                                    "query processor failed without a cause"
                                );
                            }
                        }
                        handle.send_trigger(&error_event, &Value::Object(body));
                    }
                }
            });
            Ok(())
        });

        let mut inner = self.inner.borrow_mut();
        inner.add_query_name(query_name);
        inner.insert_listener(&request_event, listener)
    }

    /// Apply a server-bound binder's rules to a server context: its own
    /// rules into the server-handled registry, the opposite's rules (as
    /// untyped copies, key order only) into the client-handled registry.
    /// Both directions get eager short codes.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::WrongBinding`],
    /// [`RuleDefinitionError::MissingRule`] for a name declared without a
    /// rule, and registration errors from the registries.
    pub fn apply_to_server(&self, server: &Server) -> Result<(), RuleDefinitionError> {
        let inner = self.inner.borrow();
        if inner.bound != Bound::Server {
            return Err(RuleDefinitionError::WrongBinding);
        }
        for name in &inner.names {
            let rule = inner
                .rules
                .get(name)
                .ok_or_else(|| RuleDefinitionError::MissingRule { name: name.clone() })?;
            server
                .server_rules()
                .borrow_mut()
                .register_with_code(name, rule.detached_copy())?;
        }
        if let Some(opposite) = inner.opposite.as_ref().and_then(Weak::upgrade) {
            let opposite = opposite.borrow();
            for name in &opposite.names {
                let rule = opposite
                    .rules
                    .get(name)
                    .ok_or_else(|| RuleDefinitionError::MissingRule { name: name.clone() })?;
                server
                    .client_rules()
                    .borrow_mut()
                    .register_with_code(name, rule.untyped_copy())?;
            }
        }
        Ok(())
    }

    /// Apply a server-bound binder's listeners to one connection. A
    /// connection whose listener table is untouched shares a cached
    /// listener map; otherwise listeners are installed one by one and an
    /// occupied slot is an error rather than a silent overwrite.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::WrongBinding`] /
    /// [`RuleDefinitionError::ListenerOccupied`].
    pub fn apply_to_connection(&self, connection: &ServerClient) -> Result<(), RuleDefinitionError> {
        let mut inner = self.inner.borrow_mut();
        if inner.bound != Bound::Server {
            return Err(RuleDefinitionError::WrongBinding);
        }
        if connection.listeners_untouched() {
            if inner.listener_cache.is_none() {
                let mut cache = HashMap::new();
                for name in &inner.names {
                    if let Some(listener) = inner.listeners.get(name) {
                        cache.insert(name.clone(), Rc::clone(listener));
                    }
                }
                inner.listener_cache = Some(Rc::new(cache));
            }
            if let Some(cache) = &inner.listener_cache {
                connection.attach_shared_listeners(Rc::clone(cache));
            }
        } else {
            for name in &inner.names {
                if let Some(listener) = inner.listeners.get(name) {
                    connection.install_listener(name, Rc::clone(listener))?;
                }
            }
        }
        Ok(())
    }

    /// Apply a client-bound binder to a client instance: rules (lazily
    /// registered, codes learned later) and listeners in one pass.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::WrongBinding`],
    /// [`RuleDefinitionError::MissingRule`], plus registration and
    /// occupied-listener errors.
    pub fn apply_to_client(&self, client: &Client) -> Result<(), RuleDefinitionError> {
        let inner = self.inner.borrow();
        if inner.bound != Bound::Client {
            return Err(RuleDefinitionError::WrongBinding);
        }
        for name in &inner.names {
            let rule = inner
                .rules
                .get(name)
                .ok_or_else(|| RuleDefinitionError::MissingRule { name: name.clone() })?;
            client.add_event_rule(name, rule.detached_copy())?;
            if let Some(listener) = inner.listeners.get(name) {
                client.install_listener(name, Rc::clone(listener))?;
            }
        }
        Ok(())
    }

    /// Generate the operator for calling the *opposite* side's events and
    /// queries through the given agent.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::OppositeMissing`] plus the operator's own
    /// registration errors.
    pub fn create_operator(
        &self,
        target: impl EventTarget + 'static,
    ) -> Result<BinderOperator, RuleDefinitionError> {
        let opposite = self.opposite_inner()?;
        let operator = BinderOperator::new(target);
        let opposite = opposite.borrow();
        for name in &opposite.names {
            operator.add_trigger(name)?;
        }
        for query_name in &opposite.query_names {
            operator.add_query(query_name)?;
        }
        Ok(operator)
    }
}
