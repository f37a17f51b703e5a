//! Generated typed call surface bound to one protocol agent.
//!
//! A [`BinderOperator`] exposes the opposite binder's events as a map of
//! trigger functions and its queries as a map of query functions. The
//! query side owns the in-flight correlation table: every call generates
//! a fresh correlation id, records a pending entry, fires the `-req`
//! event and returns a [`QueryFuture`] that the installed `-rsp` /
//! `-ersp` listeners settle by id.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use indexmap::IndexMap;

use crate::agent::EventTarget;
use crate::error::{OperatorError, QueryError, RuleDefinitionError};
use crate::ident::unique_identifier;
use crate::value::Value;

use super::query::{InFlight, PendingTable, QueryFuture, QueryOptions, QuerySlot, TimeoutBehavior};
use super::rule_binder::{QUERY_CAUSE_KEY, QUERY_ID_KEY};

type TriggerFn = Rc<dyn Fn(&Value)>;
type QueryFn = Rc<dyn Fn(Value, QueryOptions) -> Result<QueryFuture, OperatorError>>;

/// Typed call surface for triggering events and running queries against
/// the peer behind one agent.
pub struct BinderOperator {
    target: Rc<dyn EventTarget>,
    triggers: RefCell<HashMap<String, TriggerFn>>,
    queries: RefCell<HashMap<String, QueryFn>>,
}

impl BinderOperator {
    /// Operator bound to the given agent.
    pub fn new(target: impl EventTarget + 'static) -> Self {
        Self {
            target: Rc::new(target),
            triggers: RefCell::new(HashMap::new()),
            queries: RefCell::new(HashMap::new()),
        }
    }

    /// Generate a fire-and-forget trigger function for an event.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateDefinition`] when the trigger
    /// already exists.
    pub fn add_trigger(&self, event_name: &str) -> Result<(), RuleDefinitionError> {
        let mut triggers = self.triggers.borrow_mut();
        if triggers.contains_key(event_name) {
            return Err(RuleDefinitionError::DuplicateDefinition {
                name: event_name.to_string(),
            });
        }
        let target = Rc::clone(&self.target);
        let name = event_name.to_string();
        triggers.insert(
            event_name.to_string(),
            Rc::new(move |payload| target.send_trigger(&name, payload)),
        );
        Ok(())
    }

    /// Invoke a generated trigger.
    ///
    /// # Errors
    ///
    /// [`OperatorError::UnknownTrigger`] when no trigger was generated
    /// under this name.
    pub fn trigger(&self, event_name: &str, payload: &Value) -> Result<(), OperatorError> {
        let trigger = self.triggers.borrow().get(event_name).cloned().ok_or_else(|| {
            OperatorError::UnknownTrigger {
                name: event_name.to_string(),
            }
        })?;
        trigger(payload);
        Ok(())
    }

    /// Generate a query function and install its `-rsp`/`-ersp`
    /// listeners on the target.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateDefinition`] when the query
    /// already exists, [`RuleDefinitionError::ListenerOccupied`] when a
    /// response listener slot is taken.
    pub fn add_query(&self, query_name: &str) -> Result<(), RuleDefinitionError> {
        let mut queries = self.queries.borrow_mut();
        if queries.contains_key(query_name) {
            return Err(RuleDefinitionError::DuplicateDefinition {
                name: query_name.to_string(),
            });
        }
        let request_event = format!("{query_name}-req");
        let respond_event = format!("{query_name}-rsp");
        let error_event = format!("{query_name}-ersp");
        if self.target.has_listener(&respond_event) {
            return Err(RuleDefinitionError::ListenerOccupied {
                name: respond_event,
            });
        }
        if self.target.has_listener(&error_event) {
            return Err(RuleDefinitionError::ListenerOccupied { name: error_event });
        }

        let pending: PendingTable = Rc::new(RefCell::new(HashMap::new()));

        let table = Rc::clone(&pending);
        self.target.install_listener(
            &respond_event,
            Rc::new(move |meta: &Value, _target: &dyn EventTarget| {
                if let Some(id) = meta.get(QUERY_ID_KEY).as_str() {
                    let entry = table.borrow_mut().remove(id);
                    if let Some(entry) = entry {
                        entry.complete(Ok(without_query_id(meta)));
                    }
                }
                Ok(())
            }),
        )?;

        let table = Rc::clone(&pending);
        self.target.install_listener(
            &error_event,
            Rc::new(move |meta: &Value, _target: &dyn EventTarget| {
                if let Some(id) = meta.get(QUERY_ID_KEY).as_str() {
                    let entry = table.borrow_mut().remove(id);
                    if let Some(entry) = entry {
                        let cause = meta.get(QUERY_CAUSE_KEY).as_str().map(str::to_string);
                        entry.complete(Err(QueryError::Rejected { cause }));
                    }
                }
                Ok(())
            }),
        )?;

        let target = Rc::clone(&self.target);
        let starter: QueryFn = Rc::new(move |payload: Value, options: QueryOptions| {
            if !payload.get(QUERY_ID_KEY).is_undefined() {
                return Err(OperatorError::ReservedKey {
                    key: QUERY_ID_KEY.to_string(),
                });
            }
            let query_id = unique_identifier();
            let mut body = match payload {
                Value::Object(map) => map,
                _ => IndexMap::new(),
            };
            body.insert(QUERY_ID_KEY.to_string(), Value::Str(query_id.clone()));

            let slot = Rc::new(RefCell::new(QuerySlot::default()));
            let timeout_task = options.timeout.map(|deadline| {
                let pending = Rc::clone(&pending);
                let id = query_id.clone();
                let behavior = options.on_timeout;
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(deadline).await;
                    let entry = pending.borrow_mut().remove(&id);
                    if let Some(entry) = entry {
                        match behavior {
                            TimeoutBehavior::Reject => entry.complete(Err(QueryError::Timeout)),
                            TimeoutBehavior::Resolve => entry.complete(Ok(Value::Null)),
                            TimeoutBehavior::Discard => {}
                        }
                    }
                })
            });
            pending.borrow_mut().insert(
                query_id,
                InFlight {
                    slot: Rc::clone(&slot),
                    started: Instant::now(),
                    timeout_task,
                },
            );
            target.send_trigger(&request_event, &Value::Object(body));
            Ok(QueryFuture::new(slot))
        });
        queries.insert(query_name.to_string(), starter);
        Ok(())
    }

    /// Start a generated query; resolves with the response payload (the
    /// correlation id stripped).
    ///
    /// Must run under a current-thread task set when a timeout is
    /// configured, since the deadline is tracked by a spawned local task.
    ///
    /// # Errors
    ///
    /// [`OperatorError::UnknownQuery`] for ungenerated names,
    /// [`OperatorError::ReservedKey`] when the payload already carries
    /// the correlation key.
    pub fn query(
        &self,
        query_name: &str,
        payload: Value,
        options: QueryOptions,
    ) -> Result<QueryFuture, OperatorError> {
        let query = self.queries.borrow().get(query_name).cloned().ok_or_else(|| {
            OperatorError::UnknownQuery {
                name: query_name.to_string(),
            }
        })?;
        query(payload, options)
    }
}

fn without_query_id(meta: &Value) -> Value {
    match meta {
        Value::Object(map) => {
            let mut map = map.clone();
            map.shift_remove(QUERY_ID_KEY);
            Value::Object(map)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{EventListener, ListenerTable};
    use crate::value::Value;

    /// Minimal in-memory agent recording outbound triggers.
    #[derive(Clone, Default)]
    struct StubAgent {
        listeners: Rc<RefCell<ListenerTable>>,
        sent: Rc<RefCell<Vec<(String, Value)>>>,
    }

    impl StubAgent {
        fn deliver(&self, event_name: &str, payload: &Value) {
            let listener = self.listeners.borrow().get(event_name);
            if let Some(listener) = listener {
                listener(payload, self).expect("listener");
            }
        }
    }

    impl EventTarget for StubAgent {
        fn send_trigger(&self, event_name: &str, payload: &Value) {
            self.sent
                .borrow_mut()
                .push((event_name.to_string(), payload.clone()));
        }

        fn install_listener(
            &self,
            event_name: &str,
            listener: EventListener,
        ) -> Result<(), RuleDefinitionError> {
            self.listeners.borrow_mut().insert(event_name, listener)
        }

        fn has_listener(&self, event_name: &str) -> bool {
            self.listeners.borrow().contains(event_name)
        }

        fn target_handle(&self) -> Rc<dyn EventTarget> {
            Rc::new(self.clone())
        }
    }

    #[test]
    fn test_trigger_forwards_to_target() {
        let agent = StubAgent::default();
        let operator = BinderOperator::new(agent.clone());
        operator.add_trigger("ev").expect("add");
        operator
            .trigger("ev", &Value::object([("n", Value::from(1))]))
            .expect("trigger");
        assert_eq!(agent.sent.borrow().len(), 1);
        assert_eq!(agent.sent.borrow()[0].0, "ev");
        assert!(matches!(
            operator.trigger("ghost", &Value::Undefined),
            Err(OperatorError::UnknownTrigger { .. })
        ));
    }

    #[test]
    fn test_duplicate_registrations_rejected() {
        let operator = BinderOperator::new(StubAgent::default());
        operator.add_trigger("ev").expect("add");
        assert!(matches!(
            operator.add_trigger("ev"),
            Err(RuleDefinitionError::DuplicateDefinition { .. })
        ));
        operator.add_query("q").expect("add");
        assert!(matches!(
            operator.add_query("q"),
            Err(RuleDefinitionError::DuplicateDefinition { .. })
        ));
    }

    #[test]
    fn test_add_query_rejects_occupied_listener() {
        let agent = StubAgent::default();
        agent
            .install_listener("q-rsp", Rc::new(|_: &Value, _: &dyn EventTarget| Ok(())))
            .expect("listener");
        let operator = BinderOperator::new(agent);
        assert!(matches!(
            operator.add_query("q"),
            Err(RuleDefinitionError::ListenerOccupied { .. })
        ));
    }

    #[tokio::test]
    async fn test_query_round_trip_by_correlation_id() {
        let agent = StubAgent::default();
        let operator = BinderOperator::new(agent.clone());
        operator.add_query("q").expect("add");

        let future = operator
            .query(
                "q",
                Value::object([("a", Value::from(1))]),
                QueryOptions::default(),
            )
            .expect("start");

        // The request went out carrying a correlation id.
        let (event, request) = agent.sent.borrow()[0].clone();
        assert_eq!(event, "q-req");
        let id = request.get(QUERY_ID_KEY).as_str().expect("id").to_string();
        assert_eq!(request.get("a"), &Value::Num(1.0));

        // Feed the response back through the installed listener.
        agent.deliver(
            "q-rsp",
            &Value::object([
                (QUERY_ID_KEY, Value::Str(id)),
                ("ans", Value::from(2)),
            ]),
        );
        let result = future.await.expect("resolve");
        assert_eq!(result, Value::object([("ans", Value::from(2))]));
    }

    #[tokio::test]
    async fn test_query_error_response_rejects() {
        let agent = StubAgent::default();
        let operator = BinderOperator::new(agent.clone());
        operator.add_query("q").expect("add");

        let future = operator
            .query("q", Value::Undefined, QueryOptions::default())
            .expect("start");
        let (_, request) = agent.sent.borrow()[0].clone();
        let id = request.get(QUERY_ID_KEY).as_str().expect("id").to_string();

        agent.deliver(
            "q-ersp",
            &Value::object([
                (QUERY_ID_KEY, Value::Str(id)),
                (QUERY_CAUSE_KEY, Value::from("denied")),
            ]),
        );
        assert_eq!(future.await, Err(QueryError::rejected("denied")));
    }

    #[tokio::test]
    async fn test_late_response_for_unknown_id_ignored() {
        let agent = StubAgent::default();
        let operator = BinderOperator::new(agent.clone());
        operator.add_query("q").expect("add");
        // Nothing pending; a stray response must be silently ignored.
        agent.deliver(
            "q-rsp",
            &Value::object([(QUERY_ID_KEY, Value::from("ghost-id"))]),
        );
    }

    #[test]
    fn test_reserved_key_in_payload_rejected() {
        let operator = BinderOperator::new(StubAgent::default());
        operator.add_query("q").expect("add");
        let result = operator.query(
            "q",
            Value::object([(QUERY_ID_KEY, Value::from("x"))]),
            QueryOptions::default(),
        );
        assert!(matches!(result, Err(OperatorError::ReservedKey { .. })));
    }
}
