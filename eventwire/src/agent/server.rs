//! Server-side context shared by all connections.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RuleDefinitionError;
use crate::rule::{EventRule, MappingRules};

use super::config::ProtocolConfig;
use super::server_client::ServerClient;

/// A server context: the two per-direction rule registries shared by
/// every connection, plus the configuration handed to each of them.
///
/// Both registries assign short codes eagerly; the server is the
/// authoritative side of the negotiation for both directions. Register
/// all rules before traffic begins — the registries are read-mostly
/// afterwards and connections only borrow them.
pub struct Server {
    server_rules: Rc<RefCell<MappingRules>>,
    client_rules: Rc<RefCell<MappingRules>>,
    config: ProtocolConfig,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Server with default configuration.
    pub fn new() -> Self {
        Self::with_config(ProtocolConfig::default())
    }

    /// Server with explicit configuration, propagated to every
    /// connection it creates.
    pub fn with_config(config: ProtocolConfig) -> Self {
        Self {
            server_rules: Rc::new(RefCell::new(MappingRules::new())),
            client_rules: Rc::new(RefCell::new(MappingRules::new())),
            config,
        }
    }

    /// Register a rule for an event this server handles.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateEventName`] when the name is taken.
    pub fn add_server_event_rule(
        &self,
        event_name: &str,
        rule: EventRule,
    ) -> Result<(), RuleDefinitionError> {
        self.server_rules
            .borrow_mut()
            .register_with_code(event_name, rule)
    }

    /// Register a rule for an event the connected clients handle.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateEventName`] when the name is taken.
    pub fn add_client_event_rule(
        &self,
        event_name: &str,
        rule: EventRule,
    ) -> Result<(), RuleDefinitionError> {
        self.client_rules
            .borrow_mut()
            .register_with_code(event_name, rule)
    }

    /// Create the per-connection agent for a newly accepted client.
    pub fn create_client(&self) -> ServerClient {
        ServerClient::create(
            Rc::clone(&self.server_rules),
            Rc::clone(&self.client_rules),
            self.config.clone(),
        )
    }

    pub(crate) fn server_rules(&self) -> &Rc<RefCell<MappingRules>> {
        &self.server_rules
    }

    pub(crate) fn client_rules(&self) -> &Rc<RefCell<MappingRules>> {
        &self.client_rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleType;

    #[test]
    fn test_rules_shared_across_connections() {
        let server = Server::new();
        let a = server.create_client();
        server
            .add_server_event_rule(
                "ping",
                EventRule::typed(vec![("n", RuleType::integer())]).expect("rule"),
            )
            .expect("register");
        let b = server.create_client();

        // Both connections see the rule, whenever they were created.
        let body = crate::value::Value::array([crate::value::Value::from(1)]);
        assert!(a.receive_data("0", &body).is_ok());
        assert!(b.receive_data("0", &body).is_ok());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let server = Server::new();
        let rule = || EventRule::typed(vec![("n", RuleType::integer())]).expect("rule");
        server.add_server_event_rule("ping", rule()).expect("first");
        assert!(server.add_server_event_rule("ping", rule()).is_err());
        server.add_client_event_rule("pong", rule()).expect("first");
        assert!(server.add_client_event_rule("pong", rule()).is_err());
    }
}
