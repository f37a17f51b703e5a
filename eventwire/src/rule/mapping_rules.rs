//! Per-direction event registry.
//!
//! One [`MappingRules`] instance indexes the [`EventRule`]s of a single
//! traffic direction, by event name (total) and by short code (partial).
//! Registration consumes the rule, so a rule can never belong to two
//! registries.
//!
//! Short codes are successive base-36 encodings of a monotonically
//! increasing counter, skipping values already taken. The two
//! registration modes mirror the negotiation scheme: eager assignment for
//! the authoritative side, code-less registration for rules whose code is
//! learned later from the peer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RuleDefinitionError;
use crate::ident::to_base36;

use super::event_rule::EventRule;

/// Registry mapping event name ↔ rule ↔ short code for one direction.
#[derive(Debug, Default)]
pub struct MappingRules {
    by_name: HashMap<String, Rc<RefCell<EventRule>>>,
    by_short: HashMap<String, Rc<RefCell<EventRule>>>,
    short_count: u64,
}

impl MappingRules {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a rule by its short code.
    pub fn rule_by_short(&self, short: &str) -> Option<Rc<RefCell<EventRule>>> {
        self.by_short.get(short).cloned()
    }

    /// Look up a rule by its event name.
    pub fn rule_by_name(&self, name: &str) -> Option<Rc<RefCell<EventRule>>> {
        self.by_name.get(name).cloned()
    }

    /// Register a rule and eagerly assign it the next free short code.
    /// Used for the direction this side is authoritative over.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateEventName`] when the name is taken.
    pub fn register_with_code(
        &mut self,
        name: &str,
        rule: EventRule,
    ) -> Result<(), RuleDefinitionError> {
        if self.by_name.contains_key(name) {
            return Err(RuleDefinitionError::DuplicateEventName {
                name: name.to_string(),
            });
        }
        let short = self.next_short();
        let mut rule = rule;
        rule.event_name = name.to_string();
        rule.short_name = Some(short.clone());
        let rule = Rc::new(RefCell::new(rule));
        self.by_name.insert(name.to_string(), Rc::clone(&rule));
        self.by_short.insert(short, rule);
        Ok(())
    }

    /// Register a rule without a short code; the code may be attached
    /// later via [`MappingRules::assign_code`] once negotiated.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateEventName`] when the name is taken.
    pub fn register(&mut self, name: &str, rule: EventRule) -> Result<(), RuleDefinitionError> {
        if self.by_name.contains_key(name) {
            return Err(RuleDefinitionError::DuplicateEventName {
                name: name.to_string(),
            });
        }
        let mut rule = rule;
        rule.event_name = name.to_string();
        rule.short_name = None;
        self.by_name
            .insert(name.to_string(), Rc::new(RefCell::new(rule)));
        Ok(())
    }

    /// Attach a negotiated short code to a registered rule.
    ///
    /// Re-assigning the code a rule already carries is a no-op; assigning
    /// a second, different code is rejected, as is a code another rule
    /// already uses.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::NotRegistered`],
    /// [`RuleDefinitionError::ShortCodeConflict`],
    /// [`RuleDefinitionError::DuplicateShortCode`].
    pub fn assign_code(&mut self, short: &str, name: &str) -> Result<(), RuleDefinitionError> {
        let Some(rule) = self.by_name.get(name) else {
            return Err(RuleDefinitionError::NotRegistered {
                name: name.to_string(),
            });
        };
        let existing = rule.borrow().short_name.clone();
        if let Some(current) = existing {
            if current == short {
                return Ok(());
            }
            return Err(RuleDefinitionError::ShortCodeConflict {
                name: name.to_string(),
            });
        }
        if self.by_short.contains_key(short) {
            return Err(RuleDefinitionError::DuplicateShortCode {
                short: short.to_string(),
            });
        }
        rule.borrow_mut().short_name = Some(short.to_string());
        self.by_short.insert(short.to_string(), Rc::clone(rule));
        Ok(())
    }

    fn next_short(&mut self) -> String {
        loop {
            let short = to_base36(self.short_count);
            self.short_count += 1;
            if !self.by_short.contains_key(&short) {
                return short;
            }
        }
    }
}
