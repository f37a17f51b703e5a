//! Ordered-key shape templates for event payloads.
//!
//! An [`EventRule`] declares the distinct keys one event's payload may
//! carry, in a fixed order, optionally binding each key to a
//! [`RuleType`]. The key order is what makes the compact wire form work:
//! an object payload is projected into a positional array by declared
//! order on send, and reassembled (and verified) by the same order on
//! receive.
//!
//! An *untyped* rule knows keys but no types; it is how a peer models an
//! event shape it only learned about from a negotiation packet.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::error::{ProtocolViolation, RuleDefinitionError};
use crate::value::Value;

use super::rule_type::RuleType;

/// Ordered-key shape template for one event's payload.
#[derive(Debug, Clone, Default)]
pub struct EventRule {
    /// Name this rule was registered under; empty until registration.
    pub(crate) event_name: String,
    /// Negotiated short code, if any.
    pub(crate) short_name: Option<String>,

    keys: Vec<String>,
    key_set: HashSet<String>,
    /// Per-key rules; `None` marks the whole rule untyped.
    rules: Option<HashMap<String, RuleType>>,
}

impl EventRule {
    /// Create a typed rule from `(key, rule)` pairs, keeping key order.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateKey`] on a repeated key.
    pub fn typed(pairs: Vec<(&str, RuleType)>) -> Result<EventRule, RuleDefinitionError> {
        let mut ret = EventRule {
            rules: Some(HashMap::new()),
            ..EventRule::default()
        };
        for (key, rule) in pairs {
            ret.add_param(key, Some(rule))?;
        }
        Ok(ret)
    }

    /// Create an untyped rule from a key list; payload verification is
    /// skipped for untyped rules.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateKey`] on a repeated key.
    pub fn untyped<K: Into<String>, I: IntoIterator<Item = K>>(
        keys: I,
    ) -> Result<EventRule, RuleDefinitionError> {
        let mut ret = EventRule::default();
        for key in keys {
            ret.add_param(&key.into(), None)?;
        }
        Ok(ret)
    }

    /// Copy of this rule's keys and types, detached from any registration.
    pub fn detached_copy(&self) -> EventRule {
        EventRule {
            event_name: String::new(),
            short_name: None,
            keys: self.keys.clone(),
            key_set: self.key_set.clone(),
            rules: self.rules.clone(),
        }
    }

    /// Copy of this rule's keys only, detached and untyped.
    pub fn untyped_copy(&self) -> EventRule {
        EventRule {
            event_name: String::new(),
            short_name: None,
            keys: self.keys.clone(),
            key_set: self.key_set.clone(),
            rules: None,
        }
    }

    /// Whether the rule declares the given key.
    pub fn has_key(&self, key: &str) -> bool {
        self.key_set.contains(key)
    }

    /// Whether the rule carries per-key types.
    pub fn is_typed(&self) -> bool {
        self.rules.is_some()
    }

    /// The declared keys, in order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Name this rule was registered under; empty while unregistered.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// The negotiated short code, if one is attached.
    pub fn short_name(&self) -> Option<&str> {
        self.short_name.as_deref()
    }

    /// Append a key at the end of the key list. Typed rules require a
    /// rule for the new key; untyped rules ignore it.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateKey`] /
    /// [`RuleDefinitionError::MissingRuleType`].
    pub fn add_param(&mut self, key: &str, rule: Option<RuleType>) -> Result<(), RuleDefinitionError> {
        self.insert_param(key, rule, false)
    }

    /// Prepend a key at the front of the key list.
    ///
    /// # Errors
    ///
    /// Same as [`EventRule::add_param`].
    pub fn add_param_front(
        &mut self,
        key: &str,
        rule: Option<RuleType>,
    ) -> Result<(), RuleDefinitionError> {
        self.insert_param(key, rule, true)
    }

    fn insert_param(
        &mut self,
        key: &str,
        rule: Option<RuleType>,
        front: bool,
    ) -> Result<(), RuleDefinitionError> {
        if self.key_set.contains(key) {
            return Err(RuleDefinitionError::DuplicateKey {
                key: key.to_string(),
            });
        }
        if let Some(rules) = &mut self.rules {
            let Some(rule) = rule else {
                return Err(RuleDefinitionError::MissingRuleType {
                    key: key.to_string(),
                });
            };
            rules.insert(key.to_string(), rule);
        }
        self.key_set.insert(key.to_string());
        if front {
            self.keys.insert(0, key.to_string());
        } else {
            self.keys.push(key.to_string());
        }
        Ok(())
    }

    /// Reorder the key list. The new order must contain exactly the keys
    /// already declared; membership never changes. Used to reconcile a
    /// lazily learned rule's order with the authoritative order carried in
    /// a negotiation packet.
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation::KeyListMismatch`] on a length, duplicate or
    /// membership mismatch.
    pub fn reset_key_list(&mut self, new_keys: &[String]) -> Result<(), ProtocolViolation> {
        let mismatch = || ProtocolViolation::KeyListMismatch {
            event: self.event_name.clone(),
        };
        if new_keys.len() != self.keys.len() {
            return Err(mismatch());
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for key in new_keys {
            if !seen.insert(key) || !self.key_set.contains(key) {
                return Err(mismatch());
            }
        }
        self.keys = new_keys.to_vec();
        Ok(())
    }

    /// Verify an object payload and return a fresh object holding only
    /// declared keys, in declared order. Every present key must be
    /// declared; every declared key is checked against its rule with the
    /// absent value standing in for missing keys, so optionality must be
    /// expressed by a rule that accepts `Undefined`.
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation`] variants for undeclared keys, rule
    /// mismatches, non-object bodies and untyped rules.
    pub fn verify_get_object(&self, src: &Value) -> Result<Value, ProtocolViolation> {
        let rules = self.rules.as_ref().ok_or_else(|| ProtocolViolation::UntypedRule {
            event: self.event_name.clone(),
        })?;
        let empty = IndexMap::new();
        let map = match src {
            Value::Undefined | Value::Null => &empty,
            Value::Object(map) => map,
            _ => {
                return Err(ProtocolViolation::BodyNotObject {
                    event: self.event_name.clone(),
                })
            }
        };
        for key in map.keys() {
            if !self.key_set.contains(key) {
                return Err(ProtocolViolation::UndeclaredKey {
                    event: self.event_name.clone(),
                    key: key.clone(),
                });
            }
        }
        let mut out = IndexMap::new();
        for key in &self.keys {
            let rule = rules.get(key).ok_or_else(|| ProtocolViolation::ValueMismatch {
                event: self.event_name.clone(),
                key: key.clone(),
            })?;
            let value = map.get(key).unwrap_or(&crate::value::UNDEFINED);
            if !rule.verify(value) {
                return Err(ProtocolViolation::ValueMismatch {
                    event: self.event_name.clone(),
                    key: key.clone(),
                });
            }
            if !value.is_undefined() {
                out.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Object(out))
    }

    /// Verify a positional payload and return the equivalent object.
    /// Position `i` is checked against declared key `i`'s rule; the array
    /// must not be longer than the key list.
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation`] variants for oversized arrays, rule
    /// mismatches, non-array bodies and untyped rules.
    pub fn verify_get_array(&self, src: &Value) -> Result<Value, ProtocolViolation> {
        let rules = self.rules.as_ref().ok_or_else(|| ProtocolViolation::UntypedRule {
            event: self.event_name.clone(),
        })?;
        let empty = Vec::new();
        let items = match src {
            Value::Undefined | Value::Null => &empty,
            Value::Array(items) => items,
            _ => {
                return Err(ProtocolViolation::BodyNotArray {
                    event: self.event_name.clone(),
                })
            }
        };
        if items.len() > self.keys.len() {
            return Err(ProtocolViolation::ArrayTooLong {
                event: self.event_name.clone(),
                len: items.len(),
                declared: self.keys.len(),
            });
        }
        let mut out = IndexMap::new();
        for (index, key) in self.keys.iter().enumerate() {
            let rule = rules.get(key).ok_or_else(|| ProtocolViolation::ValueMismatch {
                event: self.event_name.clone(),
                key: key.clone(),
            })?;
            let value = items.get(index).unwrap_or(&crate::value::UNDEFINED);
            if !rule.verify(value) {
                return Err(ProtocolViolation::ValueMismatch {
                    event: self.event_name.clone(),
                    key: key.clone(),
                });
            }
            if !value.is_undefined() {
                out.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Object(out))
    }

    /// Project an object payload into the positional array form, by
    /// declared key order. A trailing run of absent keys is omitted
    /// entirely; `None` when no declared key was present at all.
    pub fn meta_obj_to_array(&self, src: &Value) -> Option<Value> {
        let empty = IndexMap::new();
        let map = match src {
            Value::Object(map) => map,
            _ => &empty,
        };
        let mut out: Vec<Value> = self
            .keys
            .iter()
            .map(|key| map.get(key).cloned().unwrap_or(Value::Undefined))
            .collect();
        while matches!(out.last(), Some(Value::Undefined)) {
            out.pop();
        }
        if out.is_empty() {
            None
        } else {
            Some(Value::Array(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule() -> EventRule {
        EventRule::typed(vec![
            ("a", RuleType::number()),
            ("b", RuleType::string().merge(&RuleType::undefined()).expect("merge")),
            ("c", RuleType::boolean().merge(&RuleType::undefined()).expect("merge")),
        ])
        .expect("rule")
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let result = EventRule::typed(vec![
            ("a", RuleType::number()),
            ("a", RuleType::string()),
        ]);
        assert!(matches!(
            result,
            Err(RuleDefinitionError::DuplicateKey { .. })
        ));
        assert!(EventRule::untyped(["x", "x"]).is_err());
    }

    #[test]
    fn test_verify_get_object() {
        let rule = sample_rule();
        let payload = Value::object([("a", Value::from(1)), ("b", Value::from("s"))]);
        let out = rule.verify_get_object(&payload).expect("verify");
        assert_eq!(
            out,
            Value::object([("a", Value::from(1)), ("b", Value::from("s"))])
        );
    }

    #[test]
    fn test_verify_get_object_undeclared_key() {
        let rule = sample_rule();
        let payload = Value::object([("a", Value::from(1)), ("z", Value::from(2))]);
        assert!(matches!(
            rule.verify_get_object(&payload),
            Err(ProtocolViolation::UndeclaredKey { .. })
        ));
    }

    #[test]
    fn test_verify_get_object_missing_required() {
        let rule = sample_rule();
        // "a" requires a number; absence verifies as Undefined and fails.
        let payload = Value::object([("b", Value::from("s"))]);
        assert!(matches!(
            rule.verify_get_object(&payload),
            Err(ProtocolViolation::ValueMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_get_object_empty_body() {
        let rule = EventRule::typed(vec![(
            "opt",
            RuleType::string().merge(&RuleType::undefined()).expect("merge"),
        )])
        .expect("rule");
        let out = rule.verify_get_object(&Value::Undefined).expect("verify");
        assert_eq!(out, Value::object([] as [(&str, Value); 0]));
    }

    #[test]
    fn test_verify_get_array() {
        let rule = sample_rule();
        let payload = Value::array([Value::from(1), Value::from("s"), Value::Bool(true)]);
        let out = rule.verify_get_array(&payload).expect("verify");
        assert_eq!(
            out,
            Value::object([
                ("a", Value::from(1)),
                ("b", Value::from("s")),
                ("c", Value::Bool(true)),
            ])
        );
    }

    #[test]
    fn test_verify_get_array_too_long() {
        let rule = sample_rule();
        let payload = Value::array([
            Value::from(1),
            Value::from("s"),
            Value::Bool(true),
            Value::from(9),
        ]);
        assert!(matches!(
            rule.verify_get_array(&payload),
            Err(ProtocolViolation::ArrayTooLong { .. })
        ));
    }

    #[test]
    fn test_verify_get_array_position_mismatch() {
        let rule = sample_rule();
        let payload = Value::array([Value::from("not a number")]);
        assert!(matches!(
            rule.verify_get_array(&payload),
            Err(ProtocolViolation::ValueMismatch { .. })
        ));
    }

    #[test]
    fn test_meta_obj_to_array_trailing_absent() {
        let rule = sample_rule();
        let payload = Value::object([("a", Value::from(1))]);
        assert_eq!(
            rule.meta_obj_to_array(&payload),
            Some(Value::array([Value::from(1)]))
        );
        // Middle absence is kept as Undefined, trailing absence dropped.
        let payload = Value::object([("a", Value::from(1)), ("c", Value::Bool(true))]);
        assert_eq!(
            rule.meta_obj_to_array(&payload),
            Some(Value::array([
                Value::from(1),
                Value::Undefined,
                Value::Bool(true)
            ]))
        );
        assert_eq!(
            rule.meta_obj_to_array(&Value::object([] as [(&str, Value); 0])),
            None
        );
        assert_eq!(rule.meta_obj_to_array(&Value::Undefined), None);
    }

    #[test]
    fn test_array_object_transcoding_round_trip() {
        let rule = sample_rule();
        let payload = Value::object([
            ("a", Value::from(3)),
            ("b", Value::from("hi")),
            ("c", Value::Bool(false)),
        ]);
        let array = rule.meta_obj_to_array(&payload).expect("array form");
        let from_array = rule.verify_get_array(&array).expect("verify array");
        let from_object = rule.verify_get_object(&payload).expect("verify object");
        assert_eq!(from_array, from_object);
    }

    #[test]
    fn test_untyped_rule_cannot_verify() {
        let rule = EventRule::untyped(["a", "b"]).expect("rule");
        assert!(!rule.is_typed());
        assert!(matches!(
            rule.verify_get_object(&Value::Undefined),
            Err(ProtocolViolation::UntypedRule { .. })
        ));
        assert!(matches!(
            rule.verify_get_array(&Value::Undefined),
            Err(ProtocolViolation::UntypedRule { .. })
        ));
        // Projection still works without types.
        assert_eq!(
            rule.meta_obj_to_array(&Value::object([("b", Value::from(2))])),
            Some(Value::array([Value::Undefined, Value::from(2)]))
        );
    }

    #[test]
    fn test_reset_key_list() {
        let mut rule = sample_rule();
        let new_order = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        rule.reset_key_list(&new_order).expect("reset");
        assert_eq!(rule.keys(), &["c", "a", "b"]);

        assert!(rule.reset_key_list(&["a".to_string()]).is_err());
        assert!(rule
            .reset_key_list(&["a".to_string(), "a".to_string(), "b".to_string()])
            .is_err());
        assert!(rule
            .reset_key_list(&["a".to_string(), "b".to_string(), "z".to_string()])
            .is_err());
    }

    #[test]
    fn test_add_param_front() {
        let mut rule = sample_rule();
        rule.add_param_front("id", Some(RuleType::string())).expect("add");
        assert_eq!(rule.keys()[0], "id");
        assert!(rule.has_key("id"));
        // Typed rules insist on a rule for new keys.
        assert!(matches!(
            rule.add_param("late", None),
            Err(RuleDefinitionError::MissingRuleType { .. })
        ));
    }

    #[test]
    fn test_copies_are_detached() {
        let mut rule = sample_rule();
        rule.event_name = "ev".to_string();
        rule.short_name = Some("0".to_string());
        let copy = rule.detached_copy();
        assert_eq!(copy.event_name(), "");
        assert_eq!(copy.short_name(), None);
        assert_eq!(copy.keys(), rule.keys());
        assert!(copy.is_typed());

        let untyped = rule.untyped_copy();
        assert_eq!(untyped.keys(), rule.keys());
        assert!(!untyped.is_typed());
    }
}
