//! The type algebra and the shape/registry layer built on it.
//!
//! - [`RuleType`]: structural runtime type descriptor and verifier.
//! - [`EventRule`]: ordered-key shape template for one event's payload.
//! - [`MappingRules`]: per-direction registry mapping name ↔ rule ↔
//!   short code.

mod event_rule;
mod mapping_rules;
mod rule_type;

pub use event_rule::EventRule;
pub use mapping_rules::MappingRules;
pub use rule_type::{ContainerKind, RuleType};
