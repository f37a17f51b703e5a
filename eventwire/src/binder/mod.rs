//! Declarative rule binding and the RPC operator layer.
//!
//! - [`RuleBinder`]: collects rules/listeners/queries for one side and
//!   applies them onto live agents.
//! - [`BinderOperator`]: the generated trigger/query call surface bound
//!   to one agent, owning the in-flight query correlation table.

mod operator;
mod query;
mod rule_binder;

pub use operator::BinderOperator;
pub use query::{QueryFuture, QueryOptions, TimeoutBehavior};
pub use rule_binder::{Bound, RuleBinder};
