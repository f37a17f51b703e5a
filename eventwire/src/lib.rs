//! # eventwire
//!
//! Typed, bidirectional event messaging over an abstract transport.
//!
//! Two connected peers declare named events with strongly-typed payload
//! shapes, exchange them using a bandwidth-saving short-code negotiation
//! scheme, and layer request/response queries with timeout semantics on
//! top of plain events. Framing, sockets and security stay with the
//! host: the core hands finished `{prefix, body}` packets to a sink and
//! consumes deframed packets through `receive_data`.
//!
//! This crate provides:
//! - **Rule layer**: [`RuleType`] structural checking, [`EventRule`]
//!   shape templates, [`MappingRules`] name/short-code registries
//! - **Protocol agents**: [`Server`], [`ServerClient`], [`Client`] —
//!   packet encode/decode, negotiation state machine, dispatch
//! - **Binder layer**: [`RuleBinder`] declarative aggregation and
//!   [`BinderOperator`] trigger/query call surfaces with correlation-id
//!   RPC
//!
//! Everything is single-threaded and event-driven; the only suspension
//! points are awaited [`QueryFuture`]s and spawned query processors.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Protocol agents and the packet/listener surface.
pub mod agent;

/// Rule binding and the RPC operator layer.
pub mod binder;

/// Error types for registration, protocol and query failures.
pub mod error;

/// Base-36 and unique identifier helpers.
pub mod ident;

/// The structural type algebra and event registries.
pub mod rule;

/// The runtime payload value model.
pub mod value;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use agent::{
    Client, EventListener, EventTarget, ListenerError, Packet, ProtocolConfig, Server,
    ServerClient,
};
pub use binder::{BinderOperator, Bound, QueryFuture, QueryOptions, RuleBinder, TimeoutBehavior};
pub use error::{OperatorError, ProtocolViolation, QueryError, RuleDefinitionError};
pub use ident::unique_identifier;
pub use rule::{ContainerKind, EventRule, MappingRules, RuleType};
pub use value::Value;
