//! Error types for the protocol core.
//!
//! Three registration-time/runtime families plus the query-level error
//! that crosses the wire:
//!
//! - [`RuleDefinitionError`]: raised while declaring rules, binders and
//!   operators, before any traffic flows.
//! - [`ProtocolViolation`]: raised synchronously from `receive_data` when a
//!   packet cannot be decoded; fatal to the call, never retried.
//! - [`QueryError`]: an application-level query rejection (or the locally
//!   raised timeout), serializable because its cause travels as protocol
//!   data rather than as a crash.
//! - [`OperatorError`]: misuse of a generated operator call surface.

use serde::{Deserialize, Serialize};

/// Errors raised while declaring rules, before traffic begins.
#[derive(Debug, thiserror::Error)]
pub enum RuleDefinitionError {
    /// The same key appears twice in one rule template.
    #[error("duplicate key in rule template: {key}")]
    DuplicateKey {
        /// The repeated key.
        key: String,
    },

    /// A typed rule template is missing the rule for one of its keys.
    #[error("missing rule type for key: {key}")]
    MissingRuleType {
        /// The key without a rule.
        key: String,
    },

    /// An event with this name is already registered.
    #[error("event name already registered: {name}")]
    DuplicateEventName {
        /// The conflicting event name.
        name: String,
    },

    /// The short code is already mapped to a different event rule.
    #[error("short code already in use: {short}")]
    DuplicateShortCode {
        /// The conflicting short code.
        short: String,
    },

    /// A second, different short code was assigned to one event rule.
    #[error("event {name} already carries a different short code")]
    ShortCodeConflict {
        /// The event whose code was already set.
        name: String,
    },

    /// The named event is not registered in this registry.
    #[error("event {name} is not registered here")]
    NotRegistered {
        /// The unknown event name.
        name: String,
    },

    /// A payload rule uses a key reserved by the query machinery.
    #[error("reserved key used in payload rule: {key}")]
    ReservedKey {
        /// The reserved key.
        key: String,
    },

    /// Event names are restricted to ASCII alphanumerics and underscores.
    #[error("invalid event name: {name:?}")]
    InvalidEventName {
        /// The rejected name.
        name: String,
    },

    /// A binder entry names an event it holds no rule for.
    #[error("rule for event {name} is missing")]
    MissingRule {
        /// The event without a rule.
        name: String,
    },

    /// The target already holds a listener for this event.
    #[error("listener slot for event {name} is already occupied")]
    ListenerOccupied {
        /// The occupied event name.
        name: String,
    },

    /// A rule, listener, processor, trigger or query was defined twice.
    #[error("{name} is defined repeatedly")]
    DuplicateDefinition {
        /// The repeated name.
        name: String,
    },

    /// Query declaration requires an opposite binder bound first.
    #[error("no opposite binder is bound")]
    OppositeMissing,

    /// The binder is already paired with a different opposite.
    #[error("binder is already bound to another opposite")]
    OppositeAlreadyBound,

    /// A binder cannot be its own opposite.
    #[error("a binder cannot be its own opposite")]
    SelfOpposite,

    /// The binder's boundedness does not match the apply target.
    #[error("binder boundedness does not match the target")]
    WrongBinding,

    /// Both operands of a merge/intersect restrict the same structural
    /// shape; the combination cannot be expressed losslessly.
    #[error("cannot combine rules that both restrict {shape} shapes")]
    StructuralCombine {
        /// Which structural shape clashed.
        shape: &'static str,
    },

    /// Both operands carry different values for the same sub-parameter.
    #[error("cannot combine conflicting {what} constraints")]
    ConstraintConflict {
        /// Which sub-parameter clashed.
        what: &'static str,
    },

    /// NaN was passed as a numeric bound.
    #[error("NaN cannot be used as a bound")]
    NanBound,
}

/// Errors raised synchronously from `receive_data`; fatal to the call.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolViolation {
    /// The packet prefix carries a short code nobody registered.
    #[error("unknown short code: {short}")]
    UnknownShortCode {
        /// The unknown code.
        short: String,
    },

    /// The packet prefix names an event nobody registered.
    #[error("unknown event name: {name}")]
    UnknownEventName {
        /// The unknown name.
        name: String,
    },

    /// The prefix's lead character selects no packet kind.
    #[error("unrecognized packet prefix: {prefix:?}")]
    BadPrefix {
        /// The offending prefix.
        prefix: String,
    },

    /// A payload value failed its declared rule.
    #[error("payload for {event} failed verification at key {key}")]
    ValueMismatch {
        /// The event whose payload failed.
        event: String,
        /// The failing key.
        key: String,
    },

    /// The payload carries a key the rule never declared.
    #[error("undeclared key {key} in payload for {event}")]
    UndeclaredKey {
        /// The event whose payload failed.
        event: String,
        /// The undeclared key.
        key: String,
    },

    /// A positional payload is longer than the declared key list.
    #[error("positional payload for {event} has {len} items but {declared} declared keys")]
    ArrayTooLong {
        /// The event whose payload failed.
        event: String,
        /// Payload length.
        len: usize,
        /// Declared key count.
        declared: usize,
    },

    /// The named form requires an object body.
    #[error("payload for {event} is not an object")]
    BodyNotObject {
        /// The event whose payload failed.
        event: String,
    },

    /// The positional form requires an array body.
    #[error("payload for {event} is not an array")]
    BodyNotArray {
        /// The event whose payload failed.
        event: String,
    },

    /// The rule is untyped and cannot verify payloads.
    #[error("rule for {event} is untyped and cannot verify payloads")]
    UntypedRule {
        /// The untyped event.
        event: String,
    },

    /// A negotiation packet body failed its structural rule.
    #[error("malformed negotiation body for {event}")]
    MalformedNegotiation {
        /// The event being negotiated.
        event: String,
    },

    /// A negotiation step was rejected by the local registry.
    #[error("negotiation for {event} was rejected: {message}")]
    NegotiationRejected {
        /// The event being negotiated.
        event: String,
        /// Stringified registry error.
        message: String,
    },

    /// A reconciled key list does not match the declared key membership.
    #[error("reconciled key list for {event} does not match the declared keys")]
    KeyListMismatch {
        /// The event being reconciled.
        event: String,
    },

    /// The peer keeps sending the verbose form long after the short code
    /// for this event was advertised to it.
    #[error("peer ignores the advertised short code for {event}")]
    StaleAdvertisement {
        /// The advertised event.
        event: String,
    },
}

/// Query-level error, delivered to the remote caller as protocol data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum QueryError {
    /// The processor explicitly rejected the query.
    #[error("query rejected: {}", cause.as_deref().unwrap_or("unspecified"))]
    Rejected {
        /// Application-supplied cause, if one was given.
        cause: Option<String>,
    },

    /// The query's deadline elapsed unanswered; raised locally.
    #[error("query timed out")]
    Timeout,
}

impl QueryError {
    /// Rejection with an explicit cause.
    pub fn rejected(cause: impl Into<String>) -> Self {
        QueryError::Rejected {
            cause: Some(cause.into()),
        }
    }

    /// The cause string carried to the remote caller. Timeouts carry the
    /// fixed cause `"Timeout"`.
    pub fn wire_cause(&self) -> Option<String> {
        match self {
            QueryError::Rejected { cause } => cause.clone(),
            QueryError::Timeout => Some("Timeout".to_string()),
        }
    }
}

/// Misuse of a generated operator call surface.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// No trigger was generated under this name.
    #[error("no trigger named {name}")]
    UnknownTrigger {
        /// The unknown trigger name.
        name: String,
    },

    /// No query was generated under this name.
    #[error("no query named {name}")]
    UnknownQuery {
        /// The unknown query name.
        name: String,
    },

    /// The caller's payload already uses an internally reserved key.
    #[error("payload already contains the reserved key {key}")]
    ReservedKey {
        /// The reserved key.
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_wire_cause() {
        assert_eq!(
            QueryError::rejected("denied").wire_cause(),
            Some("denied".to_string())
        );
        assert_eq!(QueryError::Rejected { cause: None }.wire_cause(), None);
        assert_eq!(QueryError::Timeout.wire_cause(), Some("Timeout".to_string()));
    }

    #[test]
    fn test_query_error_serde_roundtrip() {
        let errors = vec![
            QueryError::rejected("boom"),
            QueryError::Rejected { cause: None },
            QueryError::Timeout,
        ];
        for error in errors {
            let json = serde_json::to_string(&error).expect("serialize");
            let back: QueryError = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(error, back);
        }
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(QueryError::Timeout.to_string(), "query timed out");
        let violation = ProtocolViolation::UnknownShortCode {
            short: "3f".to_string(),
        };
        assert_eq!(violation.to_string(), "unknown short code: 3f");
    }
}
