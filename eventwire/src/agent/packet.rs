//! Wire packet shape and prefix dispatch.
//!
//! A packet is a `(prefix, body)` pair; framing and transport belong to
//! the host. The first character of the prefix selects the packet kind:
//!
//! - digit or lowercase letter: short-code dispatch, positional body
//! - `*name`: verbose dispatch by event name, object body
//! - `=name`: short-code advertisement for a server-owned event
//! - `+name`: short-code attachment for a client-owned event, optionally
//!   delivering the first payload in the same packet
//!
//! Anything else is a protocol error. Negotiation bodies are validated
//! with in-crate [`RuleType`] rules before being taken apart.

use serde::{Deserialize, Serialize};

use crate::rule::RuleType;
use crate::value::Value;

/// One deframed wire packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Routing prefix; its first character selects the packet kind.
    pub prefix: String,
    /// Payload body; shape depends on the packet kind.
    pub body: Value,
}

impl Packet {
    /// Bundle a prefix and body into a packet.
    pub fn new(prefix: impl Into<String>, body: Value) -> Self {
        Packet {
            prefix: prefix.into(),
            body,
        }
    }
}

/// Decoded packet kind, borrowed from the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrefixKind<'a> {
    /// Short-code dispatch; the whole prefix is the code.
    Short(&'a str),
    /// Verbose dispatch by event name.
    Verbose(&'a str),
    /// `=name`: server advertises a short code for its own event.
    Advert(&'a str),
    /// `+name`: a client-owned event's code attached to its first payload.
    Attach(&'a str),
    /// Empty prefix; ignored.
    Empty,
    /// No packet kind matches.
    Invalid,
}

/// Classify a prefix by its first character.
pub(crate) fn classify(prefix: &str) -> PrefixKind<'_> {
    let Some(first) = prefix.chars().next() else {
        return PrefixKind::Empty;
    };
    match first {
        '*' => PrefixKind::Verbose(&prefix[1..]),
        '=' => PrefixKind::Advert(&prefix[1..]),
        '+' => PrefixKind::Attach(&prefix[1..]),
        '0'..='9' | 'a'..='z' => PrefixKind::Short(prefix),
        _ => PrefixKind::Invalid,
    }
}

/// Body rule for `=` advertisement packets: `{key: [string...], short}`.
pub(crate) fn advert_body_rule() -> RuleType {
    RuleType::object(vec![
        ("key", RuleType::array(vec![], Some(RuleType::string()))),
        ("short", RuleType::string()),
    ])
    .expect("advert body rule is statically valid")
}

/// Body rule for `+` attachment packets:
/// `{key: [string...], short, value?: [...]}`.
pub(crate) fn attach_body_rule() -> RuleType {
    RuleType::object_with(
        vec![
            ("key", RuleType::array(vec![], Some(RuleType::string()))),
            ("short", RuleType::string()),
        ],
        vec![("value", RuleType::array(vec![], Some(RuleType::any())))],
        None,
    )
    .expect("attach body rule is statically valid")
}

/// A negotiation packet body, taken apart after rule validation.
pub(crate) struct NegotiationBody {
    pub keys: Vec<String>,
    pub short: String,
    pub value: Option<Value>,
}

/// Extract the fields of a negotiation body. `None` when the shape does
/// not line up (callers report a malformed-negotiation violation).
pub(crate) fn parse_negotiation(body: &Value) -> Option<NegotiationBody> {
    let keys = match body.get("key") {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<String>>>()?,
        _ => return None,
    };
    let short = body.get("short").as_str()?.to_string();
    let value = match body.get("value") {
        Value::Undefined => None,
        value => Some(value.clone()),
    };
    Some(NegotiationBody { keys, short, value })
}

/// Project a key list into its wire form.
pub(crate) fn keys_value(keys: &[String]) -> Value {
    Value::Array(keys.iter().map(|k| Value::Str(k.clone())).collect())
}
