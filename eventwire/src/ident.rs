//! Base-36 encoding and unique identifier generation.
//!
//! Identifiers are built from a base-36 millisecond timestamp followed by
//! base-36 random sections, joined by `-`: only lowercase letters, digits
//! and single interior hyphens. Short codes in
//! [`crate::rule::MappingRules`] use the same base-36 alphabet, so both
//! kinds of token stay within the prefix character class the wire format
//! dispatches on.

use rand::Rng;

/// 36^8, the exclusive bound of one random identifier section.
const SECTION_BOUND: u64 = 2_821_109_907_456;

/// Encode a number in lowercase base-36.
pub(crate) fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Generate a unique identifier string with two random sections.
///
/// Used as the correlation id for in-flight queries.
pub fn unique_identifier() -> String {
    unique_identifier_with_sections(2)
}

/// Generate a unique identifier string with a chosen number of random
/// sections appended to the timestamp part.
pub fn unique_identifier_with_sections(sections: usize) -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let mut ret = to_base36(millis);
    let mut rng = rand::thread_rng();
    for _ in 0..sections {
        ret.push('-');
        ret.push_str(&to_base36(rng.gen_range(0..SECTION_BOUND)));
    }
    ret
}
