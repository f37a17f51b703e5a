//! Configuration for protocol agent behavior.

use std::time::Duration;

/// Tunables shared by a server and the connections it creates.
#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    /// How long after advertising an event's short code the peer may keep
    /// sending that event in verbose form. A verbose packet arriving past
    /// this window is treated as a protocol violation.
    pub advert_stale_after: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            advert_stale_after: Duration::from_secs(60),
        }
    }
}

impl ProtocolConfig {
    /// Configuration with an explicit staleness window.
    pub fn new(advert_stale_after: Duration) -> Self {
        Self { advert_stale_after }
    }
}
