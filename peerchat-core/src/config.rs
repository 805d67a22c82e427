//! Session settings supplied by the host.

use std::time::Duration;

use crate::identity::PeerIdentity;
use crate::protocol::{INVITE_TIMEOUT, SERVICE_NAME};

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Name other devices see for this one.
    pub display_name: PeerIdentity,
    /// Service advertised and browsed for.
    pub service_name: String,
    /// Passed to the transport with every invite.
    pub invite_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            display_name: PeerIdentity::new("peer"),
            service_name: SERVICE_NAME.to_string(),
            invite_timeout: INVITE_TIMEOUT,
        }
    }
}

impl ChatConfig {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: PeerIdentity::new(display_name),
            ..Self::default()
        }
    }

    pub fn with_service_name(mut self, service: impl Into<String>) -> Self {
        self.service_name = service.into();
        self
    }

    pub fn with_invite_timeout(mut self, timeout: Duration) -> Self {
        self.invite_timeout = timeout;
        self
    }
}
