//! Boundary to the platform transport: discovery, invitations, reliable delivery.

use std::time::Duration;

use crate::identity::PeerIdentity;

/// Primitive operations a transport must offer. Calls must not block; results of
/// asynchronous work come back as `TransportEvent`s.
pub trait TransportAdapter: Send {
    fn start_advertising(&mut self, service: &str) -> Result<(), TransportError>;
    fn stop_advertising(&mut self);
    fn start_browsing(&mut self, service: &str) -> Result<(), TransportError>;
    fn stop_browsing(&mut self);
    /// Invite a discovered peer. The transport enforces `timeout`.
    fn invite(&mut self, peer: &PeerIdentity, timeout: Duration) -> Result<(), TransportError>;
    /// Answer a pending invitation from `inviter`.
    fn respond_to_invitation(
        &mut self,
        inviter: &PeerIdentity,
        accept: bool,
    ) -> Result<(), TransportError>;
    /// Deliver bytes reliably to every connected peer.
    fn send_reliable(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Connection state reported by the transport for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    NotConnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PeerFound(PeerIdentity),
    PeerLost(PeerIdentity),
    InvitationReceived(PeerIdentity),
    ConnectionStateChanged(PeerIdentity, PeerConnectionState),
    DataReceived(PeerIdentity, Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not running")]
    NotRunning,
    #[error("no connected peers")]
    NoConnectedPeers,
    #[error("peer not reachable: {0}")]
    UnknownPeer(PeerIdentity),
    #[error("transport channel closed")]
    ChannelClosed,
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Recording transport for tests. Clones share state so a test can inspect calls
/// after handing the adapter to a session.
#[cfg(test)]
pub(crate) mod mock {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{TransportAdapter, TransportError};
    use crate::identity::PeerIdentity;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        StartAdvertising(String),
        StopAdvertising,
        StartBrowsing(String),
        StopBrowsing,
        Invite(PeerIdentity, Duration),
        Respond(PeerIdentity, bool),
        Send(Vec<u8>),
    }

    #[derive(Debug, Default)]
    pub struct MockState {
        pub calls: Vec<Call>,
        pub connected: usize,
        pub fail_invite: bool,
        pub fail_advertise: bool,
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_connected(&self, n: usize) {
            self.state.lock().unwrap().connected = n;
        }

        pub fn set_fail_invite(&self, fail: bool) {
            self.state.lock().unwrap().fail_invite = fail;
        }

        pub fn set_fail_advertise(&self, fail: bool) {
            self.state.lock().unwrap().fail_advertise = fail;
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Send(bytes) => Some(bytes),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, call: Call) {
            self.state.lock().unwrap().calls.push(call);
        }
    }

    impl TransportAdapter for MockTransport {
        fn start_advertising(&mut self, service: &str) -> Result<(), TransportError> {
            if self.state.lock().unwrap().fail_advertise {
                return Err(TransportError::NotRunning);
            }
            self.record(Call::StartAdvertising(service.to_string()));
            Ok(())
        }

        fn stop_advertising(&mut self) {
            self.record(Call::StopAdvertising);
        }

        fn start_browsing(&mut self, service: &str) -> Result<(), TransportError> {
            self.record(Call::StartBrowsing(service.to_string()));
            Ok(())
        }

        fn stop_browsing(&mut self) {
            self.record(Call::StopBrowsing);
        }

        fn invite(&mut self, peer: &PeerIdentity, timeout: Duration) -> Result<(), TransportError> {
            if self.state.lock().unwrap().fail_invite {
                return Err(TransportError::UnknownPeer(peer.clone()));
            }
            self.record(Call::Invite(peer.clone(), timeout));
            Ok(())
        }

        fn respond_to_invitation(
            &mut self,
            inviter: &PeerIdentity,
            accept: bool,
        ) -> Result<(), TransportError> {
            self.record(Call::Respond(inviter.clone(), accept));
            Ok(())
        }

        fn send_reliable(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            if self.state.lock().unwrap().connected == 0 {
                return Err(TransportError::NoConnectedPeers);
            }
            self.record(Call::Send(bytes.to_vec()));
            Ok(())
        }
    }
}
