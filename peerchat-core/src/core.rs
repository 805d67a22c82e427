//! Session state machine. Owns the transport, peer registry and conversation log;
//! commands come from the host, transport events from the adapter.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::identity::PeerIdentity;
use crate::protocol::{
    ChatDocument, ChatMessage, Direction, DocumentRecord, Payload, SessionState, MAX_PAYLOAD_LEN,
};
use crate::registry::PeerRegistry;
use crate::store::ConversationStore;
use crate::transport::{PeerConnectionState, TransportAdapter, TransportEvent};
use crate::wire::{self, EncodeError};

/// Read-only view handed to observers.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub discovered: Vec<PeerIdentity>,
    pub messages: Vec<Arc<ChatMessage>>,
    pub documents: Vec<Arc<ChatDocument>>,
    /// Peers the transport has confirmed as connected.
    pub connected: Vec<PeerIdentity>,
}

/// Single owner of all session state. Not shared; wrap in `ChatSession` to drive it
/// from concurrent sources.
pub struct ChatCore<T: TransportAdapter> {
    transport: T,
    config: ChatConfig,
    state: SessionState,
    registry: PeerRegistry,
    store: ConversationStore,
    connected: Vec<PeerIdentity>,
}

impl<T: TransportAdapter> ChatCore<T> {
    pub fn new(transport: T, config: ChatConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Idle,
            registry: PeerRegistry::new(),
            store: ConversationStore::new(),
            connected: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn connected_peers(&self) -> &[PeerIdentity] {
        &self.connected
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            discovered: self.registry.snapshot(),
            messages: self.store.message_snapshot(),
            documents: self.store.document_snapshot(),
            connected: self.connected.clone(),
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "session state changed");
            self.state = next;
        }
    }

    /// Begin advertising. Leaves browsing and forgets any active peer.
    pub fn start_advertising(&mut self) -> Result<()> {
        if self.state == SessionState::Advertising {
            return Ok(());
        }
        if self.state == SessionState::Browsing {
            self.leave_browsing();
        }
        self.transport.start_advertising(&self.config.service_name)?;
        self.set_state(SessionState::Advertising);
        Ok(())
    }

    pub fn stop_advertising(&mut self) -> Result<()> {
        if self.state == SessionState::Advertising {
            self.transport.stop_advertising();
            self.set_state(SessionState::Idle);
        }
        Ok(())
    }

    /// Begin discovery. The registry is kept from any earlier browse.
    pub fn start_browsing(&mut self) -> Result<()> {
        match self.state {
            SessionState::Browsing => return Ok(()),
            SessionState::Advertising => {
                self.transport.stop_advertising();
                self.set_state(SessionState::Idle);
            }
            _ => {}
        }
        self.transport.start_browsing(&self.config.service_name)?;
        self.set_state(SessionState::Browsing);
        Ok(())
    }

    /// Stop discovery. Always empties the registry.
    pub fn stop_browsing(&mut self) -> Result<()> {
        self.leave_browsing();
        Ok(())
    }

    fn leave_browsing(&mut self) {
        self.transport.stop_browsing();
        self.registry.clear();
        if self.state == SessionState::Browsing {
            self.set_state(SessionState::Idle);
        }
    }

    /// Invite a discovered peer. The peer becomes active as soon as the invite is
    /// sent; transport confirmation shows up later in `connected_peers`.
    pub fn connect(&mut self, peer: &PeerIdentity) -> Result<()> {
        if self.state != SessionState::Browsing {
            return Err(ChatError::InvalidState {
                state: self.state.clone(),
                command: "connect",
            });
        }
        if !self.registry.contains(peer) {
            return Err(ChatError::UnknownPeer(peer.clone()));
        }
        self.transport.invite(peer, self.config.invite_timeout)?;
        self.leave_browsing();
        self.set_state(SessionState::Connected(peer.clone()));
        Ok(())
    }

    pub fn send_text(&mut self, text: &str) -> Result<()> {
        let bytes = wire::encode_text(text)?;
        self.transport.send_reliable(&bytes)?;
        self.store.push_message(ChatMessage::new(text, Direction::Sent));
        Ok(())
    }

    /// Read a local file and send it as a document. Oversized files are refused
    /// before they are read.
    pub fn send_document(&mut self, path: &Path) -> Result<()> {
        let file_error = |e: std::io::Error| ChatError::FileAccessFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let len = std::fs::metadata(path).map_err(file_error)?.len();
        if len > MAX_PAYLOAD_LEN as u64 {
            return Err(EncodeError::TooLarge { len: len as usize }.into());
        }
        let file_bytes = std::fs::read(path).map_err(file_error)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let record = DocumentRecord::outgoing(file_name, file_bytes);
        let bytes = wire::encode_document(&record)?;
        self.transport.send_reliable(&bytes)?;
        debug!(file = %record.file_name, len = bytes.len(), "document sent");
        self.store.push_document(ChatDocument::sent(record, path.to_path_buf()));
        Ok(())
    }

    /// Apply one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::PeerFound(peer) => {
                if self.state != SessionState::Browsing {
                    debug!(%peer, "ignoring peer found outside browsing");
                } else if self.registry.insert(peer.clone()) {
                    debug!(%peer, "peer found");
                }
            }
            TransportEvent::PeerLost(peer) => {
                if self.registry.remove(&peer) {
                    debug!(%peer, "peer lost");
                }
            }
            TransportEvent::InvitationReceived(peer) => self.on_invitation(peer)?,
            TransportEvent::ConnectionStateChanged(peer, state) => {
                self.on_connection_state(peer, state)
            }
            TransportEvent::DataReceived(peer, bytes) => self.on_data(peer, &bytes)?,
        }
        Ok(())
    }

    fn on_invitation(&mut self, peer: PeerIdentity) -> Result<()> {
        if self.state != SessionState::Advertising {
            info!(%peer, state = %self.state, "declining invitation");
            if let Err(e) = self.transport.respond_to_invitation(&peer, false) {
                debug!(%peer, error = %e, "decline not delivered");
            }
            return Ok(());
        }
        self.transport.respond_to_invitation(&peer, true)?;
        self.transport.stop_advertising();
        self.set_state(SessionState::Connected(peer));
        Ok(())
    }

    fn on_connection_state(&mut self, peer: PeerIdentity, state: PeerConnectionState) {
        match state {
            PeerConnectionState::Connected => {
                info!(%peer, "transport connected");
                if !self.connected.contains(&peer) {
                    self.connected.push(peer);
                }
            }
            PeerConnectionState::Connecting => debug!(%peer, "transport connecting"),
            PeerConnectionState::NotConnected => {
                info!(%peer, "transport not connected");
                self.connected.retain(|p| *p != peer);
            }
        }
    }

    fn on_data(&mut self, peer: PeerIdentity, bytes: &[u8]) -> Result<()> {
        match wire::decode_payload(bytes) {
            Ok(Payload::Document(record)) => {
                debug!(%peer, file = %record.file_name, "document received");
                self.store.push_document(ChatDocument::received(record));
                Ok(())
            }
            Ok(Payload::Text(text)) => {
                debug!(%peer, len = text.len(), "message received");
                self.store.push_message(ChatMessage::new(text, Direction::Received));
                Ok(())
            }
            Err(e) => {
                warn!(%peer, len = bytes.len(), error = %e, "discarding payload");
                Err(ChatError::DecodingFailure {
                    peer,
                    len: bytes.len(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::INVITE_TIMEOUT;
    use crate::transport::mock::{Call, MockTransport};
    use crate::transport::TransportError;
    use std::io::Write;

    fn core() -> (ChatCore<MockTransport>, MockTransport) {
        let transport = MockTransport::new();
        let core = ChatCore::new(transport.clone(), ChatConfig::new("Me"));
        (core, transport)
    }

    fn peer(name: &str) -> PeerIdentity {
        PeerIdentity::new(name)
    }

    fn connected_core(to: &str) -> (ChatCore<MockTransport>, MockTransport) {
        let (mut core, transport) = core();
        core.start_advertising().unwrap();
        core.handle_event(TransportEvent::InvitationReceived(peer(to))).unwrap();
        transport.set_connected(1);
        (core, transport)
    }

    #[test]
    fn advertise_then_invitation_connects() {
        let (mut core, transport) = core();
        core.start_advertising().unwrap();
        assert_eq!(core.state(), &SessionState::Advertising);

        core.handle_event(TransportEvent::InvitationReceived(peer("Bob"))).unwrap();
        assert_eq!(core.state(), &SessionState::Connected(peer("Bob")));
        let calls = transport.calls();
        assert_eq!(calls[0], Call::StartAdvertising("peer-chat".into()));
        assert!(calls.contains(&Call::Respond(peer("Bob"), true)));
        assert_eq!(calls.last(), Some(&Call::StopAdvertising));
    }

    #[test]
    fn invitation_outside_advertising_is_declined() {
        let (mut core, transport) = core();
        core.handle_event(TransportEvent::InvitationReceived(peer("Mallory"))).unwrap();
        assert_eq!(core.state(), &SessionState::Idle);
        assert_eq!(transport.calls(), vec![Call::Respond(peer("Mallory"), false)]);
    }

    #[test]
    fn browse_discover_then_invite() {
        let (mut core, transport) = core();
        core.start_browsing().unwrap();
        core.handle_event(TransportEvent::PeerFound(peer("Alice"))).unwrap();
        core.handle_event(TransportEvent::PeerFound(peer("Bob"))).unwrap();
        assert_eq!(core.registry().peers(), &[peer("Alice"), peer("Bob")]);

        core.connect(&peer("Bob")).unwrap();
        assert_eq!(core.state(), &SessionState::Connected(peer("Bob")));
        assert!(core.registry().is_empty());
        let calls = transport.calls();
        assert!(calls.contains(&Call::Invite(peer("Bob"), INVITE_TIMEOUT)));
        assert_eq!(calls.last(), Some(&Call::StopBrowsing));
    }

    #[test]
    fn found_and_lost_peers_tracked_in_order() {
        let (mut core, _) = core();
        core.start_browsing().unwrap();
        for name in ["Alice", "Bob", "Alice", "Carol"] {
            core.handle_event(TransportEvent::PeerFound(peer(name))).unwrap();
        }
        core.handle_event(TransportEvent::PeerLost(peer("Bob"))).unwrap();
        core.handle_event(TransportEvent::PeerLost(peer("Dave"))).unwrap();
        assert_eq!(core.registry().peers(), &[peer("Alice"), peer("Carol")]);
    }

    #[test]
    fn peers_found_outside_browsing_are_ignored() {
        let (mut core, _) = core();
        core.handle_event(TransportEvent::PeerFound(peer("Alice"))).unwrap();
        assert!(core.registry().is_empty());
    }

    #[test]
    fn stop_browsing_empties_registry() {
        let (mut core, _) = core();
        core.start_browsing().unwrap();
        core.handle_event(TransportEvent::PeerFound(peer("Alice"))).unwrap();
        core.stop_browsing().unwrap();
        assert!(core.registry().is_empty());
        assert_eq!(core.state(), &SessionState::Idle);
    }

    #[test]
    fn registry_survives_repeated_browse_start() {
        let (mut core, _) = core();
        core.start_browsing().unwrap();
        core.handle_event(TransportEvent::PeerFound(peer("Alice"))).unwrap();
        core.start_browsing().unwrap();
        assert_eq!(core.registry().peers(), &[peer("Alice")]);
    }

    #[test]
    fn advertising_and_browsing_are_exclusive() {
        let (mut core, transport) = core();
        core.start_advertising().unwrap();
        core.start_browsing().unwrap();
        assert_eq!(core.state(), &SessionState::Browsing);
        assert!(transport.calls().contains(&Call::StopAdvertising));

        core.handle_event(TransportEvent::PeerFound(peer("Alice"))).unwrap();
        core.start_advertising().unwrap();
        assert_eq!(core.state(), &SessionState::Advertising);
        assert!(core.registry().is_empty());
        assert!(transport.calls().contains(&Call::StopBrowsing));
    }

    #[test]
    fn new_cycle_clears_active_peer() {
        let (mut core, _) = connected_core("Bob");
        core.start_browsing().unwrap();
        assert_eq!(core.state(), &SessionState::Browsing);
        assert!(core.state().active_peer().is_none());
    }

    #[test]
    fn failed_advertise_keeps_state() {
        let (mut core, transport) = connected_core("Bob");
        transport.set_fail_advertise(true);
        let err = core.start_advertising().unwrap_err();
        assert_eq!(err, ChatError::TransportUnavailable(TransportError::NotRunning));
        assert_eq!(core.state(), &SessionState::Connected(peer("Bob")));
    }

    #[test]
    fn connect_requires_browsing_and_known_peer() {
        let (mut core, transport) = core();
        assert!(matches!(
            core.connect(&peer("Bob")),
            Err(ChatError::InvalidState { command: "connect", .. })
        ));
        core.start_browsing().unwrap();
        assert_eq!(
            core.connect(&peer("Bob")),
            Err(ChatError::UnknownPeer(peer("Bob")))
        );
        assert_eq!(core.state(), &SessionState::Browsing);
        assert!(!transport
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Invite(..))));
    }

    #[test]
    fn failed_invite_stays_browsing() {
        let (mut core, transport) = core();
        core.start_browsing().unwrap();
        core.handle_event(TransportEvent::PeerFound(peer("Bob"))).unwrap();
        transport.set_fail_invite(true);
        assert!(matches!(
            core.connect(&peer("Bob")),
            Err(ChatError::TransportUnavailable(_))
        ));
        assert_eq!(core.state(), &SessionState::Browsing);
        assert_eq!(core.registry().peers(), &[peer("Bob")]);
    }

    #[test]
    fn text_exchange() {
        let (mut core, transport) = connected_core("Bob");
        core.send_text("hi").unwrap();
        assert_eq!(transport.sent(), vec![b"hi".to_vec()]);

        core.handle_event(TransportEvent::DataReceived(peer("Bob"), b"hello".to_vec())).unwrap();
        let log: Vec<_> = core
            .store()
            .messages()
            .iter()
            .map(|m| (m.text.as_str(), m.direction))
            .collect();
        assert_eq!(
            log,
            [("hi", Direction::Sent), ("hello", Direction::Received)]
        );
    }

    #[test]
    fn send_without_peers_is_not_logged() {
        let (mut core, transport) = connected_core("Bob");
        transport.set_connected(0);
        assert_eq!(
            core.send_text("lost"),
            Err(ChatError::TransportUnavailable(
                TransportError::NoConnectedPeers
            ))
        );

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();
        assert!(matches!(
            core.send_document(file.path()),
            Err(ChatError::TransportUnavailable(
                TransportError::NoConnectedPeers
            ))
        ));
        assert!(core.store().messages().is_empty());
        assert!(core.store().documents().is_empty());
    }

    #[test]
    fn successful_send_appends_one_entry() {
        let (mut core, _) = connected_core("Bob");
        core.handle_event(TransportEvent::DataReceived(peer("Bob"), b"first".to_vec())).unwrap();
        let before = core.store().messages().to_vec();
        core.send_text("second").unwrap();
        let after = core.store().messages();
        assert_eq!(after.len(), before.len() + 1);
        assert!(Arc::ptr_eq(&after[0], &before[0]));
        assert_eq!(after[1].text, "second");
        assert_eq!(after[1].direction, Direction::Sent);
    }

    #[test]
    fn send_document_logs_source_location() {
        let (mut core, transport) = connected_core("Bob");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        core.send_document(&path).unwrap();
        let docs = core.store().documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_name, "report.pdf");
        assert_eq!(docs[0].file_bytes, b"%PDF-1.4");
        assert_eq!(docs[0].direction, Direction::Sent);
        assert_eq!(docs[0].source_location.as_deref(), Some(path.as_path()));

        let sent = transport.sent();
        let record = wire::decode_document(&sent[0]).unwrap();
        assert_eq!(record.id, docs[0].id);
        assert_eq!(record.direction, Direction::Sent);
    }

    #[test]
    fn unreadable_file_is_reported() {
        let (mut core, transport) = connected_core("Bob");
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        assert!(matches!(
            core.send_document(&missing),
            Err(ChatError::FileAccessFailure { ref path, .. }) if *path == missing
        ));
        assert!(transport.sent().is_empty());
        assert!(core.store().documents().is_empty());
    }

    #[test]
    fn oversized_file_refused_before_reading() {
        let (mut core, transport) = connected_core("Bob");
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(MAX_PAYLOAD_LEN as u64 + 1).unwrap();
        assert_eq!(
            core.send_document(file.path()),
            Err(ChatError::EncodingFailure(EncodeError::TooLarge {
                len: MAX_PAYLOAD_LEN + 1
            }))
        );
        assert!(transport.sent().is_empty());
        assert!(core.store().documents().is_empty());
    }

    #[test]
    fn snapshots_share_logged_messages() {
        let (mut core, _) = connected_core("Bob");
        core.send_text("one").unwrap();
        let first = core.snapshot();
        core.send_text("two").unwrap();
        let second = core.snapshot();
        assert_eq!(second.messages.len(), 2);
        assert!(Arc::ptr_eq(&first.messages[0], &second.messages[0]));
    }

    #[test]
    fn received_document_forced_to_received() {
        let (mut core, _) = connected_core("Bob");
        let record = DocumentRecord::outgoing("a.txt", b"contents".to_vec());
        let bytes = wire::encode_document(&record).unwrap();
        core.handle_event(TransportEvent::DataReceived(peer("Bob"), bytes)).unwrap();
        let docs = core.store().documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_name, "a.txt");
        assert_eq!(docs[0].direction, Direction::Received);
        assert!(docs[0].source_location.is_none());
        assert!(core.store().messages().is_empty());
    }

    #[test]
    fn undecodable_payload_is_discarded() {
        let (mut core, _) = connected_core("Bob");
        let err = core
            .handle_event(TransportEvent::DataReceived(peer("Bob"), vec![0xFF, 0xFE]))
            .unwrap_err();
        assert_eq!(
            err,
            ChatError::DecodingFailure {
                peer: peer("Bob"),
                len: 2
            }
        );
        assert_eq!(core.state(), &SessionState::Connected(peer("Bob")));
        assert!(core.store().messages().is_empty());
        assert!(core.store().documents().is_empty());
    }

    #[test]
    fn disconnect_is_informational() {
        let (mut core, _) = connected_core("Bob");
        core.handle_event(TransportEvent::ConnectionStateChanged(
            peer("Bob"),
            PeerConnectionState::Connected,
        )).unwrap();
        assert_eq!(core.connected_peers(), &[peer("Bob")]);
        core.handle_event(TransportEvent::ConnectionStateChanged(
            peer("Bob"),
            PeerConnectionState::NotConnected,
        )).unwrap();
        assert!(core.connected_peers().is_empty());
        assert_eq!(core.state(), &SessionState::Connected(peer("Bob")));
    }
}
