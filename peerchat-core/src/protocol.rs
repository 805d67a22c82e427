//! Chat data model and link message types.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{PeerIdentity, PublicKey};

/// Current link protocol version. Used in beacon and hello.
pub const PROTOCOL_VERSION: u8 = 1;

/// Service every peer advertises and browses for unless configured otherwise.
pub const SERVICE_NAME: &str = "peer-chat";

/// How long an invited peer has to answer before the transport gives up.
pub const INVITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on any single payload or frame.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024; // 16 MiB

/// Lifecycle of the single session. Advertising and Browsing never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Advertising,
    Browsing,
    Connected(PeerIdentity),
}

impl SessionState {
    pub fn active_peer(&self) -> Option<&PeerIdentity> {
        match self {
            SessionState::Connected(peer) => Some(peer),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Advertising => f.write_str("advertising"),
            SessionState::Browsing => f.write_str("browsing"),
            SessionState::Connected(peer) => write!(f, "connected to {}", peer),
        }
    }
}

/// Whether an entry originated locally or arrived from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub text: String,
    pub direction: Direction,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>, direction: Direction) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            direction,
        }
    }
}

/// A file exchanged over the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatDocument {
    pub id: Uuid,
    pub file_name: String,
    pub file_bytes: Vec<u8>,
    /// Where the file was read from. Only set on the sending side.
    pub source_location: Option<PathBuf>,
    pub direction: Direction,
}

impl ChatDocument {
    /// Local view of a record that was just sent from `source`.
    pub fn sent(record: DocumentRecord, source: PathBuf) -> Self {
        Self {
            id: record.id,
            file_name: record.file_name,
            file_bytes: record.file_bytes,
            source_location: Some(source),
            direction: Direction::Sent,
        }
    }

    /// Local view of a record that arrived from the peer. The encoded direction is
    /// sender-relative, so it is always replaced with `Received`.
    pub fn received(record: DocumentRecord) -> Self {
        Self {
            id: record.id,
            file_name: record.file_name,
            file_bytes: record.file_bytes,
            source_location: None,
            direction: Direction::Received,
        }
    }
}

/// Document as carried in the payload envelope (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub file_name: String,
    pub file_bytes: Vec<u8>,
    pub direction: Direction,
}

impl DocumentRecord {
    pub fn outgoing(file_name: impl Into<String>, file_bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            file_bytes,
            direction: Direction::Sent,
        }
    }
}

/// Classified content of a received payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Document(DocumentRecord),
}

/// Messages exchanged by LAN link implementations. Encoding is bincode; framing is
/// length-prefix (see wire module). Chat payloads travel opaque inside `Data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LinkMessage {
    /// Discovery: advertise a named service and where to reach it. `public_key` is the
    /// sender's link key and tells a device its own beacons apart from same-named peers.
    Beacon {
        protocol_version: u8,
        service: String,
        name: PeerIdentity,
        public_key: PublicKey,
        listen_port: u16,
    },
    /// First frame on a session link, sent in the clear by both ends.
    Hello {
        protocol_version: u8,
        name: PeerIdentity,
        public_key: PublicKey,
    },
    /// Inviter asks to join the invitee's session.
    Invite,
    /// Invitee's answer.
    InviteResponse { accepted: bool },
    /// Opaque chat payload.
    Data(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn received_document_forces_direction() {
        let record = DocumentRecord::outgoing("a.txt", b"abc".to_vec());
        assert_eq!(record.direction, Direction::Sent);
        let doc = ChatDocument::received(record.clone());
        assert_eq!(doc.direction, Direction::Received);
        assert_eq!(doc.id, record.id);
        assert!(doc.source_location.is_none());
    }

    #[test]
    fn active_peer_only_when_connected() {
        assert!(SessionState::Browsing.active_peer().is_none());
        let bob = PeerIdentity::new("Bob");
        assert_eq!(
            SessionState::Connected(bob.clone()).active_peer(),
            Some(&bob)
        );
    }
}
