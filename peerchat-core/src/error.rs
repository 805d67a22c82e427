//! Non-fatal failures reported by the session. None of them changes the session state.

use std::path::PathBuf;

use crate::identity::PeerIdentity;
use crate::protocol::SessionState;
use crate::transport::TransportError;
use crate::wire::EncodeError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[from] TransportError),
    #[error("encoding failed: {0}")]
    EncodingFailure(#[from] EncodeError),
    #[error("undecodable payload from {peer} ({len} bytes)")]
    DecodingFailure { peer: PeerIdentity, len: usize },
    #[error("cannot read {}: {reason}", path.display())]
    FileAccessFailure { path: PathBuf, reason: String },
    #[error("cannot {command} while {state}")]
    InvalidState {
        state: SessionState,
        command: &'static str,
    },
    #[error("peer {0} has not been discovered")]
    UnknownPeer(PeerIdentity),
}

pub type Result<T> = std::result::Result<T, ChatError>;
