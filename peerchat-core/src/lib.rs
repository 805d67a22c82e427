//! Peer chat session core.
//! Transport-agnostic: the host supplies a `TransportAdapter` and feeds its events in.

pub mod config;
pub mod core;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;
pub mod transport;
pub mod wire;

pub use config::ChatConfig;
pub use crate::core::{ChatCore, SessionSnapshot};
pub use error::ChatError;
pub use identity::{Keypair, PeerIdentity, PublicKey};
pub use protocol::{
    ChatDocument, ChatMessage, Direction, DocumentRecord, LinkMessage, Payload, SessionState,
    INVITE_TIMEOUT, PROTOCOL_VERSION, SERVICE_NAME,
};
pub use session::{event_channel, ChatSession, EventSender, SessionHandle};
pub use transport::{PeerConnectionState, TransportAdapter, TransportError, TransportEvent};
pub use wire::{decode_frame, decode_payload, encode_frame, FrameDecodeError, FrameEncodeError};
