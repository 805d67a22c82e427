//! Payload envelope and link framing.
//!
//! Text travels as raw UTF-8. A document is `DOCUMENT_TAG` followed by a bincode
//! `DocumentRecord`; the tag opens with 0xFF, which never occurs in UTF-8, so the
//! two kinds can not be confused in either direction.
//!
//! Link frames are a 4 byte LE length + bincode `LinkMessage`.

use bincode::Options;

use crate::protocol::{DocumentRecord, LinkMessage, Payload, MAX_PAYLOAD_LEN};

pub const DOCUMENT_TAG: [u8; 4] = [0xFF, b'P', b'C', b'D'];

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = MAX_PAYLOAD_LEN as u32 + 1024;

fn record_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_PAYLOAD_LEN as u64)
        .reject_trailing_bytes()
}

/// Encode a text message. The bytes are the string itself.
pub fn encode_text(text: &str) -> Result<Vec<u8>, EncodeError> {
    if text.len() > MAX_PAYLOAD_LEN {
        return Err(EncodeError::TooLarge { len: text.len() });
    }
    Ok(text.as_bytes().to_vec())
}

/// Encode a document record behind the document tag.
pub fn encode_document(record: &DocumentRecord) -> Result<Vec<u8>, EncodeError> {
    let body = record_options()
        .serialize(record)
        .map_err(|e| EncodeError::Record(e.to_string()))?;
    if body.len() > MAX_PAYLOAD_LEN {
        return Err(EncodeError::TooLarge { len: body.len() });
    }
    let mut out = Vec::with_capacity(DOCUMENT_TAG.len() + body.len());
    out.extend_from_slice(&DOCUMENT_TAG);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Strict document decode: tag present and the rest is exactly one record.
pub fn decode_document(bytes: &[u8]) -> Result<DocumentRecord, DecodeError> {
    let body = bytes
        .strip_prefix(&DOCUMENT_TAG[..])
        .ok_or(DecodeError::NotDocument)?;
    record_options()
        .deserialize(body)
        .map_err(|e| DecodeError::Record(e.to_string()))
}

/// Classify received bytes: document first, then UTF-8 text.
pub fn decode_payload(bytes: &[u8]) -> Result<Payload, DecodeError> {
    match decode_document(bytes) {
        Ok(record) => return Ok(Payload::Document(record)),
        Err(DecodeError::NotDocument) => {}
        Err(e) => tracing::debug!(error = %e, "tagged payload is not a valid document"),
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(Payload::Text(text.to_owned())),
        Err(_) => Err(DecodeError::Unrecognized),
    }
}

/// Error building a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("payload too large ({len} bytes)")]
    TooLarge { len: usize },
    #[error("document encode error: {0}")]
    Record(String),
}

/// Error classifying a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing document tag")]
    NotDocument,
    #[error("document decode error: {0}")]
    Record(String),
    #[error("payload is neither a document nor UTF-8 text")]
    Unrecognized,
}

/// Encode a link message into a single frame: 4 bytes LE length + bincode payload.
pub fn encode_frame(msg: &LinkMessage) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg).map_err(FrameEncodeError::Encode)?;
    let len = payload.len() as u32;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Read the length prefix of a frame, if enough bytes are present.
pub fn frame_len(bytes: &[u8]) -> Result<usize, FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

/// Decode one frame from the front of `bytes`. Returns the message and the bytes consumed.
/// A partial buffer yields `NeedMore`; retry once more data has arrived.
pub fn decode_frame(bytes: &[u8]) -> Result<(LinkMessage, usize), FrameDecodeError> {
    let len = frame_len(bytes)?;
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let msg: LinkMessage = bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len])
        .map_err(FrameDecodeError::Decode)?;
    Ok((msg, LEN_SIZE + len))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
