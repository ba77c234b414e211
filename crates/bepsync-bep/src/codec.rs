//! Framing for the two phases of a connection.
//!
//! Hello: 4 bytes BE magic + 2 bytes BE length + CBOR payload.
//! Post-authentication: 4 bytes BE length + CBOR payload of a [`Message`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::messages::{Hello, Message};

/// Magic number opening every hello frame.
pub const HELLO_MAGIC: u32 = 0x2EA7_D90B;

/// Hello header: magic + u16 length.
pub const HELLO_HEADER_LEN: usize = 6;

/// Post-authentication header: u32 length.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest accepted post-authentication payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Error encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
    #[error("bad hello magic: {0:#010x}")]
    BadMagic(u32),
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encode a hello into a single frame.
pub fn encode_hello(hello: &Hello) -> Result<Vec<u8>, CodecError> {
    let payload = to_cbor(hello)?;
    let len = u16::try_from(payload.len()).map_err(|_| CodecError::TooLarge(payload.len()))?;

    let mut out = Vec::with_capacity(HELLO_HEADER_LEN + payload.len());
    out.extend_from_slice(&HELLO_MAGIC.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Check a hello header and return the payload length that follows it.
pub fn hello_payload_len(header: &[u8; HELLO_HEADER_LEN]) -> Result<usize, CodecError> {
    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != HELLO_MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    Ok(u16::from_be_bytes([header[4], header[5]]) as usize)
}

pub fn decode_hello_payload(payload: &[u8]) -> Result<Hello, CodecError> {
    from_cbor(payload)
}

/// Encode a message into a single frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, CodecError> {
    let payload = to_cbor(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::TooLarge(payload.len()));
    }

    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Payload length announced by a frame header.
pub fn frame_payload_len(header: &[u8; FRAME_HEADER_LEN]) -> Result<usize, CodecError> {
    let len = u32::from_be_bytes(*header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::TooLarge(len));
    }
    Ok(len)
}

pub fn decode_message_payload(payload: &[u8]) -> Result<Message, CodecError> {
    from_cbor(payload)
}
