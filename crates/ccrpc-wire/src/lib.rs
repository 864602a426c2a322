#![deny(unsafe_code)]

//! Wire-level types for ccrpc.
//!
//! This crate defines:
//! - Call and reply envelope layouts (`encode_call`, `decode_call`, ...)
//! - Reserved control method ids (handshake, ping, shutdown)
//! - Status codes (`Status`)
//! - Payload limits (`max_payload`)
//!
//! Envelope header integers are big-endian. Payload bytes are opaque here;
//! their encoding belongs to the registry layer.

mod envelope;
mod limits;
mod status;

pub use envelope::{
    decode_call, decode_reply, encode_call, encode_reply, CallEnvelope, Handshake, ReplyEnvelope,
    WireError, FLAG_CANCEL, FLAG_NULL_ARGS, MAGIC, METHOD_HANDSHAKE, METHOD_PING, METHOD_SHUTDOWN,
    WIRE_VERSION,
};
pub use limits::{max_payload, DEFAULT_MAX_PAYLOAD, MAX_PAYLOAD_ENV};
pub use status::Status;
