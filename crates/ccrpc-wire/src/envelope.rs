//! Call and reply envelope codec.
//!
//! Layouts:
//!
//! ```text
//! call:  magic(4) | version(1) | flags(1)  | method_id(u32) | arg_blob_len(u32) | arg_blob
//! reply: magic(4) | version(1) | status(1) | payload_len(u32) | payload
//! ```
//!
//! All header integers are big-endian. Decoding borrows from the inbound
//! buffer and never copies the payload.

use crate::Status;

/// ASCII "C2RP".
pub const MAGIC: [u8; 4] = [0x43, 0x32, 0x52, 0x50];

/// Current envelope version.
pub const WIRE_VERSION: u8 = 0x01;

/// Reserved method id: interface handshake, first frame on a connection.
pub const METHOD_HANDSHAKE: u32 = 0xFFFF_FFFF;

/// Reserved method id: liveness probe. Valid even before the handshake.
pub const METHOD_PING: u32 = 0xFFFF_FFFE;

/// Reserved method id: client-initiated graceful shutdown.
pub const METHOD_SHUTDOWN: u32 = 0xFFFF_FFFD;

/// Call flag: at least one argument slot is absent; every slot carries a
/// one-byte presence prefix.
pub const FLAG_NULL_ARGS: u8 = 0b0000_0001;

/// Call flag reserved for future cancellation marks. Never set today.
pub const FLAG_CANCEL: u8 = 0b0000_0010;

const CALL_HEADER_LEN: usize = 14;
const REPLY_HEADER_LEN: usize = 10;

/// Errors produced by the envelope codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// First four bytes are not `C2RP`.
    BadMagic([u8; 4]),
    /// Version byte differs from [`WIRE_VERSION`].
    BadVersion(u8),
    /// Buffer ends before the envelope does.
    Truncated { needed: usize, have: usize },
    /// Declared payload length exceeds the configured cap.
    PayloadTooLarge { len: usize, max: usize },
    /// Bytes remain after the envelope.
    TrailingBytes(usize),
    /// Handshake arg blob is malformed.
    BadHandshake(&'static str),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::BadMagic(m) => write!(f, "bad magic {m:02x?}"),
            WireError::BadVersion(v) => write!(f, "unsupported envelope version {v}"),
            WireError::Truncated { needed, have } => {
                write!(f, "truncated envelope: need {needed} bytes, have {have}")
            }
            WireError::PayloadTooLarge { len, max } => {
                write!(f, "payload too large: {len} bytes exceeds cap of {max}")
            }
            WireError::TrailingBytes(n) => write!(f, "{n} trailing bytes after envelope"),
            WireError::BadHandshake(what) => write!(f, "bad handshake frame: {what}"),
        }
    }
}

impl std::error::Error for WireError {}

/// A decoded call envelope, borrowing the arg blob from the inbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallEnvelope<'a> {
    pub flags: u8,
    pub method_id: u32,
    pub args: &'a [u8],
}

/// A decoded reply envelope, borrowing the payload from the inbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyEnvelope<'a> {
    pub status: Status,
    pub payload: &'a [u8],
}

/// Encode a call envelope. Fails if `args` exceeds `max_payload`.
pub fn encode_call(
    method_id: u32,
    flags: u8,
    args: &[u8],
    max_payload: usize,
) -> Result<Vec<u8>, WireError> {
    if args.len() > max_payload {
        return Err(WireError::PayloadTooLarge {
            len: args.len(),
            max: max_payload,
        });
    }
    let mut out = Vec::with_capacity(CALL_HEADER_LEN + args.len());
    out.extend_from_slice(&MAGIC);
    out.push(WIRE_VERSION);
    out.push(flags);
    out.extend_from_slice(&method_id.to_be_bytes());
    out.extend_from_slice(&(args.len() as u32).to_be_bytes());
    out.extend_from_slice(args);
    Ok(out)
}

/// Decode a call envelope from one framed message.
pub fn decode_call(bytes: &[u8], max_payload: usize) -> Result<CallEnvelope<'_>, WireError> {
    let flags_byte = check_header(bytes, CALL_HEADER_LEN)?;
    let method_id = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    let len = u32::from_be_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]) as usize;
    if len > max_payload {
        return Err(WireError::PayloadTooLarge {
            len,
            max: max_payload,
        });
    }
    let body = &bytes[CALL_HEADER_LEN..];
    if body.len() < len {
        return Err(WireError::Truncated {
            needed: CALL_HEADER_LEN + len,
            have: bytes.len(),
        });
    }
    if body.len() > len {
        return Err(WireError::TrailingBytes(body.len() - len));
    }
    Ok(CallEnvelope {
        flags: flags_byte,
        method_id,
        args: &body[..len],
    })
}

/// Encode a reply envelope. Fails if `payload` exceeds `max_payload`.
pub fn encode_reply(
    status: Status,
    payload: &[u8],
    max_payload: usize,
) -> Result<Vec<u8>, WireError> {
    if payload.len() > max_payload {
        return Err(WireError::PayloadTooLarge {
            len: payload.len(),
            max: max_payload,
        });
    }
    let mut out = Vec::with_capacity(REPLY_HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.push(WIRE_VERSION);
    out.push(status.as_u8());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode a reply envelope from one framed message.
pub fn decode_reply(bytes: &[u8], max_payload: usize) -> Result<ReplyEnvelope<'_>, WireError> {
    let status_byte = check_header(bytes, REPLY_HEADER_LEN)?;
    let len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    if len > max_payload {
        return Err(WireError::PayloadTooLarge {
            len,
            max: max_payload,
        });
    }
    let body = &bytes[REPLY_HEADER_LEN..];
    if body.len() < len {
        return Err(WireError::Truncated {
            needed: REPLY_HEADER_LEN + len,
            have: bytes.len(),
        });
    }
    if body.len() > len {
        return Err(WireError::TrailingBytes(body.len() - len));
    }
    Ok(ReplyEnvelope {
        status: Status::from_u8(status_byte),
        payload: &body[..len],
    })
}

/// Validate magic + version and return the byte at offset 5 (flags or status).
fn check_header(bytes: &[u8], header_len: usize) -> Result<u8, WireError> {
    if bytes.len() < header_len {
        return Err(WireError::Truncated {
            needed: header_len,
            have: bytes.len(),
        });
    }
    if bytes[..4] != MAGIC {
        return Err(WireError::BadMagic([bytes[0], bytes[1], bytes[2], bytes[3]]));
    }
    if bytes[4] != WIRE_VERSION {
        return Err(WireError::BadVersion(bytes[4]));
    }
    Ok(bytes[5])
}

/// Interface identity exchanged as the first frame on a new connection.
///
/// Wire layout of the arg blob (big-endian, control-frame convention):
/// `u32 len | namespace utf8 | u32 len | name utf8 | u32 major | u32 minor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub namespace: String,
    pub name: String,
    pub major: u32,
    pub minor: u32,
}

impl Handshake {
    /// Encode into a handshake arg blob.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.namespace.len() + self.name.len());
        put_str(&mut out, &self.namespace);
        put_str(&mut out, &self.name);
        out.extend_from_slice(&self.major.to_be_bytes());
        out.extend_from_slice(&self.minor.to_be_bytes());
        out
    }

    /// Decode a handshake arg blob.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, WireError> {
        let namespace = take_str(&mut bytes)?;
        let name = take_str(&mut bytes)?;
        let major = take_u32(&mut bytes)?;
        let minor = take_u32(&mut bytes)?;
        if !bytes.is_empty() {
            return Err(WireError::BadHandshake("trailing bytes"));
        }
        Ok(Handshake {
            namespace,
            name,
            major,
            minor,
        })
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn take_u32(bytes: &mut &[u8]) -> Result<u32, WireError> {
    if bytes.len() < 4 {
        return Err(WireError::BadHandshake("truncated integer"));
    }
    let v = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    *bytes = &bytes[4..];
    Ok(v)
}

fn take_str(bytes: &mut &[u8]) -> Result<String, WireError> {
    let len = take_u32(bytes)? as usize;
    if bytes.len() < len {
        return Err(WireError::BadHandshake("truncated string"));
    }
    let s = std::str::from_utf8(&bytes[..len])
        .map_err(|_| WireError::BadHandshake("invalid utf-8"))?
        .to_owned();
    *bytes = &bytes[len..];
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_MAX_PAYLOAD;

    #[test]
    fn call_round_trip() {
        let encoded = encode_call(7, FLAG_NULL_ARGS, b"abc", DEFAULT_MAX_PAYLOAD).unwrap();
        let call = decode_call(&encoded, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(call.method_id, 7);
        assert_eq!(call.flags, FLAG_NULL_ARGS);
        assert_eq!(call.args, b"abc");
    }

    #[test]
    fn reply_round_trip() {
        let encoded = encode_reply(Status::Success, b"hello", DEFAULT_MAX_PAYLOAD).unwrap();
        let reply = decode_reply(&encoded, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(reply.status, Status::Success);
        assert_eq!(reply.payload, b"hello");
    }

    #[test]
    fn empty_payload_is_valid() {
        let encoded = encode_reply(Status::Success, b"", DEFAULT_MAX_PAYLOAD).unwrap();
        let reply = decode_reply(&encoded, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(reply.payload.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = encode_call(0, 0, b"", DEFAULT_MAX_PAYLOAD).unwrap();
        encoded[0] = b'X';
        assert!(matches!(
            decode_call(&encoded, DEFAULT_MAX_PAYLOAD),
            Err(WireError::BadMagic(_))
        ));
    }

    #[test]
    fn rejects_bad_version() {
        let mut encoded = encode_call(0, 0, b"", DEFAULT_MAX_PAYLOAD).unwrap();
        encoded[4] = 0x02;
        assert_eq!(
            decode_call(&encoded, DEFAULT_MAX_PAYLOAD),
            Err(WireError::BadVersion(0x02))
        );
    }

    #[test]
    fn rejects_truncated_envelope() {
        let encoded = encode_call(1, 0, b"payload", DEFAULT_MAX_PAYLOAD).unwrap();
        let err = decode_call(&encoded[..encoded.len() - 2], DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut encoded = encode_reply(Status::Success, b"x", DEFAULT_MAX_PAYLOAD).unwrap();
        encoded.push(0);
        assert_eq!(
            decode_reply(&encoded, DEFAULT_MAX_PAYLOAD),
            Err(WireError::TrailingBytes(1))
        );
    }

    #[test]
    fn enforces_payload_cap_both_ways() {
        let big = vec![0u8; 4096];
        assert!(matches!(
            encode_call(1, 0, &big, 1024),
            Err(WireError::PayloadTooLarge { len: 4096, max: 1024 })
        ));

        // An envelope encoded under a generous cap must still be rejected by
        // a decoder configured with a tighter one.
        let encoded = encode_call(1, 0, &big, DEFAULT_MAX_PAYLOAD).unwrap();
        let err = decode_call(&encoded, 1024).unwrap_err();
        assert!(err.to_string().contains("payload too large"));
    }

    #[test]
    fn handshake_round_trip() {
        let hs = Handshake {
            namespace: "cc.test".into(),
            name: "Echo".into(),
            major: 0,
            minor: 1,
        };
        assert_eq!(Handshake::decode(&hs.encode()).unwrap(), hs);
    }

    #[test]
    fn handshake_rejects_malformed_blobs() {
        assert!(Handshake::decode(&[1, 2, 3]).is_err());

        let hs = Handshake {
            namespace: "ns".into(),
            name: "I".into(),
            major: 1,
            minor: 0,
        };
        let mut blob = hs.encode();
        blob.push(0xff);
        assert_eq!(
            Handshake::decode(&blob),
            Err(WireError::BadHandshake("trailing bytes"))
        );
    }

    #[test]
    fn reserved_ids_do_not_collide() {
        assert_ne!(METHOD_HANDSHAKE, METHOD_PING);
        assert_ne!(METHOD_PING, METHOD_SHUTDOWN);
    }
}
