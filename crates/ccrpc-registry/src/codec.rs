//! Built-in payload codecs.
//!
//! Payload-side encoding is little-endian: fixed-width scalars are emitted
//! raw, variable-length primitives (strings, byte strings) carry a `u32`
//! length prefix, sequences and maps a `u32` element count. Transferable
//! output is opaque, so the composite layer adds its own `u32` length
//! prefix around it; the bytes inside remain exactly what the user codec
//! produced.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::transferable::ErasedCodec;
use crate::value::Value;

/// Errors from encoding or decoding payload values.
#[derive(Debug)]
pub enum CodecError {
    /// The value's shape does not match the declared slot type.
    TypeMismatch { expected: String, got: &'static str },
    /// Input ended before the value did.
    Truncated,
    /// A boolean byte was neither 0 nor 1.
    InvalidBool(u8),
    /// A string was not valid UTF-8.
    InvalidUtf8,
    /// Argument tuple arity differs from the declared signature.
    ArgCount { expected: usize, got: usize },
    /// A null value arrived in a slot that does not allow it.
    UnexpectedNull(String),
    /// Failure reported by a user transferable codec.
    User(String),
}

impl CodecError {
    /// Wrap a user codec failure message.
    pub fn user(message: impl Into<String>) -> Self {
        CodecError::User(message.into())
    }
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::TypeMismatch { expected, got } => {
                write!(f, "type mismatch: expected {expected}, got {got}")
            }
            CodecError::Truncated => f.write_str("truncated value"),
            CodecError::InvalidBool(b) => write!(f, "invalid bool byte {b:#04x}"),
            CodecError::InvalidUtf8 => f.write_str("invalid utf-8 in string"),
            CodecError::ArgCount { expected, got } => {
                write!(f, "argument count mismatch: expected {expected}, got {got}")
            }
            CodecError::UnexpectedNull(slot) => write!(f, "unexpected null in {slot}"),
            CodecError::User(msg) => write!(f, "transferable codec: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// A signature type with every custom reference resolved to its codec.
///
/// Built once at interface registration; the call path walks this tree
/// without touching the registry.
#[derive(Debug, Clone)]
pub(crate) enum ResolvedCodec {
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    Seq(Box<ResolvedCodec>),
    Map(Box<ResolvedCodec>),
    Custom(Arc<ErasedCodec>),
}

impl ResolvedCodec {
    fn expected(&self) -> String {
        match self {
            ResolvedCodec::Bool => "bool".into(),
            ResolvedCodec::Int => "int".into(),
            ResolvedCodec::Float => "float".into(),
            ResolvedCodec::Str => "str".into(),
            ResolvedCodec::Bytes => "bytes".into(),
            ResolvedCodec::Seq(_) => "seq".into(),
            ResolvedCodec::Map(_) => "map".into(),
            ResolvedCodec::Custom(c) => c.type_name.to_owned(),
        }
    }
}

fn mismatch(codec: &ResolvedCodec, value: &Value) -> CodecError {
    CodecError::TypeMismatch {
        expected: codec.expected(),
        got: value.kind(),
    }
}

/// Encode one value into `out` according to its resolved codec.
pub(crate) fn encode_value(
    codec: &ResolvedCodec,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    match (codec, value) {
        (ResolvedCodec::Bool, Value::Bool(b)) => out.push(u8::from(*b)),
        (ResolvedCodec::Int, Value::Int(i)) => out.extend_from_slice(&i.to_le_bytes()),
        (ResolvedCodec::Float, Value::Float(x)) => out.extend_from_slice(&x.to_le_bytes()),
        (ResolvedCodec::Str, Value::Str(s)) => {
            put_len(out, s.len());
            out.extend_from_slice(s.as_bytes());
        }
        (ResolvedCodec::Bytes, Value::Bytes(b)) => {
            put_len(out, b.len());
            out.extend_from_slice(b);
        }
        (ResolvedCodec::Seq(elem), Value::Seq(items)) => {
            put_len(out, items.len());
            for item in items {
                encode_value(elem, item, out)?;
            }
        }
        (ResolvedCodec::Map(elem), Value::Map(entries)) => {
            put_len(out, entries.len());
            for (key, item) in entries {
                put_len(out, key.len());
                out.extend_from_slice(key.as_bytes());
                encode_value(elem, item, out)?;
            }
        }
        (ResolvedCodec::Custom(erased), value @ Value::Custom(_)) => {
            let bytes = erased.encode(value)?;
            put_len(out, bytes.len());
            out.extend_from_slice(&bytes);
        }
        (codec, value) => return Err(mismatch(codec, value)),
    }
    Ok(())
}

/// Decode one value from the front of `cursor`, advancing it.
pub(crate) fn decode_value(
    codec: &ResolvedCodec,
    cursor: &mut &[u8],
) -> Result<Value, CodecError> {
    match codec {
        ResolvedCodec::Bool => match take(cursor, 1)?[0] {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            b => Err(CodecError::InvalidBool(b)),
        },
        ResolvedCodec::Int => Ok(Value::Int(i64::from_le_bytes(take_array(cursor)?))),
        ResolvedCodec::Float => Ok(Value::Float(f64::from_le_bytes(take_array(cursor)?))),
        ResolvedCodec::Str => {
            let len = take_len(cursor)?;
            let raw = take(cursor, len)?;
            let s = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
            Ok(Value::Str(s.to_owned()))
        }
        ResolvedCodec::Bytes => {
            let len = take_len(cursor)?;
            Ok(Value::Bytes(take(cursor, len)?.to_vec()))
        }
        ResolvedCodec::Seq(elem) => {
            let count = take_len(cursor)?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(decode_value(elem, cursor)?);
            }
            Ok(Value::Seq(items))
        }
        ResolvedCodec::Map(elem) => {
            let count = take_len(cursor)?;
            let mut entries = BTreeMap::new();
            for _ in 0..count {
                let key_len = take_len(cursor)?;
                let key = std::str::from_utf8(take(cursor, key_len)?)
                    .map_err(|_| CodecError::InvalidUtf8)?
                    .to_owned();
                entries.insert(key, decode_value(elem, cursor)?);
            }
            Ok(Value::Map(entries))
        }
        ResolvedCodec::Custom(erased) => {
            let len = take_len(cursor)?;
            erased.decode(take(cursor, len)?)
        }
    }
}

fn put_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

fn take_len(cursor: &mut &[u8]) -> Result<usize, CodecError> {
    Ok(u32::from_le_bytes(take_array(cursor)?) as usize)
}

fn take_array<const N: usize>(cursor: &mut &[u8]) -> Result<[u8; N], CodecError> {
    let raw = take(cursor, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(raw);
    Ok(arr)
}

fn take<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if cursor.len() < n {
        return Err(CodecError::Truncated);
    }
    let (head, rest) = cursor.split_at(n);
    *cursor = rest;
    Ok(head)
}
