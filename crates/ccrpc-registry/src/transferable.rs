//! User-defined transferable types and their erased codecs.

use std::any::Any;
use std::sync::Arc;

use crate::codec::CodecError;
use crate::value::{CustomValue, Value};

/// A value type that can cross the wire.
///
/// `serialize` and `deserialize` must be pure and self-delimiting: the byte
/// string fully determines the value, and
/// `serialize(&deserialize(b)?)? == b` for any `b` produced by `serialize`.
/// Registration is keyed by `TYPE_NAME`, which should be fully qualified
/// (e.g. `"cc.test.Str"`). Transferables are tree-shaped; cyclic data must
/// be externalized by the implementation's own codec.
pub trait Transferable: std::fmt::Debug + Send + Sync + Sized + 'static {
    /// Fully-qualified registration name.
    const TYPE_NAME: &'static str;

    fn serialize(&self) -> Result<Vec<u8>, CodecError>;

    fn deserialize(bytes: &[u8]) -> Result<Self, CodecError>;
}

/// Object-safe view of a transferable value held inside a [`Value`].
pub trait ErasedValue: Any + Send + Sync + std::fmt::Debug {
    fn type_name(&self) -> &'static str;
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Transferable> ErasedValue for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        self.serialize()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type EncodeFn = Box<dyn Fn(&Value) -> Result<Vec<u8>, CodecError> + Send + Sync>;
type DecodeFn = Box<dyn Fn(&[u8]) -> Result<Value, CodecError> + Send + Sync>;

/// A registered transferable codec, erased over the concrete type.
pub(crate) struct ErasedCodec {
    pub(crate) type_name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl ErasedCodec {
    pub(crate) fn of<T: Transferable>() -> Arc<Self> {
        Arc::new(ErasedCodec {
            type_name: T::TYPE_NAME,
            encode: Box::new(|value| match value {
                Value::Custom(c) => match c.inner.as_any().downcast_ref::<T>() {
                    Some(v) => v.serialize(),
                    None => Err(CodecError::TypeMismatch {
                        expected: T::TYPE_NAME.to_owned(),
                        got: c.type_name(),
                    }),
                },
                other => Err(CodecError::TypeMismatch {
                    expected: T::TYPE_NAME.to_owned(),
                    got: other.kind(),
                }),
            }),
            decode: Box::new(|bytes| {
                let v = T::deserialize(bytes)?;
                Ok(Value::Custom(CustomValue { inner: Arc::new(v) }))
            }),
        })
    }

    pub(crate) fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        (self.encode)(value)
    }

    pub(crate) fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        (self.decode)(bytes)
    }
}

impl std::fmt::Debug for ErasedCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasedCodec")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Pair(u32, u32);

    impl Transferable for Pair {
        const TYPE_NAME: &'static str = "test.Pair";

        fn serialize(&self) -> Result<Vec<u8>, CodecError> {
            let mut out = Vec::with_capacity(8);
            out.extend_from_slice(&self.0.to_le_bytes());
            out.extend_from_slice(&self.1.to_le_bytes());
            Ok(out)
        }

        fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
            if bytes.len() != 8 {
                return Err(CodecError::Truncated);
            }
            Ok(Pair(
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ))
        }
    }

    #[test]
    fn erased_codec_round_trips() {
        let codec = ErasedCodec::of::<Pair>();
        let bytes = codec.encode(&Value::custom(Pair(3, 9))).unwrap();
        let back = codec.decode(&bytes).unwrap();
        assert_eq!(back.downcast_ref::<Pair>(), Some(&Pair(3, 9)));
    }

    #[test]
    fn erased_codec_rejects_foreign_values() {
        let codec = ErasedCodec::of::<Pair>();
        let err = codec.encode(&Value::Int(1)).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }
}
