//! Dynamic values and signature type tags.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::codec::CodecError;
use crate::transferable::{ErasedValue, Transferable};

/// Type of an argument or return slot in a method signature.
///
/// `Custom` names a registered transferable by its fully-qualified type
/// name. If a transferable shadows a built-in name, the transferable wins:
/// `Custom` always resolves against the transferable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    Seq(Box<TypeTag>),
    /// String-keyed map of the element type.
    Map(Box<TypeTag>),
    Custom(String),
}

impl TypeTag {
    /// Tag for a registered transferable type.
    pub fn custom<T: Transferable>() -> Self {
        TypeTag::Custom(T::TYPE_NAME.to_owned())
    }

    pub fn seq(element: TypeTag) -> Self {
        TypeTag::Seq(Box::new(element))
    }

    pub fn map(element: TypeTag) -> Self {
        TypeTag::Map(Box::new(element))
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeTag::Bool => f.write_str("bool"),
            TypeTag::Int => f.write_str("int"),
            TypeTag::Float => f.write_str("float"),
            TypeTag::Str => f.write_str("str"),
            TypeTag::Bytes => f.write_str("bytes"),
            TypeTag::Seq(t) => write!(f, "seq<{t}>"),
            TypeTag::Map(t) => write!(f, "map<{t}>"),
            TypeTag::Custom(name) => f.write_str(name),
        }
    }
}

/// A dynamically typed argument or return value.
///
/// `Null` marks an absent argument slot or a null return from a method
/// declared with a nullable return type; it is never encoded by a codec
/// directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Custom(CustomValue),
}

impl Value {
    /// Wrap a transferable value.
    pub fn custom<T: Transferable>(value: T) -> Self {
        Value::Custom(CustomValue {
            inner: Arc::new(value),
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the value's shape, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Seq(_) => "seq",
            Value::Map(_) => "map",
            Value::Custom(_) => "custom",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the wrapped transferable, if this is a custom value of `T`.
    pub fn downcast_ref<T: Transferable>(&self) -> Option<&T> {
        match self {
            Value::Custom(c) => c.downcast_ref(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// A type-erased transferable value.
///
/// Holds the live Rust value; serialization happens only when the value
/// crosses the wire. Equality compares type name and serialized form, which
/// is well-defined because transferable codecs are pure.
#[derive(Debug, Clone)]
pub struct CustomValue {
    pub(crate) inner: Arc<dyn ErasedValue>,
}

impl CustomValue {
    /// The registered type name of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }

    /// Serialize the wrapped value with its own codec.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        self.inner.to_bytes()
    }

    pub fn downcast_ref<T: Transferable>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        if self.type_name() != other.type_name() {
            return false;
        }
        match (self.to_bytes(), other.to_bytes()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Tag(String);

    impl Transferable for Tag {
        const TYPE_NAME: &'static str = "test.Tag";

        fn serialize(&self) -> Result<Vec<u8>, CodecError> {
            Ok(self.0.as_bytes().to_vec())
        }

        fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
            String::from_utf8(bytes.to_vec())
                .map(Tag)
                .map_err(|_| CodecError::InvalidUtf8)
        }
    }

    #[test]
    fn custom_value_downcasts_to_original_type() {
        let v = Value::custom(Tag("hello".into()));
        assert_eq!(v.kind(), "custom");
        assert_eq!(v.downcast_ref::<Tag>(), Some(&Tag("hello".into())));
    }

    #[test]
    fn custom_equality_is_by_serialized_form() {
        let a = Value::custom(Tag("x".into()));
        let b = Value::custom(Tag("x".into()));
        let c = Value::custom(Tag("y".into()));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn type_tags_display_composites() {
        let tag = TypeTag::map(TypeTag::seq(TypeTag::custom::<Tag>()));
        assert_eq!(tag.to_string(), "map<seq<test.Tag>>");
    }
}
