//! Interface descriptors.
//!
//! An interface is identified by `(namespace, version, name)` and carries an
//! ordered list of method signatures. Method ids are indices into that list,
//! so declaration order is part of the wire contract. Two descriptors are
//! wire-compatible iff their identities match and their method lists are
//! equal element-wise.

use ccrpc_wire::Handshake;

use crate::value::TypeTag;

/// Semantic version of an interface.
///
/// The wire handshake carries major and minor only; patch never affects
/// compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Identity of an interface: namespace + version + name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceId {
    pub namespace: String,
    pub name: String,
    pub version: Version,
}

impl std::fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.version)
    }
}

/// One named, typed argument slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    pub name: String,
    pub tag: TypeTag,
}

/// Signature of one method: name, ordered arguments, return type.
///
/// `ret: None` declares a void method. `nullable_ret` allows a null return,
/// encoded as a zero-length SUCCESS payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
    pub name: String,
    pub args: Vec<ArgSpec>,
    pub ret: Option<TypeTag>,
    pub nullable_ret: bool,
}

/// An immutable interface descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDescriptor {
    id: InterfaceId,
    methods: Vec<MethodSig>,
}

impl InterfaceDescriptor {
    pub fn builder(
        namespace: impl Into<String>,
        version: Version,
        name: impl Into<String>,
    ) -> InterfaceBuilder {
        InterfaceBuilder {
            id: InterfaceId {
                namespace: namespace.into(),
                name: name.into(),
                version,
            },
            methods: Vec::new(),
        }
    }

    pub fn id(&self) -> &InterfaceId {
        &self.id
    }

    pub fn methods(&self) -> &[MethodSig] {
        &self.methods
    }

    /// Look up a method by wire id (its index in declaration order).
    pub fn method(&self, method_id: u32) -> Option<&MethodSig> {
        self.methods.get(method_id as usize)
    }

    /// Look up a method's wire id by name.
    pub fn method_id(&self, name: &str) -> Option<u32> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .map(|i| i as u32)
    }

    /// The identity frame sent as the first message on a new connection.
    pub fn handshake(&self) -> Handshake {
        Handshake {
            namespace: self.id.namespace.clone(),
            name: self.id.name.clone(),
            major: self.id.version.major,
            minor: self.id.version.minor,
        }
    }

    /// Whether a peer's handshake names this interface.
    pub fn accepts(&self, hs: &Handshake) -> bool {
        hs.namespace == self.id.namespace
            && hs.name == self.id.name
            && hs.major == self.id.version.major
            && hs.minor == self.id.version.minor
    }
}

/// Builder for [`InterfaceDescriptor`]. Declaration order fixes method ids.
pub struct InterfaceBuilder {
    id: InterfaceId,
    methods: Vec<MethodSig>,
}

impl InterfaceBuilder {
    /// Declare a method with a non-nullable return (`None` = void).
    pub fn method<'a>(
        self,
        name: impl Into<String>,
        args: impl IntoIterator<Item = (&'a str, TypeTag)>,
        ret: Option<TypeTag>,
    ) -> Self {
        self.push(name, args, ret, false)
    }

    /// Declare a method whose return value may be null.
    pub fn nullable_method<'a>(
        self,
        name: impl Into<String>,
        args: impl IntoIterator<Item = (&'a str, TypeTag)>,
        ret: TypeTag,
    ) -> Self {
        self.push(name, args, Some(ret), true)
    }

    fn push<'a>(
        mut self,
        name: impl Into<String>,
        args: impl IntoIterator<Item = (&'a str, TypeTag)>,
        ret: Option<TypeTag>,
        nullable_ret: bool,
    ) -> Self {
        self.methods.push(MethodSig {
            name: name.into(),
            args: args
                .into_iter()
                .map(|(name, tag)| ArgSpec {
                    name: name.to_owned(),
                    tag,
                })
                .collect(),
            ret,
            nullable_ret,
        });
        self
    }

    pub fn build(self) -> InterfaceDescriptor {
        InterfaceDescriptor {
            id: self.id,
            methods: self.methods,
        }
    }
}
