#![deny(unsafe_code)]

//! Interface and type registry for ccrpc.
//!
//! The registry keeps two append-only tables:
//! - transferables: fully-qualified type name → erased serialize/deserialize
//! - interfaces: (namespace, version, name) → registered descriptor
//!
//! At interface registration every argument and return type is resolved to a
//! codec; resolution failures surface immediately instead of at call time.
//! A registered interface carries one precomputed marshal plan per method,
//! so the call path never takes a registry lock.

mod codec;
mod interface;
mod registry;
mod transferable;
mod value;

pub use codec::CodecError;
pub use interface::{
    ArgSpec, InterfaceBuilder, InterfaceDescriptor, InterfaceId, MethodSig, Version,
};
pub use registry::{global, MethodPlan, RegisteredInterface, Registry, RegistryError};
pub use transferable::Transferable;
pub use value::{CustomValue, TypeTag, Value};
