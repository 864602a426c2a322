//! The process-wide type and interface registry.

use std::collections::HashMap;
use std::sync::Arc;

use ccrpc_wire::FLAG_NULL_ARGS;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::codec::{decode_value, encode_value, CodecError, ResolvedCodec};
use crate::interface::{InterfaceDescriptor, InterfaceId, MethodSig};
use crate::transferable::{ErasedCodec, Transferable};
use crate::value::{TypeTag, Value};

/// Errors surfaced at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A signature names a type that is neither built-in nor a registered
    /// transferable.
    UnknownType {
        interface: String,
        method: String,
        slot: String,
        type_name: String,
    },
    /// An interface with this identity is already registered with a
    /// different method list.
    DescriptorConflict(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownType {
                interface,
                method,
                slot,
                type_name,
            } => write!(
                f,
                "unregistered type {type_name} in {interface}::{method} ({slot})"
            ),
            RegistryError::DescriptorConflict(id) => {
                write!(f, "interface {id} already registered with a different shape")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Marshal plan for one method, resolved at registration.
#[derive(Debug)]
pub struct MethodPlan {
    method_name: String,
    args: Vec<ResolvedCodec>,
    ret: Option<ResolvedCodec>,
    nullable_ret: bool,
}

impl MethodPlan {
    fn resolve(
        registry: &Registry,
        interface: &InterfaceId,
        sig: &MethodSig,
    ) -> Result<Self, RegistryError> {
        let mut args = Vec::with_capacity(sig.args.len());
        for arg in &sig.args {
            args.push(registry.resolve(&arg.tag).map_err(|type_name| {
                RegistryError::UnknownType {
                    interface: interface.to_string(),
                    method: sig.name.clone(),
                    slot: format!("arg {}", arg.name),
                    type_name,
                }
            })?);
        }
        let ret = match &sig.ret {
            Some(tag) => Some(registry.resolve(tag).map_err(|type_name| {
                RegistryError::UnknownType {
                    interface: interface.to_string(),
                    method: sig.name.clone(),
                    slot: "return".to_owned(),
                    type_name,
                }
            })?),
            None => None,
        };
        Ok(MethodPlan {
            method_name: sig.name.clone(),
            args,
            ret,
            nullable_ret: sig.nullable_ret,
        })
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Encode an argument tuple into `(flags, arg_blob)`.
    ///
    /// A `Value::Null` marks an absent slot (a named argument that was not
    /// supplied). When any slot is absent the null-args flag is set and every
    /// slot carries a one-byte presence prefix; otherwise slots are raw codec
    /// output. The layout is a function of the values alone, so encoding is
    /// deterministic.
    pub fn encode_args(&self, args: &[Value]) -> Result<(u8, Vec<u8>), CodecError> {
        if args.len() != self.args.len() {
            return Err(CodecError::ArgCount {
                expected: self.args.len(),
                got: args.len(),
            });
        }
        let any_null = args.iter().any(Value::is_null);
        let flags = if any_null { FLAG_NULL_ARGS } else { 0 };

        let mut blob = Vec::new();
        blob.extend_from_slice(&(args.len() as u32).to_le_bytes());
        for (codec, value) in self.args.iter().zip(args) {
            if any_null {
                blob.push(u8::from(!value.is_null()));
            }
            if !value.is_null() {
                encode_value(codec, value, &mut blob)?;
            }
        }
        Ok((flags, blob))
    }

    /// Decode an argument blob back into one value per declared slot.
    pub fn decode_args(&self, flags: u8, blob: &[u8]) -> Result<Vec<Value>, CodecError> {
        let mut cursor = blob;
        let count = take_count(&mut cursor)?;
        if count != self.args.len() {
            return Err(CodecError::ArgCount {
                expected: self.args.len(),
                got: count,
            });
        }
        let with_presence = flags & FLAG_NULL_ARGS != 0;
        let mut out = Vec::with_capacity(count);
        for codec in &self.args {
            if with_presence {
                let present = take_byte(&mut cursor)?;
                if present == 0 {
                    out.push(Value::Null);
                    continue;
                }
            }
            out.push(decode_value(codec, &mut cursor)?);
        }
        if !cursor.is_empty() {
            return Err(CodecError::user(format!(
                "{} trailing bytes after argument tuple",
                cursor.len()
            )));
        }
        Ok(out)
    }

    /// Encode a return value into a reply payload.
    pub fn encode_ret(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match (&self.ret, value) {
            (None, Value::Null) => Ok(Vec::new()),
            (None, other) => Err(CodecError::TypeMismatch {
                expected: "void".to_owned(),
                got: other.kind(),
            }),
            (Some(_), Value::Null) if self.nullable_ret => Ok(Vec::new()),
            (Some(_), Value::Null) => Err(CodecError::UnexpectedNull(format!(
                "return of {}",
                self.method_name
            ))),
            (Some(codec), value) => {
                let mut out = Vec::new();
                encode_value(codec, value, &mut out)?;
                Ok(out)
            }
        }
    }

    /// Decode a SUCCESS reply payload into the return value.
    pub fn decode_ret(&self, payload: &[u8]) -> Result<Value, CodecError> {
        match &self.ret {
            None => {
                if payload.is_empty() {
                    Ok(Value::Null)
                } else {
                    Err(CodecError::user("non-empty payload for void return"))
                }
            }
            Some(codec) => {
                if payload.is_empty() {
                    return if self.nullable_ret {
                        Ok(Value::Null)
                    } else {
                        Err(CodecError::UnexpectedNull(format!(
                            "return of {}",
                            self.method_name
                        )))
                    };
                }
                let mut cursor = payload;
                let value = decode_value(codec, &mut cursor)?;
                if !cursor.is_empty() {
                    return Err(CodecError::user(format!(
                        "{} trailing bytes after return value",
                        cursor.len()
                    )));
                }
                Ok(value)
            }
        }
    }
}

fn take_byte(cursor: &mut &[u8]) -> Result<u8, CodecError> {
    if cursor.is_empty() {
        return Err(CodecError::Truncated);
    }
    let b = cursor[0];
    *cursor = &cursor[1..];
    Ok(b)
}

fn take_count(cursor: &mut &[u8]) -> Result<usize, CodecError> {
    if cursor.len() < 4 {
        return Err(CodecError::Truncated);
    }
    let n = u32::from_le_bytes([cursor[0], cursor[1], cursor[2], cursor[3]]) as usize;
    *cursor = &cursor[4..];
    Ok(n)
}

/// An interface registered against a registry: the immutable descriptor plus
/// one marshal plan per method.
#[derive(Debug)]
pub struct RegisteredInterface {
    descriptor: Arc<InterfaceDescriptor>,
    plans: Vec<MethodPlan>,
}

impl RegisteredInterface {
    pub fn descriptor(&self) -> &InterfaceDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> &InterfaceId {
        self.descriptor.id()
    }

    pub fn plan(&self, method_id: u32) -> Option<&MethodPlan> {
        self.plans.get(method_id as usize)
    }

    pub fn plan_by_name(&self, name: &str) -> Option<(u32, &MethodPlan)> {
        let id = self.descriptor.method_id(name)?;
        Some((id, &self.plans[id as usize]))
    }
}

type InterfaceKey = (String, String, u32, u32, u32);

fn key_of(id: &InterfaceId) -> InterfaceKey {
    (
        id.namespace.clone(),
        id.name.clone(),
        id.version.major,
        id.version.minor,
        id.version.patch,
    )
}

/// Two append-only tables: transferable codecs and registered interfaces.
#[derive(Default)]
pub struct Registry {
    transferables: RwLock<HashMap<&'static str, Arc<ErasedCodec>>>,
    interfaces: RwLock<HashMap<InterfaceKey, Arc<RegisteredInterface>>>,
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::default);

/// The process-wide registry. Registration is append-only; entries are never
/// removed.
pub fn global() -> &'static Registry {
    &GLOBAL
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Register a transferable type. Registering the same type name twice is
    /// a no-op; the first registration wins.
    pub fn register_transferable<T: Transferable>(&self) {
        let mut table = self.transferables.write();
        if table.contains_key(T::TYPE_NAME) {
            return;
        }
        table.insert(T::TYPE_NAME, ErasedCodec::of::<T>());
        tracing::debug!(type_name = T::TYPE_NAME, "registered transferable");
    }

    /// Resolve a signature tag to a codec. Errors carry the missing type
    /// name for the caller to contextualize.
    fn resolve(&self, tag: &TypeTag) -> Result<ResolvedCodec, String> {
        Ok(match tag {
            TypeTag::Bool => ResolvedCodec::Bool,
            TypeTag::Int => ResolvedCodec::Int,
            TypeTag::Float => ResolvedCodec::Float,
            TypeTag::Str => ResolvedCodec::Str,
            TypeTag::Bytes => ResolvedCodec::Bytes,
            TypeTag::Seq(elem) => ResolvedCodec::Seq(Box::new(self.resolve(elem)?)),
            TypeTag::Map(elem) => ResolvedCodec::Map(Box::new(self.resolve(elem)?)),
            TypeTag::Custom(name) => {
                let table = self.transferables.read();
                let codec = table.get(name.as_str()).ok_or_else(|| name.clone())?;
                ResolvedCodec::Custom(Arc::clone(codec))
            }
        })
    }

    /// Register an interface, resolving every signature type to a codec.
    ///
    /// Registering an identical descriptor again returns the existing entry;
    /// a different descriptor under the same identity is a conflict.
    pub fn register_interface(
        &self,
        descriptor: InterfaceDescriptor,
    ) -> Result<Arc<RegisteredInterface>, RegistryError> {
        let key = key_of(descriptor.id());
        if let Some(existing) = self.interfaces.read().get(&key) {
            return if *existing.descriptor == descriptor {
                Ok(Arc::clone(existing))
            } else {
                Err(RegistryError::DescriptorConflict(
                    descriptor.id().to_string(),
                ))
            };
        }

        let mut plans = Vec::with_capacity(descriptor.methods().len());
        for sig in descriptor.methods() {
            plans.push(MethodPlan::resolve(self, descriptor.id(), sig)?);
        }

        let mut table = self.interfaces.write();
        // A racing registration of the same descriptor may have won; keep it.
        if let Some(existing) = table.get(&key) {
            return if *existing.descriptor == descriptor {
                Ok(Arc::clone(existing))
            } else {
                Err(RegistryError::DescriptorConflict(
                    descriptor.id().to_string(),
                ))
            };
        }
        tracing::debug!(interface = %descriptor.id(), "registered interface");
        let registered = Arc::new(RegisteredInterface {
            descriptor: Arc::new(descriptor),
            plans,
        });
        table.insert(key, Arc::clone(&registered));
        Ok(registered)
    }

    /// Look up a registered interface by identity.
    pub fn interface(&self, id: &InterfaceId) -> Option<Arc<RegisteredInterface>> {
        self.interfaces.read().get(&key_of(id)).cloned()
    }
}
