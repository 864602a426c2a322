#![deny(unsafe_code)]

//! ccrpc: a resource-oriented RPC framework.
//!
//! A stateful server object (a Core Resource Model, CRM) is reachable
//! through one declared interface over five interchangeable transports,
//! selected purely by an address URI: `thread://`, `memory://`, `ipc://`,
//! `tcp://`, or `http://`.
//!
//! The pieces:
//! - [`Registry`] — transferable codecs and interface descriptors, resolved
//!   to per-method marshal plans at registration.
//! - [`Server`] — owns a [`Crm`] behind one interface, dispatches envelopes,
//!   one worker per connection, graceful stop with shutdown hook.
//! - [`Proxy`] — the calling side: pooled connections, lazy handshake,
//!   uniform [`RpcError`] on every failure.
//! - [`connect_crm`] / [`Component`] — ambient, task-scoped bindings that
//!   inject a live proxy into component functions.
//! - [`publish_tools`] — re-export a component module as tool handles for an
//!   external bridge host.
//!
//! # Example
//!
//! ```ignore
//! let registry = ccrpc::global();
//! registry.register_transferable::<Str>();
//! let interface = registry.register_interface(
//!     InterfaceDescriptor::builder("cc.test", Version::new(0, 1, 0), "Echo")
//!         .method("echo", [("text", TypeTag::custom::<Str>())], Some(TypeTag::custom::<Str>()))
//!         .build(),
//! )?;
//!
//! let server = Server::new(ServerConfig::new(
//!     "echo",
//!     Arc::new(EchoCrm::default()),
//!     Arc::clone(&interface),
//!     Address::parse("tcp://127.0.0.1:17011")?,
//! ));
//! server.start().await?;
//!
//! let proxy = Proxy::connect("tcp://127.0.0.1:17011", interface)?;
//! let reply = proxy.call("echo", vec![Value::custom(Str::from("hello"))]).await?;
//! ```

mod bridge;
mod runtime;

pub use bridge::{publish_tools, ComponentModule, ToolHandle, ToolParam, ADDRESS_PARAM};
pub use runtime::{ambient_proxy, connect_crm, Component};

pub use ccrpc_registry::{
    global, ArgSpec, CodecError, CustomValue, InterfaceBuilder, InterfaceDescriptor, InterfaceId,
    MethodSig, RegisteredInterface, Registry, RegistryError, Transferable, TypeTag, Value, Version,
};
pub use ccrpc_session::{
    ping, shutdown, Crm, CrmError, Proxy, ProxyConfig, RpcError, Server, ServerConfig,
    ServerState, DEFAULT_POOL_SIZE, DEFAULT_POOL_WAIT, DEFAULT_STOP_GRACE,
};
pub use ccrpc_transport::{AddrError, Address, Scheme};
pub use ccrpc_wire::{Status, DEFAULT_MAX_PAYLOAD, MAX_PAYLOAD_ENV};
