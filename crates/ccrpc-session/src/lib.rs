#![deny(unsafe_code)]

//! Server core and client proxy for ccrpc.
//!
//! A [`Server`] owns one CRM instance behind one declared interface and
//! dispatches envelopes to it, one worker task per accepted connection. A
//! [`Proxy`] is the calling side: it marshals arguments through the
//! registry's method plans, draws connections from a bounded pool, and
//! surfaces every failure as one [`RpcError`] carrying
//! `(status, message, address, method)`.

mod client;
mod error;
mod server;

pub use client::{
    ping, shutdown, Proxy, ProxyConfig, DEFAULT_POOL_SIZE, DEFAULT_POOL_WAIT,
    DEFAULT_TIMEOUT_ENV, POOL_SIZE_ENV,
};
pub use error::RpcError;
pub use server::{Crm, CrmError, Server, ServerConfig, ServerState, DEFAULT_STOP_GRACE};
