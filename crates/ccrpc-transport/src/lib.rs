#![deny(unsafe_code)]

//! Transport drivers for ccrpc.
//!
//! Five interchangeable request/response channels behind one contract:
//! [`connect`] returns a [`Connection`], [`bind`] a [`Listener`], and every
//! `recv` delivers exactly one framed message. The driver is selected purely
//! by the address scheme:
//!
//! - `thread://<name>` — process-wide endpoint table of bounded queues
//! - `memory://<name>` — in-process byte ring buffers per direction
//! - `ipc://<path>` — Unix domain socket, 4-byte length framing
//! - `tcp://<host>:<port>` — TCP stream, 4-byte length framing
//! - `http://<host>:<port>` — HTTP/1.1, one `POST /rpc` per call
//!
//! Within one connection replies are delivered in send order; across
//! connections no ordering is guaranteed.

mod addr;
mod framing;
mod http;
mod ipc;
mod memory;
mod tcp;
mod thread;

use std::io;

use async_trait::async_trait;

pub use addr::{AddrError, Address, Scheme};
pub use framing::LengthPrefixed;

/// One framed, bidirectional request/response channel.
///
/// `recv` returns `Ok(None)` on clean peer close at a frame boundary; a
/// close mid-frame is an error. Send and recv may block; everything else is
/// non-blocking.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()>;
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>>;
    async fn close(&mut self) -> io::Result<()>;
}

pub type BoxConnection = Box<dyn Connection>;

/// Accepts inbound connections for one bound address.
#[async_trait]
pub trait Listener: Send {
    async fn accept(&mut self) -> io::Result<BoxConnection>;

    /// Stop accepting and release the per-transport resource (endpoint table
    /// entry, socket file, listening socket).
    async fn close(&mut self) -> io::Result<()>;
}

pub type BoxListener = Box<dyn Listener>;

/// Open a connection to `addr`, selecting the driver by scheme.
pub async fn connect(addr: &Address) -> io::Result<BoxConnection> {
    match addr.scheme() {
        Scheme::Thread => thread::connect(addr).await,
        Scheme::Memory => memory::connect(addr).await,
        Scheme::Ipc => ipc::connect(addr).await,
        Scheme::Tcp => tcp::connect(addr).await,
        Scheme::Http => http::connect(addr).await,
    }
}

/// Bind a listener at `addr`, selecting the driver by scheme.
pub async fn bind(addr: &Address) -> io::Result<BoxListener> {
    match addr.scheme() {
        Scheme::Thread => thread::bind(addr),
        Scheme::Memory => memory::bind(addr),
        Scheme::Ipc => ipc::bind(addr),
        Scheme::Tcp => tcp::bind(addr).await,
        Scheme::Http => http::bind(addr).await,
    }
}
