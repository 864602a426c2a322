//! In-process transport backed by byte ring buffers.
//!
//! Like the thread driver, but each connection direction is a fixed-capacity
//! byte ring instead of a message queue: large frames stream through the
//! ring in place without per-message queue allocations. One writer and one
//! reader per ring; wake-up is cooperative via `Notify`.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::framing::frame_cap;
use crate::{Address, BoxConnection, BoxListener, Connection, Listener};

/// Bytes buffered per direction.
const RING_CAPACITY: usize = 256 * 1024;

/// Pending connections buffered before `connect` blocks.
const ACCEPT_DEPTH: usize = 16;

static ENDPOINTS: Lazy<Mutex<HashMap<String, mpsc::Sender<RingConnection>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

struct RingState {
    buf: Vec<u8>,
    /// Read position.
    head: usize,
    /// Bytes currently stored.
    len: usize,
    closed: bool,
}

impl RingState {
    fn push(&mut self, src: &[u8]) {
        let capacity = self.buf.len();
        let write_pos = (self.head + self.len) % capacity;
        let first = src.len().min(capacity - write_pos);
        self.buf[write_pos..write_pos + first].copy_from_slice(&src[..first]);
        self.buf[..src.len() - first].copy_from_slice(&src[first..]);
        self.len += src.len();
    }

    fn pop_into(&mut self, dst: &mut [u8]) {
        let capacity = self.buf.len();
        let dst_len = dst.len();
        let first = dst_len.min(capacity - self.head);
        dst[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        dst[first..].copy_from_slice(&self.buf[..dst_len - first]);
        self.head = (self.head + dst_len) % capacity;
        self.len -= dst_len;
    }
}

/// A single-producer single-consumer byte ring with cooperative wake-up.
struct Ring {
    state: Mutex<RingState>,
    readable: Notify,
    writable: Notify,
    capacity: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Ring {
            state: Mutex::new(RingState {
                buf: vec![0; capacity],
                head: 0,
                len: 0,
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            capacity,
        }
    }

    async fn write_all(&self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            // Register for wake-up before checking, so a notify between the
            // check and the await is not lost.
            let writable = self.writable.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "peer disconnected",
                    ));
                }
                let space = self.capacity - state.len;
                if space > 0 {
                    let n = space.min(bytes.len());
                    state.push(&bytes[..n]);
                    bytes = &bytes[n..];
                    drop(state);
                    self.readable.notify_one();
                    continue;
                }
            }
            writable.await;
        }
        Ok(())
    }

    /// Fill `out` exactly. Returns `false` only when the ring is closed and
    /// empty before the first byte and `eof_ok_at_start` allows it.
    async fn read_exact(&self, out: &mut [u8], eof_ok_at_start: bool) -> io::Result<bool> {
        let mut filled = 0;
        while filled < out.len() {
            let readable = self.readable.notified();
            {
                let mut state = self.state.lock();
                if state.len > 0 {
                    let n = state.len.min(out.len() - filled);
                    state.pop_into(&mut out[filled..filled + n]);
                    filled += n;
                    drop(state);
                    self.writable.notify_one();
                    continue;
                }
                if state.closed {
                    if filled == 0 && eof_ok_at_start {
                        return Ok(false);
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "ring closed inside frame",
                    ));
                }
            }
            readable.await;
        }
        Ok(true)
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_one();
        self.writable.notify_one();
    }
}

/// One side of a ring pair. Frames are a `u32` big-endian length followed by
/// the frame bytes, streamed through the ring.
pub(crate) struct RingConnection {
    tx: Arc<Ring>,
    rx: Arc<Ring>,
}

pub(crate) fn connection_pair() -> (RingConnection, RingConnection) {
    let a_to_b = Arc::new(Ring::new(RING_CAPACITY));
    let b_to_a = Arc::new(Ring::new(RING_CAPACITY));
    (
        RingConnection {
            tx: Arc::clone(&a_to_b),
            rx: Arc::clone(&b_to_a),
        },
        RingConnection {
            tx: b_to_a,
            rx: a_to_b,
        },
    )
}

#[async_trait]
impl Connection for RingConnection {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        if frame.len() > frame_cap() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("outbound frame of {} bytes exceeds cap", frame.len()),
            ));
        }
        self.tx.write_all(&(frame.len() as u32).to_be_bytes()).await?;
        self.tx.write_all(frame).await
    }

    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        if !self.rx.read_exact(&mut len_buf, true).await? {
            return Ok(None);
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > frame_cap() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("inbound frame of {len} bytes exceeds cap"),
            ));
        }
        let mut frame = vec![0u8; len];
        self.rx.read_exact(&mut frame, false).await?;
        Ok(Some(frame))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx.close();
        self.rx.close();
        Ok(())
    }
}

impl Drop for RingConnection {
    fn drop(&mut self) {
        self.tx.close();
        self.rx.close();
    }
}

struct RingListener {
    name: String,
    accept_rx: mpsc::Receiver<RingConnection>,
}

impl RingListener {
    fn unregister(&self) {
        ENDPOINTS.lock().remove(&self.name);
    }
}

#[async_trait]
impl Listener for RingListener {
    async fn accept(&mut self) -> io::Result<BoxConnection> {
        match self.accept_rx.recv().await {
            Some(conn) => Ok(Box::new(conn) as BoxConnection),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "listener closed",
            )),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.unregister();
        self.accept_rx.close();
        Ok(())
    }
}

impl Drop for RingListener {
    fn drop(&mut self) {
        self.unregister();
    }
}

pub(crate) async fn connect(addr: &Address) -> io::Result<BoxConnection> {
    let accept_tx = ENDPOINTS.lock().get(addr.target()).cloned();
    let accept_tx = accept_tx.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("no listener at {addr}"),
        )
    })?;

    let (client, server) = connection_pair();
    accept_tx.send(server).await.map_err(|_| {
        io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("listener at {addr} is shutting down"),
        )
    })?;
    Ok(Box::new(client))
}

pub(crate) fn bind(addr: &Address) -> io::Result<BoxListener> {
    let mut endpoints = ENDPOINTS.lock();
    if endpoints.contains_key(addr.target()) {
        return Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("{addr} is already bound"),
        ));
    }
    let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_DEPTH);
    endpoints.insert(addr.target().to_owned(), accept_tx);
    tracing::debug!(%addr, "bound memory endpoint");
    Ok(Box::new(RingListener {
        name: addr.target().to_owned(),
        accept_rx,
    }))
}
