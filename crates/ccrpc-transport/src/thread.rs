//! In-process transport backed by bounded message queues.
//!
//! A process-wide table maps endpoint names to accept queues. Connecting
//! hands the server half of a fresh queue pair to the listener; both sides
//! then exchange whole frames over `mpsc` channels with cooperative
//! wake-up. Addresses are not inherited across process boundaries.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{Address, BoxConnection, BoxListener, Connection, Listener};

/// Frames buffered per direction before senders block.
const QUEUE_DEPTH: usize = 64;

/// Pending connections buffered before `connect` blocks.
const ACCEPT_DEPTH: usize = 16;

static ENDPOINTS: Lazy<Mutex<HashMap<String, mpsc::Sender<QueueConnection>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// One side of a queue pair.
pub(crate) struct QueueConnection {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

/// Create a connected pair of queue-backed connections.
pub(crate) fn connection_pair() -> (QueueConnection, QueueConnection) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::channel(QUEUE_DEPTH);
    let (b_to_a_tx, b_to_a_rx) = mpsc::channel(QUEUE_DEPTH);
    (
        QueueConnection {
            tx: a_to_b_tx,
            rx: b_to_a_rx,
        },
        QueueConnection {
            tx: b_to_a_tx,
            rx: a_to_b_rx,
        },
    )
}

#[async_trait]
impl Connection for QueueConnection {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx
            .send(frame.to_vec())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer disconnected"))
    }

    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.rx.close();
        Ok(())
    }
}

pub(crate) struct QueueListener {
    name: String,
    accept_rx: mpsc::Receiver<QueueConnection>,
}

impl QueueListener {
    fn unregister(&self) {
        ENDPOINTS.lock().remove(&self.name);
    }
}

#[async_trait]
impl Listener for QueueListener {
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

impl Drop for QueueListener {
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
    tracing::debug!(%addr, "bound thread endpoint");
    Ok(Box::new(QueueListener {
        name: addr.target().to_owned(),
        accept_rx,
    }))
}
