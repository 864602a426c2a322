//! Host-local transport over Unix domain sockets.
//!
//! The address embeds the socket's absolute filesystem path. Frames use the
//! shared 4-byte length framing. The socket file is removed when the
//! listener closes.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};

use crate::framing::LengthPrefixed;
use crate::{Address, BoxConnection, BoxListener, Listener};

pub(crate) async fn connect(addr: &Address) -> io::Result<BoxConnection> {
    let stream = UnixStream::connect(addr.target()).await?;
    Ok(Box::new(LengthPrefixed::new(stream)))
}

pub(crate) fn bind(addr: &Address) -> io::Result<BoxListener> {
    let path = PathBuf::from(addr.target());
    let inner = UnixListener::bind(&path)?;
    tracing::debug!(%addr, "bound ipc endpoint");
    Ok(Box::new(IpcListener {
        inner: Some(inner),
        path,
    }))
}

struct IpcListener {
    inner: Option<UnixListener>,
    path: PathBuf,
}

impl IpcListener {
    fn remove_socket_file(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::debug!(path = %self.path.display(), error = %e, "failed to remove socket file");
            }
        }
    }
}

#[async_trait]
impl Listener for IpcListener {
    async fn accept(&mut self) -> io::Result<BoxConnection> {
        let inner = self.inner.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "listener closed")
        })?;
        let (stream, _peer) = inner.accept().await?;
        Ok(Box::new(LengthPrefixed::new(stream)))
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.inner.take().is_some() {
            self.remove_socket_file();
        }
        Ok(())
    }
}

impl Drop for IpcListener {
    fn drop(&mut self) {
        if self.inner.take().is_some() {
            self.remove_socket_file();
        }
    }
}
