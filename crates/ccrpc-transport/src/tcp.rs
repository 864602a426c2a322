//! TCP transport with 4-byte length framing.

use std::io;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::framing::LengthPrefixed;
use crate::{Address, BoxConnection, BoxListener, Listener};

pub(crate) async fn connect(addr: &Address) -> io::Result<BoxConnection> {
    let stream = TcpStream::connect(addr.target()).await?;
    stream.set_nodelay(true)?;
    Ok(Box::new(LengthPrefixed::new(stream)))
}

pub(crate) async fn bind(addr: &Address) -> io::Result<BoxListener> {
    let inner = TcpListener::bind(addr.target()).await?;
    tracing::debug!(%addr, "bound tcp endpoint");
    Ok(Box::new(TcpFrameListener { inner }))
}

struct TcpFrameListener {
    inner: TcpListener,
}

#[async_trait]
impl Listener for TcpFrameListener {
    async fn accept(&mut self) -> io::Result<BoxConnection> {
        let (stream, _peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(LengthPrefixed::new(stream)))
    }

    async fn close(&mut self) -> io::Result<()> {
        // Dropping the std listener releases the port; nothing else to do.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Connection;

    #[tokio::test]
    async fn connect_accept_exchange() {
        let addr = Address::parse("tcp://127.0.0.1:17911").unwrap();
        let mut listener = bind(&addr).await.unwrap();
        let mut client = connect(&addr).await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.send(b"over tcp").await.unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), b"over tcp");
    }

    #[tokio::test]
    async fn connect_without_listener_is_refused() {
        let addr = Address::parse("tcp://127.0.0.1:17912").unwrap();
        let err = match connect(&addr).await {
            Ok(_) => panic!("expected connect to fail"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
