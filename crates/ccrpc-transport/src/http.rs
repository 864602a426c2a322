//! Minimal HTTP/1.1 transport.
//!
//! Each call is one `POST /rpc` with `Content-Type: application/octet-stream`;
//! the request body carries the call envelope and the response body the reply
//! envelope. Connections are keep-alive, so a pooled connection serves many
//! calls. The request/response pairing makes HTTP a natural fit for the
//! one-frame-per-recv contract; no router layer is involved.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::framing::frame_cap;
use crate::{Address, BoxConnection, BoxListener, Connection, Listener};

/// Cap on request/response head size.
const MAX_HEAD: usize = 16 * 1024;

const RPC_PATH: &str = "/rpc";

/// A TCP stream with a carry buffer for bytes read past the current head.
struct HttpStream {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl HttpStream {
    fn new(stream: TcpStream) -> Self {
        HttpStream {
            stream,
            buf: Vec::new(),
        }
    }

    /// Read one head, up to and including the blank line. `Ok(None)` on a
    /// clean close before any byte of the next message.
    async fn read_head(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(end) = find_head_end(&self.buf) {
                let head_bytes: Vec<u8> = self.buf.drain(..end + 4).collect();
                let head = String::from_utf8(head_bytes)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-utf8 head"))?;
                return Ok(Some(head));
            }
            if self.buf.len() > MAX_HEAD {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "http head too large",
                ));
            }

            let mut tmp = [0u8; 4096];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "eof inside http head",
                ));
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    async fn read_body(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut body = Vec::with_capacity(len);
        let buffered = self.buf.len().min(len);
        body.extend(self.buf.drain(..buffered));
        if body.len() < len {
            let mut rest = vec![0u8; len - body.len()];
            self.stream.read_exact(&mut rest).await?;
            body.extend_from_slice(&rest);
        }
        Ok(body)
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Case-insensitive header lookup over a parsed head.
fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

fn content_length(head: &str) -> io::Result<usize> {
    let value = header_value(head, "content-length").ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing content-length")
    })?;
    let len: usize = value
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad content-length"))?;
    if len > frame_cap() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("http body of {len} bytes exceeds cap"),
        ));
    }
    Ok(len)
}

fn wants_close(head: &str) -> bool {
    header_value(head, "connection")
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
}

// ============================================================================
// Client side
// ============================================================================

struct HttpClientConnection {
    io: HttpStream,
    host: String,
    server_closing: bool,
}

#[async_trait]
impl Connection for HttpClientConnection {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.server_closing {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "server closed the http connection",
            ));
        }
        let head = format!(
            "POST {RPC_PATH} HTTP/1.1\r\n\
             Host: {}\r\n\
             Content-Type: application/octet-stream\r\n\
             Content-Length: {}\r\n\r\n",
            self.host,
            frame.len()
        );
        self.io.write_all(head.as_bytes()).await?;
        self.io.write_all(frame).await
    }

    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let head = match self.io.read_head().await? {
            Some(head) => head,
            None => return Ok(None),
        };

        let status_line = head.lines().next().unwrap_or_default();
        let mut parts = status_line.split_whitespace();
        let version = parts.next().unwrap_or_default();
        let code = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") || code != "200" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected http response: {status_line}"),
            ));
        }

        if wants_close(&head) {
            self.server_closing = true;
        }
        let len = content_length(&head)?;
        Ok(Some(self.io.read_body(len).await?))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.io.stream.shutdown().await
    }
}

pub(crate) async fn connect(addr: &Address) -> io::Result<BoxConnection> {
    let stream = TcpStream::connect(addr.target()).await?;
    stream.set_nodelay(true)?;
    Ok(Box::new(HttpClientConnection {
        io: HttpStream::new(stream),
        host: addr.target().to_owned(),
        server_closing: false,
    }))
}

// ============================================================================
// Server side
// ============================================================================

struct HttpServerConnection {
    io: HttpStream,
}

impl HttpServerConnection {
    async fn reject(&mut self, status: &str) -> io::Result<()> {
        let response =
            format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        self.io.write_all(response.as_bytes()).await
    }
}

#[async_trait]
impl Connection for HttpServerConnection {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let head = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/octet-stream\r\n\
             Content-Length: {}\r\n\r\n",
            frame.len()
        );
        self.io.write_all(head.as_bytes()).await?;
        self.io.write_all(frame).await
    }

    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let head = match self.io.read_head().await? {
            Some(head) => head,
            None => return Ok(None),
        };

        let request_line = head.lines().next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();
        if method != "POST" || path != RPC_PATH {
            self.reject("404 Not Found").await?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected request: {method} {path}"),
            ));
        }

        let len = content_length(&head)?;
        Ok(Some(self.io.read_body(len).await?))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.io.stream.shutdown().await
    }
}

struct HttpFrameListener {
    inner: TcpListener,
}

#[async_trait]
impl Listener for HttpFrameListener {
    async fn accept(&mut self) -> io::Result<BoxConnection> {
        let (stream, _peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(HttpServerConnection {
            io: HttpStream::new(stream),
        }))
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) async fn bind(addr: &Address) -> io::Result<BoxListener> {
    let inner = TcpListener::bind(addr.target()).await?;
    tracing::debug!(%addr, "bound http endpoint");
    Ok(Box::new(HttpFrameListener { inner }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair(port: u16) -> (BoxConnection, BoxConnection) {
        let addr = Address::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        let mut listener = bind(&addr).await.unwrap();
        let client = connect(&addr).await.unwrap();
        let server = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn post_round_trip() {
        let (mut client, mut server) = pair(17921).await;

        client.send(b"call-envelope").await.unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), b"call-envelope");
        server.send(b"reply-envelope").await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), b"reply-envelope");
    }

    #[tokio::test]
    async fn keep_alive_serves_multiple_calls() {
        let (mut client, mut server) = pair(17922).await;

        for i in 0..3u8 {
            client.send(&[i]).await.unwrap();
            assert_eq!(server.recv().await.unwrap().unwrap(), [i]);
            server.send(&[i, i]).await.unwrap();
            assert_eq!(client.recv().await.unwrap().unwrap(), [i, i]);
        }
    }

    #[tokio::test]
    async fn non_rpc_request_gets_404() {
        let addr = Address::parse("http://127.0.0.1:17923").unwrap();
        let mut listener = bind(&addr).await.unwrap();

        let mut raw = TcpStream::connect(addr.target()).await.unwrap();
        let server_task = tokio::spawn(async move {
            let mut server = listener.accept().await.unwrap();
            server.recv().await
        });

        raw.write_all(b"GET /health HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();

        let served = server_task.await.unwrap();
        assert!(served.is_err());

        let mut response = Vec::new();
        raw.read_to_end(&mut response).await.unwrap();
        assert!(response.starts_with(b"HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn client_close_is_clean_for_the_server() {
        let (client, mut server) = pair(17924).await;
        drop(client);
        assert!(server.recv().await.unwrap().is_none());
    }
}
