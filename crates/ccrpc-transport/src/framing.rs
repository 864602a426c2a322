//! Length-prefix framing for async byte streams.
//!
//! Each frame is a `u32` big-endian length followed by the frame bytes.
//! Generic over the stream type, so the same framing serves TCP sockets and
//! Unix domain sockets.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Connection;

/// Slack over the payload cap for envelope headers.
const FRAME_SLACK: usize = 64;

/// The largest frame any driver will read or write: the payload cap plus
/// envelope header slack.
pub(crate) fn frame_cap() -> usize {
    ccrpc_wire::max_payload() + FRAME_SLACK
}

/// A length-prefix framed byte stream.
pub struct LengthPrefixed<S> {
    stream: S,
    frame_cap: usize,
}

impl<S> LengthPrefixed<S> {
    /// Wrap a stream with the process-wide frame cap.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            frame_cap: frame_cap(),
        }
    }

    /// Consume the wrapper and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> LengthPrefixed<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Send one frame.
    pub async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if frame.len() > self.frame_cap {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "outbound frame of {} bytes exceeds cap of {}",
                    frame.len(),
                    self.frame_cap
                ),
            ));
        }
        self.stream
            .write_all(&(frame.len() as u32).to_be_bytes())
            .await?;
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive one frame. `Ok(None)` on clean close at a frame boundary.
    pub async fn recv_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let n = self.stream.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "eof inside frame header",
                ));
            }
            filled += n;
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.frame_cap {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("inbound frame of {len} bytes exceeds cap of {}", self.frame_cap),
            ));
        }

        let mut frame = vec![0u8; len];
        self.stream.read_exact(&mut frame).await?;
        Ok(Some(frame))
    }
}

#[async_trait]
impl<S> Connection for LengthPrefixed<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.send_frame(frame).await
    }

    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        self.recv_frame().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
