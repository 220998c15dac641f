//! Device transports.
//!
//! Backends are generic over a [`Transport`]: a byte pipe with timeouts.
//! Production uses TCP (the STAR through a bridge, the Prep natively);
//! tests use [`MockTransport`], which records outgoing frames and replays
//! scripted responses.
//!
//! Commands are strictly serialized per backend: one write, then reads
//! until the correlated response arrives. The transport itself knows
//! nothing about framing.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Read/write deadlines. A single read chunk must arrive within 3 s, a
/// full correlated response within 30 s.
#[derive(Debug, Clone, Copy)]
pub struct TransportTimeouts {
    pub packet_read: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            packet_read: Duration::from_secs(3),
            read: Duration::from_secs(30),
            write: Duration::from_secs(30),
        }
    }
}

/// A byte pipe to a device.
pub trait Transport: Send {
    /// Write one frame, bounded by `timeout`.
    fn send(
        &mut self,
        data: &[u8],
        timeout: Duration,
    ) -> impl std::future::Future<Output = io::Result<()>> + Send;

    /// Read the next chunk of bytes, bounded by `timeout`. A chunk is not
    /// necessarily a full frame; callers re-assemble.
    fn recv(
        &mut self,
        timeout: Duration,
    ) -> impl std::future::Future<Output = io::Result<Vec<u8>>> + Send;

    /// Release the underlying handle. Every exit path of a backend's
    /// `stop` ends up here.
    fn close(&mut self) -> impl std::future::Future<Output = io::Result<()>> + Send;
}

/// TCP transport.
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        debug!("connected to {host}:{port}");
        Ok(Self {
            stream: Some(stream),
        })
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))
    }
}

impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8], timeout: Duration) -> io::Result<()> {
        let stream = self.stream()?;
        tokio::time::timeout(timeout, stream.write_all(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
    }

    async fn recv(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        let stream = self.stream()?;
        let mut buf = vec![0u8; 4096];
        let n = tokio::time::timeout(timeout, stream.read(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by device",
            ));
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn close(&mut self) -> io::Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        Ok(())
    }
}

/// Scripted transport for tests: records what was sent, replays queued
/// responses.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Vec<Vec<u8>>,
    responses: VecDeque<Vec<u8>>,
    pub closed: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to be returned by the next `recv`.
    pub fn push_response(&mut self, data: impl Into<Vec<u8>>) {
        self.responses.push_back(data.into());
    }

    /// Sent frames decoded as UTF-8, for ASCII protocols.
    pub fn sent_strings(&self) -> Vec<String> {
        self.sent
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }
}

impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8], _timeout: Duration) -> io::Result<()> {
        self.sent.push(data.to_vec());
        Ok(())
    }

    async fn recv(&mut self, _timeout: Duration) -> io::Result<Vec<u8>> {
        self.responses.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::TimedOut, "no scripted response left")
        })
    }

    async fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_and_replays() {
        let mut mock = MockTransport::new();
        mock.push_response(b"pong".to_vec());
        mock.send(b"ping", Duration::from_secs(1)).await.unwrap();
        assert_eq!(mock.sent_strings(), vec!["ping".to_string()]);
        assert_eq!(mock.recv(Duration::from_secs(1)).await.unwrap(), b"pong");
        // Out of scripted responses reads as a timeout.
        let err = mock.recv(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
