//! A single framed Intercom2 connection.
//!
//! Wraps a plaintext or TLS byte stream and exchanges
//! [`broker_proto::Frame`]s. The session layer splits each established
//! connection into a read half (pumped by the connection task) and a write
//! half (fed by a per-connection channel).

use crate::{IntercomError, Result, SecurityMode, TlsContext};
use broker_proto::{Frame, FrameHeader, FRAME_HEADER_LEN};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, trace};

/// Object-safe alias for the underlying byte stream.
pub(crate) trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

/// An established connection to a peer endpoint.
pub struct Connection {
    stream: Box<dyn IoStream>,
    remote_addr: SocketAddr,
}

impl Connection {
    /// Establish an outbound connection, performing the TLS handshake in
    /// mutual-TLS mode.
    pub async fn connect(
        host: &str,
        port: u16,
        security: &SecurityMode,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| IntercomError::Transport(format!("connect {host}:{port}: timed out")))?
            .map_err(|e| IntercomError::Transport(format!("connect {host}:{port}: {e}")))?;
        let remote_addr = tcp
            .peer_addr()
            .map_err(|e| IntercomError::Transport(format!("peer addr: {e}")))?;
        let _ = tcp.set_nodelay(true);

        let stream: Box<dyn IoStream> = match security {
            SecurityMode::Plaintext => Box::new(tcp),
            SecurityMode::MutualTls(tls) => {
                let name = TlsContext::server_name(host)?;
                let tls_stream = tls
                    .connector()
                    .connect(name, tcp)
                    .await
                    .map_err(|e| IntercomError::Tls(format!("handshake with {host}:{port}: {e}")))?;
                Box::new(tls_stream)
            }
        };

        debug!(%remote_addr, "connection established");
        Ok(Self {
            stream,
            remote_addr,
        })
    }

    pub(crate) fn from_stream(stream: Box<dyn IoStream>, remote_addr: SocketAddr) -> Self {
        Self {
            stream,
            remote_addr,
        }
    }

    /// Remote socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Send one frame.
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        write_frame(&mut self.stream, frame).await
    }

    /// Receive one frame. Returns `None` on clean EOF.
    pub async fn recv(&mut self) -> Result<Option<Frame>> {
        read_frame(&mut self.stream).await
    }

    /// Receive one frame with a deadline.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| IntercomError::Timeout)?
    }

    /// Split into independently owned read and write halves.
    pub fn split(self) -> (ConnectionReader, ConnectionWriter) {
        let (read, write) = tokio::io::split(self.stream);
        (
            ConnectionReader {
                inner: read,
                remote_addr: self.remote_addr,
            },
            ConnectionWriter { inner: write },
        )
    }
}

/// Read half of a split connection.
pub struct ConnectionReader {
    inner: ReadHalf<Box<dyn IoStream>>,
    remote_addr: SocketAddr,
}

impl ConnectionReader {
    /// Receive one frame. Returns `None` on clean EOF.
    pub async fn recv(&mut self) -> Result<Option<Frame>> {
        read_frame(&mut self.inner).await
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

/// Write half of a split connection.
pub struct ConnectionWriter {
    inner: WriteHalf<Box<dyn IoStream>>,
}

impl ConnectionWriter {
    /// Send one frame.
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        write_frame(&mut self.inner, frame).await
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let header = frame.header().encode();
    writer.write_all(&header).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;
    trace!(
        message_id = frame.message_id,
        correlation_id = frame.correlation_id,
        len = frame.payload.len(),
        "frame sent"
    );
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut header_buf = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        // EOF before any header byte is an orderly close.
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| IntercomError::Transport(format!("truncated frame: {e}")))?;

    trace!(
        sender_id = header.sender_id,
        message_id = header.message_id,
        correlation_id = header.correlation_id,
        len = header.payload_len,
        "frame received"
    );
    Ok(Some(Frame {
        sender_id: header.sender_id,
        message_id: header.message_id,
        correlation_id: header.correlation_id,
        payload,
    }))
}

/// Listening socket accepting inbound Intercom2 connections.
pub struct Listener {
    inner: TcpListener,
    acceptor: Option<TlsAcceptor>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind the local listener. Failure here is fatal to startup.
    pub async fn bind(addr: SocketAddr, security: &SecurityMode) -> Result<Self> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|e| IntercomError::Transport(format!("bind {addr}: {e}")))?;
        let local_addr = inner
            .local_addr()
            .map_err(|e| IntercomError::Transport(format!("local addr: {e}")))?;
        let acceptor = match security {
            SecurityMode::Plaintext => None,
            SecurityMode::MutualTls(tls) => Some(tls.acceptor()),
        };
        debug!(%local_addr, "listener bound");
        Ok(Self {
            inner,
            acceptor,
            local_addr,
        })
    }

    /// Local socket address (useful when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one inbound connection, performing the TLS handshake in
    /// mutual-TLS mode.
    pub async fn accept(&self) -> Result<Connection> {
        let (tcp, remote_addr) = self
            .inner
            .accept()
            .await
            .map_err(|e| IntercomError::Transport(format!("accept: {e}")))?;
        let _ = tcp.set_nodelay(true);

        let stream: Box<dyn IoStream> = match &self.acceptor {
            None => Box::new(tcp),
            Some(acceptor) => {
                let tls_stream = acceptor
                    .accept(tcp)
                    .await
                    .map_err(|e| IntercomError::Tls(format!("handshake from {remote_addr}: {e}")))?;
                Box::new(tls_stream)
            }
        };

        debug!(%remote_addr, "connection accepted");
        Ok(Connection::from_stream(stream, remote_addr))
    }
}
