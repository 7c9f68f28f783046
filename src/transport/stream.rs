//! Byte-stream transport: one bounded read per message, whole-message writes.
//!
//! [`send`] and [`receive`] take optional halves so that a request issued
//! without an established stream degrades to a status instead of an error.

use crate::transport::Status;
use crate::utils::{MagnetError, NetworkError, Result};
use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};

/// Size of the single read performed per message.
///
/// Messages longer than this arrive truncated.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Read half of a connection
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write `message` and flush.
///
/// Returns `(200, "OK")` on success and `(503, "Bad Gateway")` when there is
/// no writer or the write fails. Never retries.
pub async fn send<W>(writer: Option<&mut W>, message: &str) -> Status
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let Some(writer) = writer else {
        return Status::BAD_GATEWAY;
    };

    let result = async {
        writer.write_all(message.as_bytes()).await?;
        writer.flush().await
    }
    .await;

    match result {
        Ok(()) => Status::OK,
        Err(e) => {
            log::debug!("Write failed: {}", e);
            Status::BAD_GATEWAY
        }
    }
}

/// Read one chunk of at most [`READ_CHUNK_SIZE`] bytes and decode it.
///
/// `Ok(None)` means there was no reader. An empty string means the peer
/// closed the stream.
pub async fn receive<R>(reader: Option<&mut R>) -> Result<Option<String>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let Some(reader) = reader else {
        return Ok(None);
    };

    let mut buf = [0u8; READ_CHUNK_SIZE];
    let n = reader.read(&mut buf).await?;
    Ok(Some(String::from_utf8(buf[..n].to_vec())?))
}

/// An open bidirectional stream to one peer
pub struct Connection {
    reader: BoxedReader,
    writer: BoxedWriter,
    peer: String,
}

impl Connection {
    /// Wrap separate read and write halves
    pub fn new<R, W>(reader: R, writer: W, peer: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: peer.into(),
        }
    }

    /// Split a duplex stream into a connection
    pub fn from_stream<S>(stream: S, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, peer)
    }

    /// Wrap an accepted or dialed TCP stream
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, peer)
    }

    /// Dial `address:port`
    ///
    /// # Errors
    ///
    /// [`NetworkError::ConnectionRefused`] when the peer refuses, otherwise
    /// [`NetworkError::ConnectionFailed`]
    pub async fn connect(address: &str, port: u16) -> Result<Self> {
        let peer = format!("{address}:{port}");
        match TcpStream::connect((address, port)).await {
            Ok(stream) => Ok(Self::from_tcp(stream)),
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                Err(NetworkError::ConnectionRefused { peer }.into())
            }
            Err(e) => Err(NetworkError::ConnectionFailed {
                peer,
                reason: e.to_string(),
            }
            .into()),
        }
    }

    /// Remote address as text
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// See [`send`]
    pub async fn send(&mut self, message: &str) -> Status {
        send(Some(&mut self.writer), message).await
    }

    /// See [`receive`]
    pub async fn receive(&mut self) -> Result<String> {
        Ok(receive(Some(&mut self.reader)).await?.unwrap_or_default())
    }

    /// Send a request and read the reply.
    ///
    /// # Errors
    ///
    /// [`NetworkError::Transport`] if the write fails; any error from the read
    pub async fn exchange(&mut self, message: &str) -> Result<String> {
        let status = self.send(message).await;
        if !status.is_ok() {
            return Err(NetworkError::Transport {
                reason: format!("write to {} failed", self.peer),
            }
            .into());
        }
        self.receive().await
    }

    /// Shut down the write half
    pub async fn close(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            log::debug!("Shutdown of {} failed: {}", self.peer, e);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

/// Shared ownership of a connection held by a registry entry.
///
/// Clones refer to the same stream; requests lock it for their duration.
#[derive(Clone)]
pub struct TransportHandle {
    peer: Arc<str>,
    inner: Arc<Mutex<Connection>>,
}

impl TransportHandle {
    /// Take ownership of a connection
    pub fn new(connection: Connection) -> Self {
        Self {
            peer: Arc::from(connection.peer()),
            inner: Arc::new(Mutex::new(connection)),
        }
    }

    /// Remote address as text
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Exclusive access to the stream
    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.inner.lock().await
    }

    /// Shut down the underlying stream
    pub async fn close(&self) {
        self.inner.lock().await.close().await;
    }

    /// Whether both handles refer to the same stream
    pub fn same_stream(&self, other: &TransportHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransportHandle").field(&self.peer).finish()
    }
}

impl From<Connection> for TransportHandle {
    fn from(connection: Connection) -> Self {
        Self::new(connection)
    }
}

/// Whether a dial failed because the peer refused it
pub fn is_refusal(error: &MagnetError) -> bool {
    matches!(error, MagnetError::Network(NetworkError::ConnectionRefused { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[tokio::test]
    async fn test_send_without_writer() {
        let status = send::<tokio::io::Sink>(None, "hello").await;
        assert_eq!(status, Status::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_send_write_error() {
        let mut mock = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let status = send(Some(&mut mock), "hello").await;
        assert_eq!(status, Status::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let mut mock = tokio_test::io::Builder::new()
            .write(b"ping")
            .read(b"pong")
            .build();

        assert_eq!(send(Some(&mut mock), "ping").await, Status::OK);
        let reply = receive(Some(&mut mock)).await.unwrap();
        assert_eq!(reply.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn test_receive_without_reader() {
        let reply = receive::<tokio::io::Empty>(None).await.unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_receive_is_single_bounded_read() {
        let (mut peer, local) = tokio::io::duplex(4096);
        let mut connection = Connection::from_stream(local, "peer");

        peer.write_all(&vec![b'a'; READ_CHUNK_SIZE + 100]).await.unwrap();
        let first = connection.receive().await.unwrap();
        assert_eq!(first.len(), READ_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn test_receive_rejects_invalid_utf8() {
        let mut mock = tokio_test::io::Builder::new().read(&[0xff, 0xfe]).build();
        assert!(receive(Some(&mut mock)).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Connection::connect("127.0.0.1", port).await.unwrap_err();
        assert!(is_refusal(&err));
    }

    #[tokio::test]
    async fn test_handle_clones_share_stream() {
        let (_peer, local) = tokio::io::duplex(64);
        let handle = TransportHandle::new(Connection::from_stream(local, "10.0.0.9:2024"));
        let clone = handle.clone();

        assert!(handle.same_stream(&clone));
        assert_eq!(clone.peer(), "10.0.0.9:2024");
    }
}
