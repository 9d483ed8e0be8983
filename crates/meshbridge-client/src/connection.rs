//! Unix socket connection to the mesh agent.
//!
//! A connection is split on connect: the write half stays with the
//! [`SocketClient`] (one writer, the supervisor) and the read half is handed out
//! as a [`ConnectionReader`] (one reader, the receive loop).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use meshbridge_core::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::ClientError;

/// Bytes requested per read.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Client side of the peer socket. Either unconnected or holding the write
/// half of one live connection.
#[derive(Debug)]
pub struct SocketClient {
    path: PathBuf,
    writer: Option<OwnedWriteHalf>,
}

impl SocketClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Dial the socket, replacing any previous connection.
    ///
    /// Returns the read half for the receive loop.
    pub async fn connect(&mut self) -> Result<ConnectionReader<OwnedReadHalf>, ClientError> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|source| ClientError::Connect {
                path: self.path.clone(),
                source,
            })?;
        let (read, write) = stream.into_split();
        self.writer = Some(write);
        Ok(ConnectionReader::new(read))
    }

    /// Encode `message` as JSON and write it in full.
    pub async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        let data = serde_json::to_vec(message)?;
        writer
            .write_all(&data)
            .await
            .map_err(|err| ClientError::Write(Arc::new(err)))?;
        Ok(())
    }

    /// Release the connection.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        let mut writer = self.writer.take().ok_or(ClientError::NotConnected)?;
        if let Err(err) = writer.shutdown().await {
            debug!(error = %err, "socket shutdown failed");
        }
        Ok(())
    }
}

/// Read side of a connection.
#[derive(Debug)]
pub struct ConnectionReader<R> {
    inner: R,
    scratch: Box<[u8; READ_CHUNK_SIZE]>,
}

impl<R: AsyncRead + Unpin> ConnectionReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            scratch: Box::new([0; READ_CHUNK_SIZE]),
        }
    }

    /// Perform one read bounded by `deadline`.
    ///
    /// Fails with [`ClientError::Timeout`] when nothing arrived in time and
    /// [`ClientError::ConnectionClosed`] on end of stream.
    pub async fn receive_chunk(&mut self, deadline: Duration) -> Result<&[u8], ClientError> {
        match tokio::time::timeout(deadline, self.inner.read(&mut self.scratch[..])).await {
            Err(_) => Err(ClientError::Timeout),
            Ok(Ok(0)) => Err(ClientError::ConnectionClosed),
            Ok(Ok(n)) => Ok(&self.scratch[..n]),
            Ok(Err(err)) => Err(ClientError::Read(err)),
        }
    }
}
