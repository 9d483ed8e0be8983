//! Socket client errors.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Errors raised by the socket client.
///
/// Only connection-level failures end a supervisor cycle; [`ClientError::Timeout`]
/// is the steady-state signal of an idle peer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("connection is not established")]
    NotConnected,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    /// Shared so the failed caller and the supervisor both see the cause.
    #[error("failed to send message: {0}")]
    Write(#[source] Arc<io::Error>),
    #[error("read deadline elapsed")]
    Timeout,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("failed to read message: {0}")]
    Read(#[source] io::Error),
    #[error("receive task ended abnormally: {0}")]
    ReceiveTask(#[source] tokio::task::JoinError),
    #[error("socket client stopped")]
    Stopped,
}

impl ClientError {
    /// Whether the error means the current connection is unusable.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::Write(_)
                | Self::ConnectionClosed
                | Self::Read(_)
                | Self::ReceiveTask(_)
        )
    }
}
