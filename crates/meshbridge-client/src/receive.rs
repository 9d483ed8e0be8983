//! Receive loop: socket bytes in, messages onto the delivery queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use meshbridge_core::{Message, deframe};
use tokio::io::AsyncRead;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::ClientError;
use crate::connection::ConnectionReader;
use crate::handoff::HandoffSender;

/// Read deadline used to stay responsive to cancellation.
pub const READ_DEADLINE: Duration = Duration::from_secs(1);

/// Counters for the delivery queue. Shared between the receive loop and
/// whoever wants to observe drops.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    queued: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryStats {
    /// Messages accepted by the delivery queue.
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Messages dropped because no consumer was waiting.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Reads one connection until it fails or the cycle is cancelled.
#[derive(Debug)]
pub struct ReceiveLoop<R> {
    reader: ConnectionReader<R>,
    queue: HandoffSender<Message>,
    stats: Arc<DeliveryStats>,
    read_deadline: Duration,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ReceiveLoop<R> {
    pub fn new(
        reader: ConnectionReader<R>,
        queue: HandoffSender<Message>,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            reader,
            queue,
            stats,
            read_deadline: READ_DEADLINE,
            buffer: Vec::new(),
        }
    }

    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    /// Run until cancelled (`Ok`) or the connection fails (`Err`).
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ClientError> {
        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                chunk = self.reader.receive_chunk(self.read_deadline) => chunk,
            };
            match chunk {
                Ok(bytes) => self.buffer.extend_from_slice(bytes),
                Err(ClientError::Timeout) => {
                    trace!("read timeout, retrying");
                    continue;
                }
                Err(err) => return Err(err),
            }
            self.drain();
        }
    }

    fn drain(&mut self) {
        let (messages, rest) = deframe::<Message>(&self.buffer);
        let consumed = self.buffer.len() - rest.len();
        self.buffer.drain(..consumed);

        for message in messages {
            match self.queue.try_send(message) {
                Ok(()) => {
                    self.stats.queued.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(message)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(id = message.id(), "no consumer waiting, dropping message");
                }
                Err(TrySendError::Closed(message)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(id = message.id(), "delivery queue closed, dropping message");
                }
            }
        }
    }
}
