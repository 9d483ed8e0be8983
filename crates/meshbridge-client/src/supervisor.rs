//! Reconnect supervisor.
//!
//! Drives the connection through [`ConnectionState`]:
//!
//! ```text
//!            connect ok               read/write failure
//! Connecting ─────────► Running ─────────────────────────► BackoffWait
//!     ▲  │ connect failed                                     │
//!     │  └────────────────────────────────────────────────────┤
//!     └──────────────────── delay elapsed ────────────────────┘
//!
//! any state ── cancelled ──► Stopped
//! ```
//!
//! The supervisor is the only writer on the socket. Callers send through a
//! [`ClientHandle`], whose requests are served between reads.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use meshbridge_core::{ConnectionState, Message};
use tokio::net::unix::OwnedReadHalf;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ClientError;
use crate::connection::{ConnectionReader, SocketClient};
use crate::handoff::HandoffSender;
use crate::receive::{DeliveryStats, READ_DEADLINE, ReceiveLoop};

/// Delay before redialing after a failure.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Pending send requests the supervisor will hold.
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    pub reconnect_delay: Duration,
    pub read_deadline: Duration,
}

impl ClientConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            reconnect_delay: RECONNECT_DELAY,
            read_deadline: READ_DEADLINE,
        }
    }
}

#[derive(Debug)]
struct SendRequest {
    message: Message,
    reply: oneshot::Sender<Result<(), ClientError>>,
}

/// Cloneable handle for sending to the peer and observing the connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    requests: mpsc::Sender<SendRequest>,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<DeliveryStats>,
}

impl ClientHandle {
    /// Write `message` to the peer.
    ///
    /// Fails with [`ClientError::NotConnected`] while no connection is up and
    /// with [`ClientError::Stopped`] if cancelled mid-write. Sends are never
    /// retried.
    pub async fn send(&self, message: Message) -> Result<(), ClientError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(SendRequest { message, reply })
            .await
            .map_err(|_| ClientError::Stopped)?;
        response.await.map_err(|_| ClientError::Stopped)?
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }
}

/// Owns the connection and runs the reconnect state machine.
#[derive(Debug)]
pub struct Supervisor {
    client: SocketClient,
    config: ClientConfig,
    queue: HandoffSender<Message>,
    requests: mpsc::Receiver<SendRequest>,
    state: watch::Sender<ConnectionState>,
    stats: Arc<DeliveryStats>,
    reader: Option<ConnectionReader<OwnedReadHalf>>,
}

impl Supervisor {
    /// Create a supervisor that delivers inbound messages to `queue`.
    pub fn new(config: ClientConfig, queue: HandoffSender<Message>) -> (Self, ClientHandle) {
        let (requests_tx, requests) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let (state, state_rx) = watch::channel(ConnectionState::Connecting);
        let stats = Arc::new(DeliveryStats::default());
        let handle = ClientHandle {
            requests: requests_tx,
            state: state_rx,
            stats: stats.clone(),
        };
        let supervisor = Self {
            client: SocketClient::new(config.socket_path.clone()),
            config,
            queue,
            requests,
            state,
            stats,
            reader: None,
        };
        (supervisor, handle)
    }

    /// Run until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut state = ConnectionState::Connecting;
        loop {
            self.state.send_replace(state);
            state = match state {
                ConnectionState::Connecting => self.connecting(&cancel).await,
                ConnectionState::Running => self.running(&cancel).await,
                ConnectionState::BackoffWait => self.backoff(&cancel).await,
                ConnectionState::Stopped => break,
            };
        }
        info!("socket client stopped");
    }

    async fn connecting(&mut self, cancel: &CancellationToken) -> ConnectionState {
        let connect = self.client.connect();
        tokio::pin!(connect);
        let connected = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return ConnectionState::Stopped,
                Some(request) = self.requests.recv() => {
                    let _ = request.reply.send(Err(ClientError::NotConnected));
                }
                connected = &mut connect => break connected,
            }
        };
        match connected {
            Ok(reader) => {
                info!(path = %self.config.socket_path.display(), "socket client connected");
                self.reader = Some(reader);
                ConnectionState::Running
            }
            Err(err) => {
                error!(error = %err, delay = ?self.config.reconnect_delay, "socket client error, retrying");
                ConnectionState::BackoffWait
            }
        }
    }

    async fn running(&mut self, cancel: &CancellationToken) -> ConnectionState {
        let Some(reader) = self.reader.take() else {
            return ConnectionState::Connecting;
        };
        let cycle = cancel.child_token();
        let mut receiver = tokio::spawn(
            ReceiveLoop::new(reader, self.queue.clone(), self.stats.clone())
                .with_read_deadline(self.config.read_deadline)
                .run(cycle.clone()),
        );
        let mut receiver_done = false;

        let outcome = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                joined = &mut receiver => {
                    receiver_done = true;
                    break match joined {
                        Ok(result) => result,
                        Err(err) => Err(ClientError::ReceiveTask(err)),
                    };
                }
                Some(request) = self.requests.recv() => {
                    if let ControlFlow::Break(end) = self.write(request, cancel).await {
                        break end;
                    }
                }
            }
        };

        cycle.cancel();
        if !receiver_done {
            let _ = receiver.await;
        }
        if let Err(err) = self.client.close().await {
            debug!(error = %err, "close after cycle");
        }

        match outcome {
            Ok(()) => ConnectionState::Stopped,
            Err(err) => {
                error!(error = %err, delay = ?self.config.reconnect_delay, "socket client error, retrying");
                ConnectionState::BackoffWait
            }
        }
    }

    /// Serve one send request. Breaks with `Ok` when cancelled mid-write and
    /// with the error when the write failed at connection level.
    async fn write(
        &mut self,
        request: SendRequest,
        cancel: &CancellationToken,
    ) -> ControlFlow<Result<(), ClientError>> {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = request.reply.send(Err(ClientError::Stopped));
                return ControlFlow::Break(Ok(()));
            }
            result = self.client.send(&request.message) => result,
        };
        let flow = match &result {
            Err(ClientError::Write(err)) => ControlFlow::Break(Err(ClientError::Write(err.clone()))),
            Err(err) => {
                warn!(id = request.message.id(), error = %err, "send failed");
                ControlFlow::Continue(())
            }
            Ok(()) => ControlFlow::Continue(()),
        };
        let _ = request.reply.send(result);
        flow
    }

    async fn backoff(&mut self, cancel: &CancellationToken) -> ConnectionState {
        let delay = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return ConnectionState::Stopped,
                () = &mut delay => return ConnectionState::Connecting,
                Some(request) = self.requests.recv() => {
                    let _ = request.reply.send(Err(ClientError::NotConnected));
                }
            }
        }
    }
}
