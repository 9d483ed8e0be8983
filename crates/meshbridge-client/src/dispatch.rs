//! Dispatcher: delivery queue out, internal bus in.

use std::sync::Arc;

use meshbridge_core::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::handoff::HandoffReceiver;

/// Error forwarding to the internal bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("no module registered as {0}")]
    UnknownModule(String),
    #[error("mailbox of {0} is closed")]
    Closed(String),
}

/// The internal pub/sub bus, addressed by module name.
pub trait Bus: Send + Sync {
    fn send(&self, module: &str, message: Message) -> Result<(), BusError>;
}

/// What happened to a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Peer lifecycle event; logged and dropped.
    Event,
    /// Handed to the bus.
    Forwarded,
    /// The bus refused it.
    Rejected,
}

/// Drains the delivery queue and forwards application messages to the bus
/// under the bridge's module name.
pub struct Dispatcher {
    module: String,
    bus: Arc<dyn Bus>,
    queue: HandoffReceiver<Message>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        module: impl Into<String>,
        bus: Arc<dyn Bus>,
        queue: HandoffReceiver<Message>,
    ) -> Self {
        Self {
            module: module.into(),
            bus,
            queue,
        }
    }

    /// Classify one message and forward it unless it is a peer event.
    pub fn dispatch(&self, message: Message) -> Dispatch {
        if let Some(event) = message.peer_event() {
            info!(event = %event.name, node = ?event.node, "node event");
            return Dispatch::Event;
        }
        let id = message.header.id.clone();
        match self.bus.send(&self.module, message) {
            Ok(()) => Dispatch::Forwarded,
            Err(err) => {
                warn!(id = %id, error = %err, "failed to forward message to bus");
                Dispatch::Rejected
            }
        }
    }

    /// Run until cancelled or every queue sender is gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                message = self.queue.recv() => message,
            };
            match message {
                Some(message) => {
                    self.dispatch(message);
                }
                None => break,
            }
        }
    }
}
