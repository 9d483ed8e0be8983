//! Reconnecting Unix socket client for the mesh agent.
//!
//! ```text
//! peer ─► ConnectionReader ─► deframe ─► handoff ─► Dispatcher ─► Bus
//! peer ◄─ SocketClient ◄──── Supervisor ◄─ ClientHandle::send ◄─ callers
//! ```
//!
//! [`spawn`] wires the pieces together for a host module.

mod connection;
mod dispatch;
mod error;
mod handoff;
mod receive;
mod supervisor;

use std::sync::Arc;

use meshbridge_core::Message;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::error;

pub use connection::{ConnectionReader, READ_CHUNK_SIZE, SocketClient};
pub use dispatch::{Bus, BusError, Dispatch, Dispatcher};
pub use error::ClientError;
pub use handoff::{HandoffReceiver, HandoffSender, handoff};
pub use receive::{DeliveryStats, READ_DEADLINE, ReceiveLoop};
pub use supervisor::{ClientConfig, ClientHandle, RECONNECT_DELAY, Supervisor};

/// Running client tasks.
#[derive(Debug)]
pub struct ClientTasks {
    pub supervisor: JoinHandle<()>,
    pub dispatcher: JoinHandle<()>,
}

impl ClientTasks {
    /// Wait for both tasks to finish.
    ///
    /// A task that panicked or was aborted is logged; the first such failure
    /// is returned.
    pub async fn join(self) -> Result<(), JoinError> {
        let (supervisor, dispatcher) = tokio::join!(self.supervisor, self.dispatcher);
        let mut first = Ok(());
        for (task, result) in [("supervisor", supervisor), ("dispatcher", dispatcher)] {
            if let Err(err) = result {
                error!(task, error = %err, "client task failed");
                if first.is_ok() {
                    first = Err(err);
                }
            }
        }
        first
    }
}

/// Start the supervisor and dispatcher for `module`.
///
/// Inbound application messages are forwarded to `bus` addressed to `module`.
/// Both tasks stop when `cancel` fires.
pub fn spawn(
    config: ClientConfig,
    module: impl Into<String>,
    bus: Arc<dyn Bus>,
    cancel: CancellationToken,
) -> (ClientHandle, ClientTasks) {
    let (queue, inbound) = handoff::<Message>();
    let (supervisor, handle) = Supervisor::new(config, queue);
    let tasks = ClientTasks {
        supervisor: tokio::spawn(supervisor.run(cancel.clone())),
        dispatcher: tokio::spawn(Dispatcher::new(module, bus, inbound).run(cancel)),
    };
    (handle, tasks)
}
