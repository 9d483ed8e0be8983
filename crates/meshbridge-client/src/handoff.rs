//! Zero-capacity delivery queue.
//!
//! A push succeeds only when a consumer is already parked in
//! [`HandoffReceiver::recv`]; otherwise the value comes straight back. Each
//! waiting `recv` posts a one-shot slot that the sender fills.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};

type Slot<T> = oneshot::Sender<T>;

/// Create a connected handoff pair.
pub fn handoff<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (slots_tx, slots_rx) = mpsc::unbounded_channel();
    (
        HandoffSender {
            slots: Arc::new(Mutex::new(slots_rx)),
        },
        HandoffReceiver { slots: slots_tx },
    )
}

/// Producer side. Cloning shares the same consumer.
#[derive(Debug)]
pub struct HandoffSender<T> {
    slots: Arc<Mutex<mpsc::UnboundedReceiver<Slot<T>>>>,
}

impl<T> Clone for HandoffSender<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<T> HandoffSender<T> {
    /// Hand `value` to a waiting consumer without blocking.
    ///
    /// Fails with [`TrySendError::Full`] when nobody is waiting and
    /// [`TrySendError::Closed`] once the receiver is gone.
    pub fn try_send(&self, mut value: T) -> Result<(), TrySendError<T>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match slots.try_recv() {
                Ok(slot) => match slot.send(value) {
                    Ok(()) => return Ok(()),
                    // The waiter gave up; try the next one.
                    Err(returned) => value = returned,
                },
                Err(TryRecvError::Empty) => return Err(TrySendError::Full(value)),
                Err(TryRecvError::Disconnected) => return Err(TrySendError::Closed(value)),
            }
        }
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct HandoffReceiver<T> {
    slots: mpsc::UnboundedSender<Slot<T>>,
}

impl<T> HandoffReceiver<T> {
    /// Wait for the next value. Returns `None` once every sender is dropped.
    ///
    /// Cancel safe: an abandoned wait is skipped by the sender.
    pub async fn recv(&mut self) -> Option<T> {
        let (slot, value) = oneshot::channel();
        self.slots.send(slot).ok()?;
        value.await.ok()
    }
}
