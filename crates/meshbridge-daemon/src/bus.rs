//! In-process message bus with one mailbox per module.

use std::collections::HashMap;
use std::sync::RwLock;

use meshbridge_client::{Bus, BusError};
use meshbridge_core::Message;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub struct ChannelBus {
    mailboxes: RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>,
}

impl ChannelBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the mailbox for `module`, replacing any previous one.
    pub fn register(&self, module: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(module.to_string(), tx);
        rx
    }
}

impl Bus for ChannelBus {
    fn send(&self, module: &str, message: Message) -> Result<(), BusError> {
        let mailboxes = self.mailboxes.read().unwrap_or_else(|e| e.into_inner());
        let mailbox = mailboxes
            .get(module)
            .ok_or_else(|| BusError::UnknownModule(module.to_string()))?;
        mailbox
            .send(message)
            .map_err(|_| BusError::Closed(module.to_string()))
    }
}
