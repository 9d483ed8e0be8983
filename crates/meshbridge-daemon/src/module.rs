//! The `metamanager` bridge module.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meshbridge_client::{Bus, ClientConfig, ClientHandle};
use meshbridge_core::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::ChannelBus;
use crate::readiness::{Readiness, is_pod_patch};
use crate::registry::Module;

pub const MODULE_NAME: &str = "metamanager";
pub const MODULE_GROUP: &str = "meta";

/// Secondary local server run alongside the bridge.
#[async_trait]
pub trait AuxServer: Send + Sync {
    /// Serve until `cancel` fires.
    async fn run(&self, cancel: CancellationToken);
}

pub struct MetaManager {
    enable: bool,
    client_config: ClientConfig,
    bus: Arc<ChannelBus>,
    mailbox: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    readiness: Readiness,
    aux: Option<Arc<dyn AuxServer>>,
}

impl std::fmt::Debug for MetaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaManager")
            .field("enable", &self.enable)
            .field("client_config", &self.client_config)
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

impl MetaManager {
    /// Create the module and claim its mailbox on `bus`.
    pub fn new(
        enable: bool,
        client_config: ClientConfig,
        bus: Arc<ChannelBus>,
        readiness: Readiness,
    ) -> Self {
        let mailbox = bus.register(MODULE_NAME);
        Self {
            enable,
            client_config,
            bus,
            mailbox: Mutex::new(Some(mailbox)),
            readiness,
            aux: None,
        }
    }

    pub fn with_aux_server(mut self, server: Arc<dyn AuxServer>) -> Self {
        self.aux = Some(server);
        self
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    async fn serve_mailbox(
        &self,
        mut mailbox: mpsc::UnboundedReceiver<Message>,
        peer: &ClientHandle,
        cancel: &CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                message = mailbox.recv() => match message {
                    Some(message) => message,
                    None => return,
                },
            };
            if !is_pod_patch(&message) {
                debug!(
                    id = message.id(),
                    resource = message.resource(),
                    operation = message.operation(),
                    "ignoring message"
                );
                continue;
            }
            if let Err(err) = self.readiness.process_patch(&message, peer).await {
                warn!(id = message.id(), resource = message.resource(), error = %err, "pod patch failed");
            }
        }
    }
}

#[async_trait]
impl Module for MetaManager {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn group(&self) -> &str {
        MODULE_GROUP
    }

    fn enable(&self) -> bool {
        self.enable
    }

    async fn start(&self, cancel: CancellationToken) {
        let Some(mailbox) = self.mailbox.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            warn!(module = MODULE_NAME, "module already started");
            return;
        };
        let cancel = cancel.child_token();
        let _stop = cancel.clone().drop_guard();

        let aux = self.aux.clone().map(|server| {
            let cancel = cancel.clone();
            info!(module = MODULE_NAME, "starting secondary server");
            tokio::spawn(async move { server.run(cancel).await })
        });

        let bus: Arc<dyn Bus> = self.bus.clone();
        let (peer, tasks) =
            meshbridge_client::spawn(self.client_config.clone(), MODULE_NAME, bus, cancel.clone());
        info!(
            module = MODULE_NAME,
            socket = %self.client_config.socket_path.display(),
            "bridge client started"
        );

        self.serve_mailbox(mailbox, &peer, &cancel).await;

        cancel.cancel();
        if tasks.join().await.is_err() {
            warn!(module = MODULE_NAME, "bridge client stopped abnormally");
        }
        if let Some(aux) = aux {
            if let Err(err) = aux.await {
                warn!(error = %err, "secondary server task failed");
            }
        }
    }
}
