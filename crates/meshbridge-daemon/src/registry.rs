//! Host module framework: named, grouped, enable-flagged modules started
//! together and stopped by one cancellation token.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;
    fn group(&self) -> &str;
    fn enable(&self) -> bool;
    /// Run until `cancel` fires.
    async fn start(&self, cancel: CancellationToken);
}

#[derive(Default)]
pub struct Registry {
    modules: Vec<Arc<dyn Module>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.modules.iter().map(|m| m.name()))
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Arc<dyn Module>) {
        info!(module = module.name(), group = module.group(), "module registered");
        self.modules.push(module);
    }

    /// Start every enabled module and wait for all of them to return.
    pub async fn run(self, cancel: CancellationToken) {
        let mut running = JoinSet::new();
        for module in self.modules {
            if !module.enable() {
                info!(module = module.name(), "module is disabled, not starting");
                continue;
            }
            info!(module = module.name(), "starting module");
            let cancel = cancel.clone();
            running.spawn(async move {
                module.start(cancel).await;
                module.name().to_string()
            });
        }
        while let Some(done) = running.join_next().await {
            match done {
                Ok(name) => info!(module = %name, "module stopped"),
                Err(err) => warn!(error = %err, "module task failed"),
            }
        }
    }
}
