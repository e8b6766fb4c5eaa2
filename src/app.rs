use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hive_config::{AppConfig, EnvLookup};
use hive_domain::{CredentialProvider, NodeStatus, Transport};
use hive_infrastructure::{
    FileLogSink, InMemoryTransport, InMemoryTransportConfig, LocalNodeLifecycle, RetryPolicy,
    Retrying, StaticCredentialProvider,
};
use hive_worker::{Coordinator, ErrorAggregator, NodeHandle, NodeSettings, StopReason, TaskRegistry};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Directory log files are flushed into when the node drains.
const LOG_ARCHIVE_DIR: &str = "logs/archive";

/// Wires configuration into a runnable node: transport, registry, error
/// aggregator, collaborators and the coordinator on top of them.
pub struct Application {
    node_id: String,
    coordinator: Arc<Coordinator>,
    transport: Arc<InMemoryTransport>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let node_id = match config.node.node_id.clone() {
            Some(id) => id,
            None => hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .unwrap_or_else(|| "hive-node".to_string()),
        };
        info!(node_id, "building application");

        // Credentials are optional for the in-memory transport; resolve
        // them anyway so a misconfigured environment shows up at boot.
        let lookup = EnvLookup::new().load_env_file(Path::new(".env"));
        match StaticCredentialProvider::from_lookup(&lookup) {
            Ok(provider) => {
                let creds = provider
                    .credentials()
                    .context("resolving transport credentials")?;
                info!(access_key = %creds.access_key, "transport credentials resolved");
            }
            Err(err) => {
                warn!("no transport credentials configured ({err}), continuing without");
            }
        }

        let transport = Arc::new(InMemoryTransport::with_config(InMemoryTransportConfig {
            visibility_timeout: Duration::from_secs(config.transport.visibility_timeout_seconds),
            ..Default::default()
        }));
        let retrying: Arc<dyn Transport> = Arc::new(Retrying::new(
            Arc::clone(&transport),
            RetryPolicy::from_config(&config.transport.retry),
        ));

        let registry = TaskRegistry::from_approved(&config.tasks.approved);
        let errors = Arc::new(ErrorAggregator::new(config.thresholds.as_map()));
        let lifecycle = Arc::new(LocalNodeLifecycle::new());
        let log_sink = Arc::new(FileLogSink::new(LOG_ARCHIVE_DIR));

        let settings = NodeSettings::from_config(&config, node_id.clone());
        let coordinator = Arc::new(Coordinator::new(
            settings, retrying, registry, errors, lifecycle, log_sink,
        ));

        Ok(Self {
            node_id,
            coordinator,
            transport,
        })
    }

    /// Run the node until it stops on its own (age, fatal errors) or the
    /// shutdown signal arrives.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<StopReason> {
        let handle = self.coordinator.handle();
        let coordinator = Arc::clone(&self.coordinator);
        let mut node = tokio::spawn(async move { coordinator.run().await });

        let reason = tokio::select! {
            result = &mut node => result.context("node loop panicked")?,
            _ = shutdown_rx.recv() => {
                info!("shutdown requested, stopping node loop");
                handle.stop();
                node.await.context("node loop panicked")?
            }
        };

        info!(node_id = %self.node_id, ?reason, "node loop finished");
        Ok(reason)
    }

    pub fn handle(&self) -> NodeHandle {
        self.coordinator.handle()
    }

    pub async fn status(&self) -> NodeStatus {
        self.coordinator.handle().status().await
    }

    /// Direct access to the underlying transport, for embedding hosts
    /// that enqueue work into the node's own queue.
    pub fn transport(&self) -> Arc<InMemoryTransport> {
        Arc::clone(&self.transport)
    }
}
