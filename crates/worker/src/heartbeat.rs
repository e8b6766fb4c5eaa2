use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hive_domain::{ErrorCategory, NodeStatus, StatusMessage, Transport};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval_at;
use tracing::{debug, error, info};

use crate::error_aggregator::ErrorAggregator;

/// Periodic status publisher running alongside the coordinator loop.
///
/// Strictly a reader: the coordinator is the only writer of the shared
/// status snapshot, this task just stamps uptime and the shared
/// per-node sequence onto each emission. An unrecoverable publish
/// failure on this path requests node shutdown via the stop flag.
pub(crate) struct HeartbeatTask {
    pub transport: Arc<dyn Transport>,
    pub status_channel: String,
    pub status: Arc<RwLock<NodeStatus>>,
    pub started: Instant,
    pub sequence: Arc<AtomicU64>,
    pub interval: Duration,
    pub stop_flag: Arc<AtomicBool>,
    pub errors: Arc<ErrorAggregator>,
}

impl HeartbeatTask {
    pub(crate) fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                interval_at(tokio::time::Instant::now() + self.interval, self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = {
                            let mut status = self.status.read().await.clone();
                            status.uptime_seconds = self.started.elapsed().as_secs();
                            status
                        };
                        let message = StatusMessage::heartbeat(
                            self.sequence.fetch_add(1, Ordering::SeqCst),
                            snapshot,
                        );
                        match self.transport.publish(&self.status_channel, &message).await {
                            Ok(()) => {
                                debug!(sequence = message.sequence, "heartbeat published");
                            }
                            Err(err) => {
                                self.errors.record(
                                    ErrorCategory::Transport,
                                    format!("heartbeat publish failed: {err}"),
                                );
                                if !err.is_retryable() {
                                    error!(
                                        "unrecoverable failure on status path, \
                                         requesting node shutdown: {err}"
                                    );
                                    self.stop_flag.store(true, Ordering::SeqCst);
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("heartbeat task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
