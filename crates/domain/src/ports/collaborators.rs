use std::path::Path;

use async_trait::async_trait;

use crate::entities::{Credentials, NodeDescription};
use crate::errors::HiveResult;

/// Auth collaborator. Implementations cache per process; callers may
/// invoke this freely.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> HiveResult<Credentials>;
}

/// Cloud resource lifecycle collaborator. The coordinator only issues
/// the terminate call on drain; provisioning policy lives elsewhere.
#[async_trait]
pub trait NodeLifecycle: Send + Sync {
    async fn describe_self(&self, node_id: &str) -> HiveResult<NodeDescription>;
    async fn terminate_self(&self, node_id: &str) -> HiveResult<()>;
}

/// Durable log sink; `flush` ships a local log file out before the node
/// terminates.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn flush(&self, local_log_path: &Path) -> HiveResult<()>;
}
