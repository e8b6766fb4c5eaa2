use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hive_config::EnvLookup;
use hive_domain::{
    CredentialProvider, Credentials, HiveError, HiveResult, LogSink, NodeDescription,
    NodeLifecycle,
};
use tracing::info;

/// Credentials resolved once at construction and served from memory for
/// the life of the process.
pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Resolve from the layered environment: `HIVE_ACCESS_KEY_ID`,
    /// `HIVE_SECRET_ACCESS_KEY`, optional `HIVE_SESSION_TOKEN`.
    pub fn from_lookup(lookup: &EnvLookup) -> HiveResult<Self> {
        let access_key = lookup
            .lookup("HIVE_ACCESS_KEY_ID")
            .ok_or_else(|| HiveError::config_error("HIVE_ACCESS_KEY_ID not set"))?;
        let secret_key = lookup
            .lookup("HIVE_SECRET_ACCESS_KEY")
            .ok_or_else(|| HiveError::config_error("HIVE_SECRET_ACCESS_KEY not set"))?;
        Ok(Self::new(Credentials {
            access_key,
            secret_key,
            session_token: lookup.lookup("HIVE_SESSION_TOKEN"),
        }))
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn credentials(&self) -> HiveResult<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Lifecycle adapter for nodes that are plain local processes: records
/// the terminate call instead of tearing down a cloud instance.
pub struct LocalNodeLifecycle {
    launch_time: DateTime<Utc>,
    terminated: AtomicBool,
}

impl LocalNodeLifecycle {
    pub fn new() -> Self {
        Self {
            launch_time: Utc::now(),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Default for LocalNodeLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeLifecycle for LocalNodeLifecycle {
    async fn describe_self(&self, node_id: &str) -> HiveResult<NodeDescription> {
        Ok(NodeDescription {
            node_id: node_id.to_string(),
            state: if self.is_terminated() {
                "terminated".to_string()
            } else {
                "running".to_string()
            },
            launch_time: self.launch_time,
        })
    }

    async fn terminate_self(&self, node_id: &str) -> HiveResult<()> {
        info!(node_id, "terminate requested for local node");
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Ships a local log file into a durable directory, stamped so repeated
/// flushes never clobber each other.
pub struct FileLogSink {
    target_dir: PathBuf,
}

impl FileLogSink {
    pub fn new<P: Into<PathBuf>>(target_dir: P) -> Self {
        Self {
            target_dir: target_dir.into(),
        }
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn flush(&self, local_log_path: &Path) -> HiveResult<()> {
        let file_name = local_log_path
            .file_name()
            .ok_or_else(|| HiveError::Internal("log path has no file name".to_string()))?
            .to_string_lossy()
            .into_owned();
        let stamped = format!("{}.{}", file_name, Utc::now().format("%Y%m%dT%H%M%S%f"));
        let target = self.target_dir.join(stamped);

        tokio::fs::create_dir_all(&self.target_dir)
            .await
            .map_err(|e| HiveError::Internal(format!("creating log sink dir: {e}")))?;
        tokio::fs::copy(local_log_path, &target)
            .await
            .map_err(|e| HiveError::Internal(format!("flushing log file: {e}")))?;

        info!(target = %target.display(), "log file flushed to durable sink");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn credentials_resolve_from_lookup() {
        let lookup = EnvLookup::with_overrides(HashMap::from([
            ("HIVE_ACCESS_KEY_ID".to_string(), "AK".to_string()),
            ("HIVE_SECRET_ACCESS_KEY".to_string(), "SK".to_string()),
        ]));
        let provider = StaticCredentialProvider::from_lookup(&lookup).unwrap();
        let creds = provider.credentials().unwrap();
        assert_eq!(creds.access_key, "AK");
        assert_eq!(creds.secret_key, "SK");
        assert!(creds.session_token.is_none());
    }

    #[test]
    fn credentials_missing_key_is_config_error() {
        let lookup = EnvLookup::new();
        assert!(StaticCredentialProvider::from_lookup(&lookup).is_err());
    }

    #[tokio::test]
    async fn local_lifecycle_records_termination() {
        let lifecycle = LocalNodeLifecycle::new();
        let before = lifecycle.describe_self("node-1").await.unwrap();
        assert_eq!(before.state, "running");

        lifecycle.terminate_self("node-1").await.unwrap();
        let after = lifecycle.describe_self("node-1").await.unwrap();
        assert_eq!(after.state, "terminated");
    }

    #[tokio::test]
    async fn log_sink_copies_file() {
        let source_dir = tempfile::tempdir().unwrap();
        let sink_dir = tempfile::tempdir().unwrap();
        let log_path = source_dir.path().join("node.log");
        tokio::fs::write(&log_path, b"line one\n").await.unwrap();

        let sink = FileLogSink::new(sink_dir.path());
        sink.flush(&log_path).await.unwrap();

        let flushed: Vec<_> = std::fs::read_dir(sink_dir.path())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(flushed.len(), 1);
        let contents = std::fs::read(flushed[0].path()).unwrap();
        assert_eq!(contents, b"line one\n");
    }

    #[tokio::test]
    async fn log_sink_missing_source_errors() {
        let sink_dir = tempfile::tempdir().unwrap();
        let sink = FileLogSink::new(sink_dir.path());
        assert!(sink.flush(Path::new("/nonexistent/node.log")).await.is_err());
    }
}
