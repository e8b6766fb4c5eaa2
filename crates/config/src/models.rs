use std::collections::HashMap;

use hive_domain::ErrorCategory;
use serde::{Deserialize, Serialize};

/// Top-level application configuration. Every section carries defaults
/// so a node can boot with an empty file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Defaults to the hostname when absent.
    pub node_id: Option<String>,
    /// Local log file shipped to the durable sink on shutdown.
    pub log_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub job_queue: String,
    pub status_channel: String,
    pub event_stream: String,
    pub visibility_timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            job_queue: "hive_jobs".to_string(),
            status_channel: "hive_status".to_string(),
            event_stream: "hive_events".to_string(),
            visibility_timeout_seconds: 60,
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded exponential backoff applied by the transport layer to
/// transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
    /// Random jitter range, 0.0-1.0.
    pub jitter_factor: f64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 100,
            max_interval_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bounded wait for a single receive call.
    pub poll_wait_ms: u64,
    /// Sleep after an empty receive; doubles up to the max below and
    /// resets as soon as work arrives.
    pub idle_backoff_ms: u64,
    pub max_idle_backoff_ms: u64,
    pub heartbeat_interval_seconds: u64,
    /// Age threshold after which the node drains and terminates,
    /// typically set just under a billing boundary.
    pub max_lifetime_seconds: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_wait_ms: 1_000,
            idle_backoff_ms: 500,
            max_idle_backoff_ms: 10_000,
            heartbeat_interval_seconds: 30,
            max_lifetime_seconds: 3_300,
        }
    }
}

/// Per-category error ceilings; reaching any of them forces shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub parse: usize,
    pub unapproved_task: usize,
    pub workflow: usize,
    pub transport: usize,
    pub task: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            parse: 25,
            unapproved_task: 50,
            workflow: 10,
            transport: 10,
            task: 25,
        }
    }
}

impl ThresholdConfig {
    pub fn as_map(&self) -> HashMap<ErrorCategory, usize> {
        HashMap::from([
            (ErrorCategory::Parse, self.parse),
            (ErrorCategory::UnapprovedTask, self.unapproved_task),
            (ErrorCategory::Workflow, self.workflow),
            (ErrorCategory::Transport, self.transport),
            (ErrorCategory::Task, self.task),
        ])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Approved task types registered at startup. The default task is
    /// always registered regardless of this list.
    pub approved: Vec<String>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            approved: vec!["pipeline".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
