use thiserror::Error;

use crate::entities::ErrorCategory;

#[derive(Error, Debug, Clone)]
pub enum HiveError {
    #[error("malformed job descriptor: {0}")]
    Parse(String),
    #[error("task type not approved: {task_type}")]
    UnapprovedTask { task_type: String },
    #[error("event '{event}' not valid from state '{state}'")]
    Transition { event: String, state: String },
    #[error("malformed workflow description: {0}")]
    MalformedWorkflow(String),
    #[error("transport failure: {message}")]
    Transport { message: String, transient: bool },
    #[error("error threshold reached for category '{category}' ({count} records)")]
    FatalThreshold {
        category: ErrorCategory,
        count: usize,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type HiveResult<T> = Result<T, HiveError>;

impl HiveError {
    pub fn parse_error<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }
    pub fn unapproved_task<S: Into<String>>(task_type: S) -> Self {
        Self::UnapprovedTask {
            task_type: task_type.into(),
        }
    }
    pub fn transition<S: Into<String>>(event: S, state: S) -> Self {
        Self::Transition {
            event: event.into(),
            state: state.into(),
        }
    }
    pub fn malformed_workflow<S: Into<String>>(msg: S) -> Self {
        Self::MalformedWorkflow(msg.into())
    }
    pub fn transport_transient<S: Into<String>>(msg: S) -> Self {
        Self::Transport {
            message: msg.into(),
            transient: true,
        }
    }
    pub fn transport_permanent<S: Into<String>>(msg: S) -> Self {
        Self::Transport {
            message: msg.into(),
            transient: false,
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Transient failures the transport layer may retry internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HiveError::Transport { transient: true, .. })
    }

    /// Failures that must escalate to node shutdown.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HiveError::FatalThreshold { .. } | HiveError::Configuration(_)
        )
    }

    /// Aggregator category this error is recorded under.
    pub fn category(&self) -> ErrorCategory {
        match self {
            HiveError::Parse(_) => ErrorCategory::Parse,
            HiveError::UnapprovedTask { .. } => ErrorCategory::UnapprovedTask,
            HiveError::Transition { .. } | HiveError::MalformedWorkflow(_) => {
                ErrorCategory::Workflow
            }
            HiveError::Transport { .. } => ErrorCategory::Transport,
            _ => ErrorCategory::Task,
        }
    }
}

impl From<serde_json::Error> for HiveError {
    fn from(err: serde_json::Error) -> Self {
        HiveError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for HiveError {
    fn from(err: anyhow::Error) -> Self {
        HiveError::Internal(err.to_string())
    }
}
