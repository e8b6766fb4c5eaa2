//! Core data model, error taxonomy and ports for the hive job dispatch
//! and workflow coordination engine.

pub mod entities;
pub mod errors;
pub mod ports;

pub use entities::{
    Credentials, ErrorCategory, ErrorRecord, JobDescriptor, NodeDescription, NodeState,
    NodeStatus, StatusMessage, DEFAULT_TASK_TYPE,
};
pub use errors::{HiveError, HiveResult};
pub use ports::{CredentialProvider, LogSink, NodeLifecycle, SequenceToken, Transport};
