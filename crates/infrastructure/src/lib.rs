//! Concrete transport and collaborator implementations for hive nodes.
//!
//! `InMemoryTransport` backs embedded deployments and tests; `Retrying`
//! wraps any transport with the bounded backoff the abstraction
//! promises its callers.

mod collaborators;
mod in_memory;
mod retry;

pub use collaborators::{FileLogSink, LocalNodeLifecycle, StaticCredentialProvider};
pub use in_memory::{InMemoryTransport, InMemoryTransportConfig};
pub use retry::{Retrying, RetryPolicy};
