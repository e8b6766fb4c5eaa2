mod collaborators;
mod messaging;

pub use collaborators::{CredentialProvider, LogSink, NodeLifecycle};
pub use messaging::{SequenceToken, Transport};
