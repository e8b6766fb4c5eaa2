use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::{JobDescriptor, StatusMessage};
use crate::errors::HiveResult;

/// Position of an appended message within a stream. Readers hold on to
/// the token to resume from where they left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceToken(pub u64);

impl std::fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider-agnostic queue / broadcast / stream capabilities consumed by
/// the coordinator and dispatcher.
///
/// Implementations retry transient provider errors internally with
/// bounded backoff; only permanent failures surface to callers, as
/// `HiveError::Transport { transient: false, .. }`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Put a job on a work queue.
    async fn enqueue(&self, queue: &str, descriptor: &JobDescriptor) -> HiveResult<()>;

    /// Receive at most one job, waiting up to `wait`. A received message
    /// stays invisible for the transport's lease period; if it is not
    /// acknowledged before the lease expires it becomes eligible for
    /// redelivery.
    async fn receive(&self, queue: &str, wait: Duration) -> HiveResult<Option<JobDescriptor>>;

    /// Delete a received message. Idempotent: acknowledging an unknown
    /// or expired-lease message is a no-op, not an error.
    async fn acknowledge(&self, queue: &str, descriptor: &JobDescriptor) -> HiveResult<()>;

    /// Approximate number of visible messages.
    async fn queue_depth(&self, queue: &str) -> HiveResult<u32>;

    /// Fire-and-forget broadcast; at-least-once to current subscribers,
    /// no guarantee beyond that.
    async fn publish(&self, channel: &str, message: &StatusMessage) -> HiveResult<()>;

    /// Ordered append; the returned token lets readers resume.
    async fn append(&self, stream: &str, message: &StatusMessage) -> HiveResult<SequenceToken>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn enqueue(&self, queue: &str, descriptor: &JobDescriptor) -> HiveResult<()> {
        (**self).enqueue(queue, descriptor).await
    }

    async fn receive(&self, queue: &str, wait: Duration) -> HiveResult<Option<JobDescriptor>> {
        (**self).receive(queue, wait).await
    }

    async fn acknowledge(&self, queue: &str, descriptor: &JobDescriptor) -> HiveResult<()> {
        (**self).acknowledge(queue, descriptor).await
    }

    async fn queue_depth(&self, queue: &str) -> HiveResult<u32> {
        (**self).queue_depth(queue).await
    }

    async fn publish(&self, channel: &str, message: &StatusMessage) -> HiveResult<()> {
        (**self).publish(channel, message).await
    }

    async fn append(&self, stream: &str, message: &StatusMessage) -> HiveResult<SequenceToken> {
        (**self).append(stream, message).await
    }
}
