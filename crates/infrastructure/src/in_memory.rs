use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hive_domain::{HiveResult, JobDescriptor, SequenceToken, StatusMessage, Transport};
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, info, warn};

/// How finely `receive` re-checks for work while waiting; this is also
/// the upper bound on how stale an expired lease can stay unnoticed.
const RECEIVE_POLL_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct InMemoryTransportConfig {
    /// Lease applied to received-but-unacknowledged messages.
    pub visibility_timeout: Duration,
    /// Buffer per broadcast channel before slow subscribers lag.
    pub channel_capacity: usize,
}

impl Default for InMemoryTransportConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            channel_capacity: 256,
        }
    }
}

struct Inflight {
    descriptor: JobDescriptor,
    lease_until: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<JobDescriptor>,
    inflight: HashMap<String, Inflight>,
}

impl QueueState {
    /// Move messages whose lease lapsed back to the front of the queue
    /// so they redeliver before newer work.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .inflight
            .iter()
            .filter(|(_, m)| m.lease_until <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(inflight) = self.inflight.remove(&id) {
                debug!(correlation_id = %id, "lease expired, requeueing message");
                self.ready.push_front(inflight.descriptor);
            }
        }
    }
}

struct ChannelState {
    sender: broadcast::Sender<StatusMessage>,
    history: Vec<StatusMessage>,
}

/// In-process transport for embedded deployments and tests: work queues
/// with visibility leases, broadcast channels, and ordered streams.
pub struct InMemoryTransport {
    config: InMemoryTransportConfig,
    queues: Mutex<HashMap<String, QueueState>>,
    notifies: Mutex<HashMap<String, Arc<Notify>>>,
    channels: Mutex<HashMap<String, ChannelState>>,
    streams: Mutex<HashMap<String, Vec<StatusMessage>>>,
    ack_calls: AtomicU64,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_config(InMemoryTransportConfig::default())
    }

    pub fn with_config(config: InMemoryTransportConfig) -> Self {
        info!(
            visibility_timeout_ms = config.visibility_timeout.as_millis() as u64,
            "creating in-memory transport"
        );
        Self {
            config,
            queues: Mutex::new(HashMap::new()),
            notifies: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            ack_calls: AtomicU64::new(0),
        }
    }

    async fn notify_for(&self, queue: &str) -> Arc<Notify> {
        let mut notifies = self.notifies.lock().await;
        Arc::clone(notifies.entry(queue.to_string()).or_default())
    }

    /// Subscribe to a broadcast channel; used by host-process health
    /// surfaces and tests.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<StatusMessage> {
        let mut channels = self.channels.lock().await;
        let state = channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelState {
                sender: broadcast::channel(self.config.channel_capacity).0,
                history: Vec::new(),
            });
        state.sender.subscribe()
    }

    /// Everything published on a channel so far, in order.
    pub async fn published(&self, channel: &str) -> Vec<StatusMessage> {
        let channels = self.channels.lock().await;
        channels
            .get(channel)
            .map(|state| state.history.clone())
            .unwrap_or_default()
    }

    /// Stream contents from a token onward.
    pub async fn read_from(&self, stream: &str, token: SequenceToken) -> Vec<StatusMessage> {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .map(|entries| entries.iter().skip(token.0 as usize).cloned().collect())
            .unwrap_or_default()
    }

    /// Number of `acknowledge` calls made against this transport.
    pub fn ack_calls(&self) -> u64 {
        self.ack_calls.load(Ordering::Relaxed)
    }

    /// Messages currently leased out and not yet acknowledged.
    pub async fn inflight_count(&self, queue: &str) -> usize {
        let queues = self.queues.lock().await;
        queues.get(queue).map(|q| q.inflight.len()).unwrap_or(0)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn enqueue(&self, queue: &str, descriptor: &JobDescriptor) -> HiveResult<()> {
        {
            let mut queues = self.queues.lock().await;
            let state = queues.entry(queue.to_string()).or_default();
            state.ready.push_back(descriptor.clone());
            debug!(
                queue,
                correlation_id = %descriptor.correlation_id,
                depth = state.ready.len(),
                "enqueued job"
            );
        }
        self.notify_for(queue).await.notify_one();
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> HiveResult<Option<JobDescriptor>> {
        let deadline = Instant::now() + wait;
        loop {
            let notify = {
                let mut queues = self.queues.lock().await;
                let state = queues.entry(queue.to_string()).or_default();
                state.reclaim_expired(Instant::now());
                if let Some(descriptor) = state.ready.pop_front() {
                    state.inflight.insert(
                        descriptor.correlation_id.clone(),
                        Inflight {
                            descriptor: descriptor.clone(),
                            lease_until: Instant::now() + self.config.visibility_timeout,
                        },
                    );
                    debug!(
                        queue,
                        correlation_id = %descriptor.correlation_id,
                        "received job"
                    );
                    return Ok(Some(descriptor));
                }
                drop(queues);
                self.notify_for(queue).await
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let slice = remaining.min(RECEIVE_POLL_SLICE);
            let _ = tokio::time::timeout(slice, notify.notified()).await;
        }
    }

    async fn acknowledge(&self, queue: &str, descriptor: &JobDescriptor) -> HiveResult<()> {
        self.ack_calls.fetch_add(1, Ordering::Relaxed);
        let mut queues = self.queues.lock().await;
        match queues
            .get_mut(queue)
            .and_then(|state| state.inflight.remove(&descriptor.correlation_id))
        {
            Some(_) => {
                debug!(
                    queue,
                    correlation_id = %descriptor.correlation_id,
                    "acknowledged job"
                );
            }
            None => {
                // Already acknowledged or the lease lapsed; either way
                // the delete is a no-op.
                debug!(
                    queue,
                    correlation_id = %descriptor.correlation_id,
                    "acknowledge was a no-op"
                );
            }
        }
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> HiveResult<u32> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map(|q| q.ready.len() as u32).unwrap_or(0))
    }

    async fn publish(&self, channel: &str, message: &StatusMessage) -> HiveResult<()> {
        let mut channels = self.channels.lock().await;
        let state = channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelState {
                sender: broadcast::channel(self.config.channel_capacity).0,
                history: Vec::new(),
            });
        state.history.push(message.clone());
        // No subscribers is fine for a fire-and-forget broadcast.
        if state.sender.send(message.clone()).is_err() {
            debug!(channel, "published with no active subscribers");
        }
        Ok(())
    }

    async fn append(&self, stream: &str, message: &StatusMessage) -> HiveResult<SequenceToken> {
        let mut streams = self.streams.lock().await;
        let entries = streams.entry(stream.to_string()).or_default();
        entries.push(message.clone());
        let token = SequenceToken(entries.len() as u64 - 1);
        if entries.len() % 10_000 == 0 {
            warn!(stream, entries = entries.len(), "stream growing large");
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_domain::{NodeStatus, StatusMessage};

    fn descriptor(task_type: &str) -> JobDescriptor {
        JobDescriptor::new(task_type, serde_json::json!({"n": 1}))
    }

    fn status_message(seq: u64) -> StatusMessage {
        StatusMessage::heartbeat(seq, NodeStatus::starting("node-test"))
    }

    #[tokio::test]
    async fn enqueue_receive_acknowledge() {
        let transport = InMemoryTransport::new();
        let job = descriptor("resize");
        transport.enqueue("jobs", &job).await.unwrap();
        assert_eq!(transport.queue_depth("jobs").await.unwrap(), 1);

        let received = transport
            .receive("jobs", Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, job);
        assert_eq!(transport.queue_depth("jobs").await.unwrap(), 0);
        assert_eq!(transport.inflight_count("jobs").await, 1);

        transport.acknowledge("jobs", &received).await.unwrap();
        assert_eq!(transport.inflight_count("jobs").await, 0);
    }

    #[tokio::test]
    async fn receive_times_out_empty() {
        let transport = InMemoryTransport::new();
        let started = Instant::now();
        let received = transport
            .receive("jobs", Duration::from_millis(60))
            .await
            .unwrap();
        assert!(received.is_none());
        assert!(started.elapsed() >= Duration::from_millis(55));
    }

    #[tokio::test]
    async fn unacknowledged_message_redelivers_after_lease() {
        let transport = InMemoryTransport::with_config(InMemoryTransportConfig {
            visibility_timeout: Duration::from_millis(40),
            ..Default::default()
        });
        let job = descriptor("flaky");
        transport.enqueue("jobs", &job).await.unwrap();

        let first = transport
            .receive("jobs", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(first.is_some());

        // Within the lease the message stays invisible.
        let hidden = transport
            .receive("jobs", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(hidden.is_none());

        // After the lease it comes back.
        let second = transport
            .receive("jobs", Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(second, Some(job));
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent() {
        let transport = InMemoryTransport::new();
        let job = descriptor("once");
        transport.enqueue("jobs", &job).await.unwrap();
        let received = transport
            .receive("jobs", Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();

        transport.acknowledge("jobs", &received).await.unwrap();
        // Second delete of the same message and a delete on an unknown
        // queue are both no-ops.
        transport.acknowledge("jobs", &received).await.unwrap();
        transport.acknowledge("other", &received).await.unwrap();
        assert_eq!(transport.ack_calls(), 3);
    }

    #[tokio::test]
    async fn publish_reaches_current_subscribers() {
        let transport = InMemoryTransport::new();
        let mut rx = transport.subscribe("status").await;

        transport
            .publish("status", &status_message(0))
            .await
            .unwrap();
        transport
            .publish("status", &status_message(1))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().sequence, 0);
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(transport.published("status").await.len(), 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let transport = InMemoryTransport::new();
        transport
            .publish("status", &status_message(0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn append_tokens_are_ordered_and_resumable() {
        let transport = InMemoryTransport::new();
        let t0 = transport
            .append("events", &status_message(0))
            .await
            .unwrap();
        let t1 = transport
            .append("events", &status_message(1))
            .await
            .unwrap();
        let t2 = transport
            .append("events", &status_message(2))
            .await
            .unwrap();
        assert!(t0 < t1 && t1 < t2);

        let resumed = transport.read_from("events", t1).await;
        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed[0].sequence, 1);
        assert_eq!(resumed[1].sequence, 2);
    }
}
