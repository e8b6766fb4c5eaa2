use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hive_config::AppConfig;
use hive_domain::{
    ErrorCategory, JobDescriptor, LogSink, NodeLifecycle, NodeState, NodeStatus, StatusMessage,
    Transport,
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::error_aggregator::ErrorAggregator;
use crate::heartbeat::HeartbeatTask;
use crate::registry::{Dispatcher, TaskRegistry, TaskRun};

/// The `fail` event routes a job into its error terminal. It is fired
/// directly, never executed as a step.
const FAIL_EVENT: &str = "fail";

/// Upper bound on transitions per job. A validated machine can still
/// cycle through forward edges; a job that has not reached a terminal
/// state within this many transitions is abandoned.
const MAX_TRANSITIONS: usize = 256;

/// Runtime knobs for one node, resolved from configuration once at
/// startup.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub node_id: String,
    pub job_queue: String,
    pub status_channel: String,
    pub event_stream: String,
    pub poll_wait: Duration,
    pub idle_backoff: Duration,
    pub max_idle_backoff: Duration,
    pub heartbeat_interval: Duration,
    pub max_lifetime: Duration,
    pub log_path: Option<PathBuf>,
}

impl NodeSettings {
    pub fn from_config(config: &AppConfig, node_id: String) -> Self {
        Self {
            node_id,
            job_queue: config.transport.job_queue.clone(),
            status_channel: config.transport.status_channel.clone(),
            event_stream: config.transport.event_stream.clone(),
            poll_wait: Duration::from_millis(config.coordinator.poll_wait_ms),
            idle_backoff: Duration::from_millis(config.coordinator.idle_backoff_ms),
            max_idle_backoff: Duration::from_millis(config.coordinator.max_idle_backoff_ms),
            heartbeat_interval: Duration::from_secs(config.coordinator.heartbeat_interval_seconds),
            max_lifetime: Duration::from_secs(config.coordinator.max_lifetime_seconds),
            log_path: config.node.log_path.clone().map(PathBuf::from),
        }
    }
}

/// Why the node loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Age crossed the configured lifetime ceiling.
    AgedOut,
    /// An error category reached its threshold.
    Fatal,
    /// Cooperative stop requested through the handle or a signal.
    Stopped,
    /// Unrecoverable failure on the node's own status path.
    StatusPathFailed,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A job was received and driven to completion or abandonment.
    Processed,
    /// Empty receive; a heartbeat went out and the idle backoff grew.
    Idle,
    /// The receive itself failed; recorded, will be retried next cycle.
    Faulted,
    /// The loop should end with this reason.
    Stop(StopReason),
}

/// How a single job run ended.
enum JobOutcome {
    /// The workflow reached a terminal state (including the error
    /// terminal); the message may be acknowledged.
    Completed,
    /// The workflow could not reach any terminal state; the message is
    /// left on the queue for redelivery after its lease expires.
    Abandoned,
}

/// Single-job worker loop. Polls the job queue, resolves each message
/// through the dispatcher, drives the task's workflow to a terminal
/// state, and emits status along the way. One coordinator per node;
/// jobs are processed strictly one at a time.
pub struct Coordinator {
    settings: NodeSettings,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    errors: Arc<ErrorAggregator>,
    lifecycle: Arc<dyn NodeLifecycle>,
    log_sink: Arc<dyn LogSink>,
    status: Arc<RwLock<NodeStatus>>,
    sequence: Arc<AtomicU64>,
    jobs_processed: AtomicU64,
    /// Current idle backoff in ms; doubles on empty receives, resets on
    /// work.
    idle_backoff_ms: AtomicU64,
    stop_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    started: Instant,
}

/// Cloneable view onto a running coordinator: read status, request
/// stop.
#[derive(Clone)]
pub struct NodeHandle {
    status: Arc<RwLock<NodeStatus>>,
    stop_flag: Arc<AtomicBool>,
    started: Instant,
}

impl NodeHandle {
    /// Current status snapshot with live uptime.
    pub async fn status(&self) -> NodeStatus {
        let mut status = self.status.read().await.clone();
        status.uptime_seconds = self.started.elapsed().as_secs();
        status
    }

    /// Request a cooperative stop; observed at the top of the next
    /// cycle.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

impl Coordinator {
    pub fn new(
        settings: NodeSettings,
        transport: Arc<dyn Transport>,
        registry: TaskRegistry,
        errors: Arc<ErrorAggregator>,
        lifecycle: Arc<dyn NodeLifecycle>,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        let dispatcher = Dispatcher::new(settings.node_id.clone(), registry, Arc::clone(&errors));
        let status = Arc::new(RwLock::new(NodeStatus::starting(&settings.node_id)));
        let (shutdown_tx, _) = broadcast::channel(4);
        let idle_backoff_ms = AtomicU64::new(settings.idle_backoff.as_millis() as u64);
        Self {
            settings,
            transport,
            dispatcher,
            errors,
            lifecycle,
            log_sink,
            status,
            sequence: Arc::new(AtomicU64::new(0)),
            jobs_processed: AtomicU64::new(0),
            idle_backoff_ms,
            stop_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            started: Instant::now(),
        }
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            status: Arc::clone(&self.status),
            stop_flag: Arc::clone(&self.stop_flag),
            started: self.started,
        }
    }

    /// Run until aged out, fatal, or stopped, then drain. The heartbeat
    /// task runs alongside the loop and stops with it.
    pub async fn run(&self) -> StopReason {
        info!(
            node_id = %self.settings.node_id,
            queue = %self.settings.job_queue,
            max_lifetime_secs = self.settings.max_lifetime.as_secs(),
            "node coordinator starting"
        );
        self.set_state(NodeState::Starting).await;
        if let Err(err) = self.emit_status(Some("node starting")).await {
            self.errors
                .record(ErrorCategory::Transport, err.to_string());
        }

        let heartbeat = HeartbeatTask {
            transport: Arc::clone(&self.transport),
            status_channel: self.settings.status_channel.clone(),
            status: Arc::clone(&self.status),
            started: self.started,
            sequence: Arc::clone(&self.sequence),
            interval: self.settings.heartbeat_interval,
            stop_flag: Arc::clone(&self.stop_flag),
            errors: Arc::clone(&self.errors),
        }
        .spawn(self.shutdown_tx.subscribe());

        let reason = loop {
            match self.cycle().await {
                CycleOutcome::Stop(reason) => break reason,
                CycleOutcome::Processed | CycleOutcome::Idle | CycleOutcome::Faulted => {}
            }
        };

        // Heartbeats stop first so nothing publishes after the final
        // dying status.
        let _ = self.shutdown_tx.send(());
        heartbeat.abort();
        self.drain(reason).await;
        reason
    }

    /// One poll cycle. Public so hosts and tests can drive the loop
    /// step by step.
    pub async fn cycle(&self) -> CycleOutcome {
        if self.stop_flag.load(Ordering::SeqCst) {
            info!("stop requested, ending poll loop");
            return CycleOutcome::Stop(StopReason::Stopped);
        }
        if self.started.elapsed() >= self.settings.max_lifetime {
            info!(
                uptime_secs = self.started.elapsed().as_secs(),
                "lifetime ceiling reached, node will drain"
            );
            return CycleOutcome::Stop(StopReason::AgedOut);
        }
        if self.errors.is_fatal() {
            error!(
                tripped = ?self.errors.tripped_categories(),
                "error threshold tripped, node will drain"
            );
            return CycleOutcome::Stop(StopReason::Fatal);
        }

        match self
            .transport
            .receive(&self.settings.job_queue, self.settings.poll_wait)
            .await
        {
            Ok(Some(descriptor)) => {
                self.idle_backoff_ms.store(
                    self.settings.idle_backoff.as_millis() as u64,
                    Ordering::Relaxed,
                );
                self.set_state(NodeState::Running).await;
                let outcome = self.process_job(&descriptor).await;
                match outcome {
                    JobOutcome::Completed => {
                        if let Err(err) = self
                            .transport
                            .acknowledge(&self.settings.job_queue, &descriptor)
                            .await
                        {
                            self.errors.record(
                                ErrorCategory::Transport,
                                format!("acknowledge failed: {err}"),
                            );
                        }
                        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
                    }
                    JobOutcome::Abandoned => {
                        warn!(
                            correlation_id = %descriptor.correlation_id,
                            "job abandoned, leaving message for redelivery"
                        );
                    }
                }
                CycleOutcome::Processed
            }
            Ok(None) => {
                self.set_state(NodeState::Idle).await;
                if let Err(err) = self.emit_status(None).await {
                    self.errors.record(
                        ErrorCategory::Transport,
                        format!("idle heartbeat failed: {err}"),
                    );
                    if !err.is_retryable() {
                        error!("unrecoverable failure on status path: {err}");
                        return CycleOutcome::Stop(StopReason::StatusPathFailed);
                    }
                }
                let backoff = self.idle_backoff_ms.load(Ordering::Relaxed);
                debug!(backoff_ms = backoff, "queue empty, backing off");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                let next = (backoff.saturating_mul(2))
                    .min(self.settings.max_idle_backoff.as_millis() as u64);
                self.idle_backoff_ms.store(next, Ordering::Relaxed);
                CycleOutcome::Idle
            }
            Err(err) => {
                self.errors
                    .record(ErrorCategory::Transport, format!("receive failed: {err}"));
                tokio::time::sleep(self.settings.idle_backoff).await;
                CycleOutcome::Faulted
            }
        }
    }

    /// Drive one resolved job's workflow to a terminal state. Each
    /// forward event executes its step first and fires only on success;
    /// a failed step routes through the `fail` event when the current
    /// state declares one.
    async fn process_job(&self, descriptor: &JobDescriptor) -> JobOutcome {
        let mut run = self.dispatcher.resolve(descriptor.clone());
        info!(
            task_run_id = %run.id,
            task_type = %run.task.task_type(),
            "job dispatched"
        );

        let mut transitions = 0usize;
        while !run.workflow.is_terminal() {
            if transitions >= MAX_TRANSITIONS {
                self.errors.record(
                    ErrorCategory::Workflow,
                    format!(
                        "job {} exceeded {MAX_TRANSITIONS} transitions without terminating",
                        run.id
                    ),
                );
                warn!(
                    task_run_id = %run.id,
                    state = run.workflow.current_state_name(),
                    "transition ceiling hit, abandoning job"
                );
                return JobOutcome::Abandoned;
            }
            transitions += 1;

            let Some(event) = run.workflow.next_event().map(str::to_string) else {
                // construction guarantees only terminal states lack
                // events, so this is unreachable for a validated machine
                self.errors.record(
                    ErrorCategory::Workflow,
                    format!(
                        "state '{}' has no outgoing event",
                        run.workflow.current_state_name()
                    ),
                );
                return JobOutcome::Abandoned;
            };

            let event = if event == FAIL_EVENT {
                event
            } else {
                match run.task.execute_step(&event, &run.context).await {
                    Ok(()) => event,
                    Err(err) => {
                        self.errors.record(
                            ErrorCategory::Task,
                            format!("step '{event}' failed for {}: {err}", run.id),
                        );
                        if run.workflow.has_event(FAIL_EVENT) {
                            FAIL_EVENT.to_string()
                        } else {
                            warn!(
                                task_run_id = %run.id,
                                event,
                                "step failed with no fail route declared"
                            );
                            return JobOutcome::Abandoned;
                        }
                    }
                }
            };

            let from = run.workflow.current_state_name().to_string();
            match run.workflow.fire(&event) {
                Ok(to) => {
                    let note = format!("{from} -[{event}]-> {to}");
                    debug!(task_run_id = %run.id, %note, "workflow transition");
                    if let Err(err) = self.emit_transition(&run, &note).await {
                        self.errors.record(
                            ErrorCategory::Transport,
                            format!("transition emit failed: {err}"),
                        );
                    }
                }
                Err(err) => {
                    self.errors
                        .record(ErrorCategory::Workflow, err.to_string());
                    warn!(task_run_id = %run.id, "transition rejected: {err}");
                    return JobOutcome::Abandoned;
                }
            }
        }

        info!(
            task_run_id = %run.id,
            final_state = run.workflow.current_state_name(),
            "workflow reached terminal state"
        );
        JobOutcome::Completed
    }

    async fn set_state(&self, state: NodeState) {
        let mut status = self.status.write().await;
        status.state = state;
        status.uptime_seconds = self.started.elapsed().as_secs();
        status.extra_info.insert(
            "jobs_processed".to_string(),
            self.jobs_processed.load(Ordering::Relaxed).to_string(),
        );
    }

    async fn status_snapshot(&self) -> NodeStatus {
        let mut status = self.status.read().await.clone();
        status.uptime_seconds = self.started.elapsed().as_secs();
        status
    }

    /// Publish one status message on the broadcast channel. A note makes
    /// it a lifecycle transition; without one it is a heartbeat.
    async fn emit_status(&self, note: Option<&str>) -> hive_domain::HiveResult<()> {
        let snapshot = self.status_snapshot().await;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let message = match note {
            Some(note) => StatusMessage::transition(sequence, snapshot, note),
            None => StatusMessage::heartbeat(sequence, snapshot),
        };
        self.transport
            .publish(&self.settings.status_channel, &message)
            .await
    }

    /// Workflow transitions go to both surfaces: broadcast for live
    /// observers, ordered append for replayable history.
    async fn emit_transition(&self, run: &TaskRun, note: &str) -> hive_domain::HiveResult<()> {
        let snapshot = self.status_snapshot().await;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let message = StatusMessage::transition(sequence, snapshot, format!("{}: {note}", run.id));
        self.transport
            .publish(&self.settings.status_channel, &message)
            .await?;
        self.transport
            .append(&self.settings.event_stream, &message)
            .await?;
        Ok(())
    }

    /// Final descent: announce dying, ship logs, terminate the
    /// underlying node. Every step is attempted even if earlier ones
    /// fail.
    async fn drain(&self, reason: StopReason) {
        info!(?reason, "node draining");
        self.set_state(NodeState::Dying).await;
        if let Err(err) = self.emit_status(Some("node dying")).await {
            warn!("could not publish dying status: {err}");
        }
        if let Some(path) = &self.settings.log_path {
            if let Err(err) = self.log_sink.flush(path).await {
                warn!(path = %path.display(), "log flush failed: {err}");
            }
        }
        if let Err(err) = self.lifecycle.terminate_self(&self.settings.node_id).await {
            error!(
                node_id = %self.settings.node_id,
                "terminate request failed: {err}"
            );
        }
        info!(
            node_id = %self.settings.node_id,
            jobs_processed = self.jobs_processed.load(Ordering::Relaxed),
            uptime_secs = self.started.elapsed().as_secs(),
            "node drained"
        );
    }
}

/// Convenience entry: build a coordinator from parts and run it to
/// completion. Hosts needing the handle construct the coordinator
/// themselves.
pub async fn run_node(
    settings: NodeSettings,
    transport: Arc<dyn Transport>,
    registry: TaskRegistry,
    errors: Arc<ErrorAggregator>,
    lifecycle: Arc<dyn NodeLifecycle>,
    log_sink: Arc<dyn LogSink>,
) -> StopReason {
    Coordinator::new(settings, transport, registry, errors, lifecycle, log_sink)
        .run()
        .await
}
