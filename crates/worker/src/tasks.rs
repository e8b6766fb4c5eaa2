use async_trait::async_trait;
use hive_domain::{HiveError, HiveResult, DEFAULT_TASK_TYPE};
use tracing::{debug, info};

use crate::workflow::WorkflowSpec;

/// Resources a task sees while executing: its own payload plus node
/// identity for logging and id derivation.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub node_id: String,
    pub correlation_id: String,
    pub payload: serde_json::Value,
}

/// One approved unit of work. Each event of the task's workflow maps
/// 1:1 to an execution step; the coordinator calls `execute_step` for
/// the expected forward event and fires it on success. The `fail` event
/// is routing only and never has a step of its own.
#[async_trait]
pub trait Task: Send + Sync {
    fn task_type(&self) -> &str;

    /// Declarative workflow this task runs under. Validated at
    /// resolution time; malformed declarations fall back to the
    /// default workflow.
    fn workflow_spec(&self) -> WorkflowSpec {
        WorkflowSpec::default_workflow()
    }

    async fn execute_step(&self, event: &str, ctx: &TaskContext) -> HiveResult<()>;
}

/// Fallback task for unknown types and unparseable messages. Runs the
/// default workflow with no side effects so a bad message never stalls
/// the pipeline.
pub struct DefaultTask;

#[async_trait]
impl Task for DefaultTask {
    fn task_type(&self) -> &str {
        DEFAULT_TASK_TYPE
    }

    async fn execute_step(&self, event: &str, ctx: &TaskContext) -> HiveResult<()> {
        debug!(
            correlation_id = %ctx.correlation_id,
            event,
            "default task step (no-op)"
        );
        Ok(())
    }
}

/// Three-stage build/run/report pipeline.
///
/// A payload may name a stage under `fail_at` to force that step to
/// fail, which exercises the error routing end to end.
pub struct PipelineTask;

impl PipelineTask {
    pub const TYPE: &'static str = "pipeline";
}

#[async_trait]
impl Task for PipelineTask {
    fn task_type(&self) -> &str {
        Self::TYPE
    }

    fn workflow_spec(&self) -> WorkflowSpec {
        WorkflowSpec::new()
            .step("new", "build", "building")
            .step("building", "run", "in_progress")
            .step("in_progress", "post_results", "done")
            .step("new", "fail", "error")
            .step("building", "fail", "error")
            .step("in_progress", "fail", "error")
    }

    async fn execute_step(&self, event: &str, ctx: &TaskContext) -> HiveResult<()> {
        if ctx
            .payload
            .get("fail_at")
            .and_then(|v| v.as_str())
            .is_some_and(|stage| stage == event)
        {
            return Err(HiveError::Internal(format!(
                "pipeline stage '{event}' failed as instructed by payload"
            )));
        }

        match event {
            "build" | "run" | "post_results" => {
                info!(
                    correlation_id = %ctx.correlation_id,
                    stage = event,
                    "pipeline stage finished"
                );
                Ok(())
            }
            other => Err(HiveError::Internal(format!(
                "pipeline has no step for event '{other}'"
            ))),
        }
    }
}
