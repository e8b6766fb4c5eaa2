use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hive_domain::{ErrorCategory, JobDescriptor, DEFAULT_TASK_TYPE};
use tracing::{debug, info, warn};

use crate::error_aggregator::ErrorAggregator;
use crate::tasks::{DefaultTask, PipelineTask, Task, TaskContext};
use crate::workflow::Workflow;

pub type TaskFactory = Arc<dyn Fn() -> Arc<dyn Task> + Send + Sync>;

/// Static table mapping canonical task type names to factories.
/// Populated once at startup from the approved list; never mutated at
/// runtime. The default factory always exists.
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
    default_factory: TaskFactory,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let default_factory: TaskFactory = Arc::new(|| Arc::new(DefaultTask));
        let mut factories = HashMap::new();
        factories.insert(DEFAULT_TASK_TYPE.to_string(), Arc::clone(&default_factory));
        Self {
            factories,
            default_factory,
        }
    }

    /// Build a registry from the approved type list in configuration.
    /// Names without a matching builtin are skipped with a warning so a
    /// typo in config cannot open an unapproved code path.
    pub fn from_approved(approved: &[String]) -> Self {
        let mut registry = Self::new();
        for name in approved {
            let canonical = Self::normalize(name);
            match canonical.as_str() {
                DEFAULT_TASK_TYPE => {}
                PipelineTask::TYPE => {
                    registry.register(PipelineTask::TYPE, Arc::new(|| Arc::new(PipelineTask)));
                }
                other => {
                    warn!(task_type = other, "approved task type has no factory, skipping");
                }
            }
        }
        info!(registered = registry.len(), "task registry populated");
        registry
    }

    /// Startup-time registration only; the registry is immutable once
    /// handed to a dispatcher.
    pub fn register<S: Into<String>>(&mut self, task_type: S, factory: TaskFactory) {
        self.factories
            .insert(Self::normalize(&task_type.into()), factory);
    }

    /// Canonical snake_case form: case-folded, separators normalized,
    /// camelCase split on word boundaries.
    pub fn normalize(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut prev_lower = false;
        for ch in raw.trim().chars() {
            match ch {
                '-' | ' ' | '.' | ':' | '/' => {
                    if !out.ends_with('_') {
                        out.push('_');
                    }
                    prev_lower = false;
                }
                c if c.is_uppercase() => {
                    if prev_lower && !out.ends_with('_') {
                        out.push('_');
                    }
                    out.extend(c.to_lowercase());
                    prev_lower = false;
                }
                c => {
                    out.push(c);
                    prev_lower = c.is_lowercase() || c.is_ascii_digit();
                }
            }
        }
        out.trim_matches('_').to_string()
    }

    pub fn lookup(&self, task_type: &str) -> Option<TaskFactory> {
        self.factories.get(&Self::normalize(task_type)).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(&Self::normalize(task_type))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn default_factory(&self) -> TaskFactory {
        Arc::clone(&self.default_factory)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One job bound to its task, workflow and context.
pub struct TaskRun {
    pub id: String,
    pub descriptor: JobDescriptor,
    pub task: Arc<dyn Task>,
    pub workflow: Workflow,
    pub context: TaskContext,
    pub started_at: DateTime<Utc>,
}

/// Resolves inbound messages to runnable tasks. Resolution never fails:
/// unparseable messages and unknown types degrade to the default task,
/// with the problem recorded in the aggregator.
pub struct Dispatcher {
    node_id: String,
    registry: TaskRegistry,
    errors: Arc<ErrorAggregator>,
}

impl Dispatcher {
    pub fn new(node_id: String, registry: TaskRegistry, errors: Arc<ErrorAggregator>) -> Self {
        Self {
            node_id,
            registry,
            errors,
        }
    }

    /// Resolve raw wire bytes, synthesizing a fallback descriptor when
    /// parsing fails. Entry point for hosts that feed undecoded bytes
    /// into the dispatcher; transports that decode on receive hand
    /// their typed descriptors straight to [`Dispatcher::resolve`].
    pub fn resolve_raw(&self, raw: &[u8]) -> TaskRun {
        match JobDescriptor::parse(raw) {
            Ok(descriptor) => self.resolve(descriptor),
            Err(err) => {
                warn!("job descriptor unparseable, routing to default task: {err}");
                self.errors
                    .record(ErrorCategory::Parse, err.to_string());
                self.resolve(JobDescriptor::fallback(raw))
            }
        }
    }

    pub fn resolve(&self, descriptor: JobDescriptor) -> TaskRun {
        let canonical = TaskRegistry::normalize(&descriptor.task_type);
        let factory = match self.registry.lookup(&canonical) {
            Some(factory) => factory,
            None => {
                warn!(
                    task_type = %descriptor.task_type,
                    correlation_id = %descriptor.correlation_id,
                    "task type not in approved registry, using default"
                );
                self.errors.record(
                    ErrorCategory::UnapprovedTask,
                    format!("task type not approved: {}", descriptor.task_type),
                );
                self.registry.default_factory()
            }
        };

        let task = factory();
        let workflow = match Workflow::new(&task.workflow_spec()) {
            Ok(workflow) => workflow,
            Err(err) => {
                warn!(
                    task_type = %task.task_type(),
                    "task declared a malformed workflow, using default: {err}"
                );
                self.errors
                    .record(ErrorCategory::Workflow, err.to_string());
                Workflow::fallback()
            }
        };

        let context = TaskContext {
            node_id: self.node_id.clone(),
            correlation_id: descriptor.correlation_id.clone(),
            payload: descriptor.payload.clone(),
        };
        let id = format!("{}-{}", self.node_id, descriptor.correlation_id);
        debug!(
            task_run_id = %id,
            task_type = %task.task_type(),
            initial_state = workflow.current_state_name(),
            "job resolved"
        );

        TaskRun {
            id,
            descriptor,
            task,
            workflow,
            context,
            started_at: Utc::now(),
        }
    }
}
