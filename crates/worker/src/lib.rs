//! Node-side worker: task registry, dispatch, workflow execution and
//! the coordinator loop tying them to a transport.

pub mod coordinator;
pub mod error_aggregator;
mod heartbeat;
pub mod registry;
pub mod tasks;
pub mod workflow;

pub use coordinator::{run_node, Coordinator, CycleOutcome, NodeHandle, NodeSettings, StopReason};
pub use error_aggregator::ErrorAggregator;
pub use registry::{Dispatcher, TaskFactory, TaskRegistry, TaskRun};
pub use tasks::{DefaultTask, PipelineTask, Task, TaskContext};
pub use workflow::{TransitionDef, Workflow, WorkflowSpec};
