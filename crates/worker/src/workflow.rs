use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hive_domain::{HiveError, HiveResult};

/// One row of a declarative workflow description. A row with an event
/// and target declares an edge; a row with neither explicitly declares
/// a terminal state.
#[derive(Debug, Clone)]
pub struct TransitionDef {
    pub state: String,
    pub event: Option<String>,
    pub target: Option<String>,
}

/// Ordered workflow description, validated into a `Workflow` at
/// construction time. The first declared state is the initial state.
#[derive(Debug, Clone, Default)]
pub struct WorkflowSpec {
    transitions: Vec<TransitionDef>,
}

impl WorkflowSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step<S: Into<String>>(mut self, state: S, event: S, target: S) -> Self {
        self.transitions.push(TransitionDef {
            state: state.into(),
            event: Some(event.into()),
            target: Some(target.into()),
        });
        self
    }

    pub fn terminal<S: Into<String>>(mut self, state: S) -> Self {
        self.transitions.push(TransitionDef {
            state: state.into(),
            event: None,
            target: None,
        });
        self
    }

    pub fn transitions(&self) -> &[TransitionDef] {
        &self.transitions
    }

    /// `new -[start]-> running -[complete]-> done`, with `fail` edges
    /// from both working states into a terminal `error` state. Used
    /// whenever a task declares nothing better.
    pub fn default_workflow() -> Self {
        Self::new()
            .step("new", "start", "running")
            .step("running", "complete", "done")
            .step("new", "fail", "error")
            .step("running", "fail", "error")
    }
}

#[derive(Debug, Clone)]
struct StateDef {
    name: String,
    /// Outgoing edges in declaration order; the first one is the
    /// expected forward step.
    events: Vec<(String, usize)>,
}

/// Explicit finite state machine driving one task instance.
///
/// Malformed descriptions are rejected here, never at first use; firing
/// an undeclared event is an observable failure that leaves the current
/// state untouched.
#[derive(Debug, Clone)]
pub struct Workflow {
    states: Vec<StateDef>,
    current: usize,
    history: Vec<(String, DateTime<Utc>)>,
}

impl Workflow {
    pub fn new(spec: &WorkflowSpec) -> HiveResult<Self> {
        if spec.transitions().is_empty() {
            return Err(HiveError::malformed_workflow("no transitions declared"));
        }

        // Collect states in declaration order: sources and explicit
        // terminals first, then any state only ever named as a target.
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut states: Vec<StateDef> = Vec::new();
        let mut intern = |name: &str, states: &mut Vec<StateDef>| -> usize {
            *index.entry(name.to_string()).or_insert_with(|| {
                states.push(StateDef {
                    name: name.to_string(),
                    events: Vec::new(),
                });
                states.len() - 1
            })
        };

        let mut explicit_terminals: Vec<usize> = Vec::new();
        for def in spec.transitions() {
            let state_idx = intern(&def.state, &mut states);
            match (&def.event, &def.target) {
                (Some(event), Some(target)) => {
                    let target_idx = intern(target, &mut states);
                    let state = &mut states[state_idx];
                    if state.events.iter().any(|(e, _)| e == event) {
                        return Err(HiveError::malformed_workflow(format!(
                            "duplicate event '{event}' declared for state '{}'",
                            def.state
                        )));
                    }
                    state.events.push((event.clone(), target_idx));
                }
                (None, None) => explicit_terminals.push(state_idx),
                _ => {
                    return Err(HiveError::malformed_workflow(format!(
                        "transition from '{}' must declare both event and target or neither",
                        def.state
                    )));
                }
            }
        }

        for idx in explicit_terminals {
            if !states[idx].events.is_empty() {
                return Err(HiveError::malformed_workflow(format!(
                    "state '{}' declared terminal but has outgoing events",
                    states[idx].name
                )));
            }
        }

        let mut has_incoming = vec![false; states.len()];
        for state in &states {
            for (_, target) in &state.events {
                has_incoming[*target] = true;
            }
        }
        let initials: Vec<&StateDef> = states
            .iter()
            .enumerate()
            .filter(|(i, _)| !has_incoming[*i])
            .map(|(_, s)| s)
            .collect();
        match initials.as_slice() {
            [single] => {
                if single.name != states[0].name {
                    return Err(HiveError::malformed_workflow(format!(
                        "initial state '{}' must be declared first",
                        single.name
                    )));
                }
            }
            [] => {
                return Err(HiveError::malformed_workflow(
                    "no initial state: every state has incoming edges",
                ));
            }
            many => {
                let names: Vec<&str> = many.iter().map(|s| s.name.as_str()).collect();
                return Err(HiveError::malformed_workflow(format!(
                    "multiple initial states: {}",
                    names.join(", ")
                )));
            }
        }

        if !states.iter().any(|s| s.events.is_empty()) {
            return Err(HiveError::malformed_workflow("no terminal state reachable"));
        }

        let history = vec![(states[0].name.clone(), Utc::now())];
        Ok(Self {
            states,
            current: 0,
            history,
        })
    }

    /// Known-good machine used when a task's declared description turns
    /// out to be malformed at resolution time. Mirrors
    /// `WorkflowSpec::default_workflow`.
    pub(crate) fn fallback() -> Self {
        let states = vec![
            StateDef {
                name: "new".to_string(),
                events: vec![("start".to_string(), 1), ("fail".to_string(), 3)],
            },
            StateDef {
                name: "running".to_string(),
                events: vec![("complete".to_string(), 2), ("fail".to_string(), 3)],
            },
            StateDef {
                name: "done".to_string(),
                events: Vec::new(),
            },
            StateDef {
                name: "error".to_string(),
                events: Vec::new(),
            },
        ];
        let history = vec![(states[0].name.clone(), Utc::now())];
        Self {
            states,
            current: 0,
            history,
        }
    }

    /// Fire a declared event, moving to its target state. Undeclared
    /// events fail without changing state.
    pub fn fire(&mut self, event: &str) -> HiveResult<&str> {
        let target = self.states[self.current]
            .events
            .iter()
            .find(|(e, _)| e == event)
            .map(|(_, t)| *t);
        match target {
            Some(target) => {
                self.current = target;
                self.history
                    .push((self.states[target].name.clone(), Utc::now()));
                Ok(self.states[target].name.as_str())
            }
            None => Err(HiveError::Transition {
                event: event.to_string(),
                state: self.states[self.current].name.clone(),
            }),
        }
    }

    pub fn current_state_name(&self) -> &str {
        &self.states[self.current].name
    }

    pub fn is_terminal(&self) -> bool {
        self.states[self.current].events.is_empty()
    }

    /// Events declared for the current state, in declaration order.
    pub fn allowed_events(&self) -> Vec<&str> {
        self.states[self.current]
            .events
            .iter()
            .map(|(e, _)| e.as_str())
            .collect()
    }

    /// The expected forward step: the first event declared for the
    /// current state. `None` only in a terminal state.
    pub fn next_event(&self) -> Option<&str> {
        self.states[self.current]
            .events
            .first()
            .map(|(e, _)| e.as_str())
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.states[self.current].events.iter().any(|(e, _)| e == event)
    }

    pub fn history(&self) -> &[(String, DateTime<Utc>)] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pipeline_spec() -> WorkflowSpec {
        WorkflowSpec::new()
            .step("new", "build", "building")
            .step("building", "run", "in_progress")
            .step("in_progress", "post_results", "done")
    }

    #[test]
    fn valid_description_constructs() {
        let workflow = Workflow::new(&build_pipeline_spec()).unwrap();
        assert_eq!(workflow.current_state_name(), "new");
        assert!(!workflow.is_terminal());
        assert_eq!(workflow.allowed_events(), vec!["build"]);
    }

    #[test]
    fn drives_through_to_terminal() {
        let mut workflow = Workflow::new(&build_pipeline_spec()).unwrap();

        // Out-of-order event fails and leaves the state untouched.
        let err = workflow.fire("run").unwrap_err();
        assert!(matches!(err, HiveError::Transition { .. }));
        assert_eq!(workflow.current_state_name(), "new");

        assert_eq!(workflow.fire("build").unwrap(), "building");
        assert_eq!(workflow.fire("run").unwrap(), "in_progress");
        assert_eq!(workflow.fire("post_results").unwrap(), "done");
        assert!(workflow.is_terminal());
        assert_eq!(workflow.next_event(), None);

        let visited: Vec<&str> = workflow.history().iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(visited, vec!["new", "building", "in_progress", "done"]);
    }

    #[test]
    fn firing_in_terminal_state_fails() {
        let mut workflow = Workflow::new(&build_pipeline_spec()).unwrap();
        workflow.fire("build").unwrap();
        workflow.fire("run").unwrap();
        workflow.fire("post_results").unwrap();
        assert!(workflow.fire("build").is_err());
        assert_eq!(workflow.current_state_name(), "done");
    }

    #[test]
    fn rejects_zero_initial_states() {
        // A pure cycle: every state has an incoming edge.
        let spec = WorkflowSpec::new()
            .step("a", "go", "b")
            .step("b", "back", "a");
        let err = Workflow::new(&spec).unwrap_err();
        assert!(matches!(err, HiveError::MalformedWorkflow(_)));
    }

    #[test]
    fn rejects_multiple_initial_states() {
        let spec = WorkflowSpec::new()
            .step("a", "go", "c")
            .step("b", "go", "c");
        let err = Workflow::new(&spec).unwrap_err();
        assert!(matches!(err, HiveError::MalformedWorkflow(_)));
    }

    #[test]
    fn rejects_duplicate_event_for_state() {
        let spec = WorkflowSpec::new()
            .step("a", "go", "b")
            .step("a", "go", "c");
        assert!(Workflow::new(&spec).is_err());
    }

    #[test]
    fn rejects_terminal_declaration_with_edges() {
        let spec = WorkflowSpec::new().step("a", "go", "b").terminal("a");
        assert!(Workflow::new(&spec).is_err());
    }

    #[test]
    fn rejects_half_declared_transition() {
        let spec = WorkflowSpec {
            transitions: vec![TransitionDef {
                state: "a".to_string(),
                event: Some("go".to_string()),
                target: None,
            }],
        };
        assert!(Workflow::new(&spec).is_err());
    }

    #[test]
    fn rejects_empty_description() {
        assert!(Workflow::new(&WorkflowSpec::new()).is_err());
    }

    #[test]
    fn rejects_machine_without_terminal() {
        let spec = WorkflowSpec::new()
            .step("a", "go", "b")
            .step("b", "spin", "b");
        assert!(Workflow::new(&spec).is_err());
    }

    #[test]
    fn default_workflow_routes_failures() {
        let mut workflow = Workflow::new(&WorkflowSpec::default_workflow()).unwrap();
        assert_eq!(workflow.next_event(), Some("start"));
        workflow.fire("start").unwrap();
        assert!(workflow.has_event("fail"));
        assert_eq!(workflow.fire("fail").unwrap(), "error");
        assert!(workflow.is_terminal());
    }

    #[test]
    fn fallback_matches_default_workflow() {
        let mut from_spec = Workflow::new(&WorkflowSpec::default_workflow()).unwrap();
        let mut fallback = Workflow::fallback();
        for event in ["start", "complete"] {
            assert_eq!(
                from_spec.fire(event).unwrap(),
                fallback.fire(event).unwrap()
            );
        }
        assert!(fallback.is_terminal());
    }
}
