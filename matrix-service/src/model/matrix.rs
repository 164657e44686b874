// Matrix Definitions
// The loaded, immutable shape of a matrix: steps in order, actions in order

use serde::Serialize;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// A test scenario: ordered steps, each an ordered group of actions
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    /// Unique matrix name (the matrix id used by the scheduler)
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Keep executing later steps even after a step failed
    pub continue_on_failure: bool,
    /// Steps in declared order
    pub steps: Vec<Step>,
}

impl Matrix {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            continue_on_failure: false,
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = value;
        self
    }

    /// Iterate over every action of the matrix in execution order
    pub fn actions(&self) -> impl Iterator<Item = (&Step, &ActionSpec)> {
        self.steps
            .iter()
            .flat_map(|step| step.actions.iter().map(move |action| (step, action)))
    }

    /// Total number of actions across all steps
    pub fn action_count(&self) -> usize {
        self.steps.iter().map(|s| s.actions.len()).sum()
    }

    /// Names of every connection referenced by any action
    pub fn connection_names(&self) -> BTreeSet<String> {
        self.actions()
            .flat_map(|(_, action)| action.connections.iter().cloned())
            .collect()
    }

    /// Find an action declaration by id
    pub fn find_action(&self, id: &str) -> Option<&ActionSpec> {
        self.actions()
            .map(|(_, action)| action)
            .find(|action| action.id == id)
    }
}

/// Execution state of a matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatrixState {
    NotStarted,
    Running,
    Finished,
    Interrupted,
}

/// Per-step execution policy
#[derive(Debug, Clone, PartialEq)]
pub struct StepPolicy {
    /// Later steps still run if this step fails
    pub continue_on_failure: bool,
    /// Pause the scheduler before this step and wait for a resume
    pub ask_for_continue: bool,
    /// Disabled steps record every action as skipped
    pub execute: bool,
    /// Re-check asynchronous actions of this step before the next step starts
    pub wait_async: bool,
    /// Default timeout for each action of the step
    pub timeout: Option<Duration>,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            continue_on_failure: false,
            ask_for_continue: false,
            execute: true,
            wait_async: false,
            timeout: None,
        }
    }
}

/// An ordered group of actions sharing one execution policy
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub policy: StepPolicy,
    pub actions: Vec<ActionSpec>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: StepPolicy::default(),
            actions: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: StepPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }
}

/// Declaration of a single action as loaded from a matrix
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpec {
    /// Stable identifier, unique within the matrix
    pub id: String,
    /// Action type name resolved through the action registry
    pub action_type: String,
    /// Raw, unresolved input parameters
    pub params: BTreeMap<String, String>,
    /// Names of the connections this action needs
    pub connections: Vec<String>,
    /// A failure stops the rest of the step
    pub mandatory: bool,
    /// Non-executable actions are recorded as skipped
    pub executable: bool,
    /// Swap the final passed/failed verdict
    pub inverted: bool,
    /// Overrides the step timeout
    pub timeout: Option<Duration>,
    /// Free-form comment carried into reports
    pub comment: Option<String>,
}

impl ActionSpec {
    pub fn new(id: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_type: action_type.into(),
            params: BTreeMap::new(),
            connections: Vec::new(),
            mandatory: false,
            executable: true,
            inverted: false,
            timeout: None,
            comment: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_connection(mut self, name: impl Into<String>) -> Self {
        self.connections.push(name.into());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
