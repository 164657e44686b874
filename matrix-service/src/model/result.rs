// Result Model
// Verdicts for actions, steps, matrices and whole scheduler runs

use crate::compare::ComparisonDetails;
use crate::model::matrix::MatrixState;
use crate::model::serialize_millis;

use chrono::{DateTime, Utc};
use serde::Serialize;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Status of a single action attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionStatus {
    Passed,
    Failed,
    Skipped,
    /// Provisional result of an asynchronous action awaiting re-check
    Pending,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Passed => write!(f, "Passed"),
            ActionStatus::Failed => write!(f, "Failed"),
            ActionStatus::Skipped => write!(f, "Skipped"),
            ActionStatus::Pending => write!(f, "Pending"),
        }
    }
}

/// Why an action failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailReason {
    /// Business verdict reported by the action
    Failed,
    /// Input parameters could not be resolved
    Calculation,
    /// Unexpected error inside the action
    Exception,
    /// The action or its re-check ran out of time
    Timeout,
    /// Expected and actual values differ
    Comparison,
    /// Execution was interrupted before the action could complete
    Interrupted,
}

/// Outcome of one action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub action_id: String,
    pub action_type: String,
    pub step: String,
    pub status: ActionStatus,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<FailReason>,
    /// Rendered underlying failure, kept for diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ComparisonDetails>,
    /// Output parameters other actions can reference
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    /// Number of invocations (1 + re-checks)
    pub attempts: u32,
    pub inverted: bool,
    /// The failure was already reported elsewhere and must not be reported again
    pub suppressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl ActionResult {
    fn with_status(status: ActionStatus, comment: impl Into<String>) -> Self {
        Self {
            action_id: String::new(),
            action_type: String::new(),
            step: String::new(),
            status,
            comment: comment.into(),
            fail_reason: None,
            cause: None,
            details: None,
            outputs: BTreeMap::new(),
            attempts: 0,
            inverted: false,
            suppressed: false,
            started_at: None,
            duration: Duration::ZERO,
        }
    }

    pub fn passed(comment: impl Into<String>) -> Self {
        Self::with_status(ActionStatus::Passed, comment)
    }

    pub fn failed(comment: impl Into<String>) -> Self {
        let mut result = Self::with_status(ActionStatus::Failed, comment);
        result.fail_reason = Some(FailReason::Failed);
        result
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::with_status(ActionStatus::Skipped, reason)
    }

    pub fn pending(comment: impl Into<String>) -> Self {
        Self::with_status(ActionStatus::Pending, comment)
    }

    /// Failed result wrapping an unexpected error
    pub fn crashed(error: &dyn std::error::Error) -> Self {
        let mut result = Self::failed(format!("Action crashed: {}", error));
        result.fail_reason = Some(FailReason::Exception);
        result.cause = Some(render_cause(error));
        result
    }

    pub fn with_fail_reason(mut self, reason: FailReason) -> Self {
        self.fail_reason = Some(reason);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_details(mut self, details: ComparisonDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }

    pub fn with_outputs(mut self, outputs: BTreeMap<String, String>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    /// Attach the identity of the action this result belongs to
    pub fn bind(
        mut self,
        action_id: impl Into<String>,
        action_type: impl Into<String>,
        step: impl Into<String>,
    ) -> Self {
        self.action_id = action_id.into();
        self.action_type = action_type.into();
        self.step = step.into();
        self
    }

    pub fn is_passed(&self) -> bool {
        self.status == ActionStatus::Passed
    }

    pub fn is_failed(&self) -> bool {
        self.status == ActionStatus::Failed
    }

    pub fn is_pending(&self) -> bool {
        self.status == ActionStatus::Pending
    }

    /// Swap Passed and Failed for inverted actions
    pub fn invert(mut self) -> Self {
        match self.status {
            ActionStatus::Passed => {
                self.status = ActionStatus::Failed;
                self.fail_reason = Some(FailReason::Failed);
                self.comment = format!("Inverted action passed: {}", self.comment);
            }
            ActionStatus::Failed => {
                self.status = ActionStatus::Passed;
                self.fail_reason = None;
                self.comment = format!("Inverted action failed as expected: {}", self.comment);
            }
            ActionStatus::Skipped | ActionStatus::Pending => return self,
        }
        self.inverted = true;
        self
    }
}

/// Render an error together with its source chain
pub(crate) fn render_cause(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        rendered.push_str(": ");
        rendered.push_str(&inner.to_string());
        source = inner.source();
    }
    rendered
}

/// Status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of one step within one matrix
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub name: String,
    pub status: StepStatus,
    pub results: Vec<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl StepOutcome {
    /// Derive the step status from its action results
    pub fn from_results(name: impl Into<String>, results: Vec<ActionResult>, duration: Duration) -> Self {
        let status = if results.iter().any(|r| r.is_failed()) {
            StepStatus::Failed
        } else if !results.is_empty() && results.iter().all(|r| r.status == ActionStatus::Skipped) {
            StepStatus::Skipped
        } else {
            StepStatus::Passed
        };
        let comment = match status {
            StepStatus::Failed => Some("One or more actions failed".to_string()),
            _ => None,
        };
        Self {
            name: name.into(),
            status,
            results,
            comment,
            duration,
        }
    }

    pub fn skipped(name: impl Into<String>, results: Vec<ActionResult>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            results,
            comment: Some(reason.into()),
            duration: Duration::ZERO,
        }
    }
}

/// Overall verdict of one matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Passed,
    Failed,
    Interrupted,
}

/// Full report for one matrix run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixReport {
    pub name: String,
    pub state: MatrixState,
    pub verdict: Verdict,
    pub steps: Vec<StepOutcome>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl MatrixReport {
    pub fn new(name: impl Into<String>, state: MatrixState, steps: Vec<StepOutcome>, duration: Duration) -> Self {
        let verdict = if state == MatrixState::Interrupted {
            Verdict::Interrupted
        } else if steps.iter().any(|s| s.status == StepStatus::Failed) {
            Verdict::Failed
        } else {
            Verdict::Passed
        };
        Self {
            name: name.into(),
            state,
            verdict,
            steps,
            duration,
        }
    }

    /// Action results in execution order
    pub fn results(&self) -> impl Iterator<Item = &ActionResult> {
        self.steps.iter().flat_map(|s| s.results.iter())
    }

    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn count(&self, status: ActionStatus) -> usize {
        self.results().filter(|r| r.status == status).count()
    }
}

/// Top-level verdict of a scheduler run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunVerdict {
    Successful,
    Failed,
    Interrupted,
}

impl fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunVerdict::Successful => write!(f, "Successful"),
            RunVerdict::Failed => write!(f, "Failed"),
            RunVerdict::Interrupted => write!(f, "Interrupted"),
        }
    }
}

/// A closeable global resource that failed to release
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeardownFailure {
    pub key: String,
    pub message: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}': {}", self.key, self.message)
    }
}

/// Report of a complete scheduler run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub user: String,
    pub verdict: RunVerdict,
    pub matrices: Vec<MatrixReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub teardown_failures: Vec<TeardownFailure>,
}

impl RunReport {
    pub fn new(
        user: impl Into<String>,
        matrices: Vec<MatrixReport>,
        started_at: DateTime<Utc>,
        interrupted: bool,
    ) -> Self {
        let verdict = if interrupted
            || matrices.iter().any(|m| m.verdict == Verdict::Interrupted)
        {
            RunVerdict::Interrupted
        } else if matrices.iter().any(|m| m.verdict == Verdict::Failed) {
            RunVerdict::Failed
        } else {
            RunVerdict::Successful
        };
        Self {
            user: user.into(),
            verdict,
            matrices,
            started_at,
            finished_at: Utc::now(),
            teardown_failures: Vec::new(),
        }
    }

    pub fn matrix(&self, name: &str) -> Option<&MatrixReport> {
        self.matrices.iter().find(|m| m.name == name)
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
