// Matrix Executor
// Runs the steps of one matrix in order and builds its report

use crate::action::{ActionRunner, AsyncUpdater, RecheckPolicy};
use crate::execution::control::RunControl;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::log::MatrixResultLog;
use crate::execution::scope::MatrixScope;
use crate::execution::step::StepExecutor;
use crate::model::{FailReason, Matrix, MatrixReport, MatrixState, StepOutcome};

use parking_lot::RwLock;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executes one matrix against a shared runner and run control
pub struct MatrixExecutor {
    matrix: Arc<Matrix>,
    runner: Arc<ActionRunner>,
    control: RunControl,
    log: Arc<MatrixResultLog>,
    state: Arc<RwLock<MatrixState>>,
    recheck: RecheckPolicy,
    max_wait: Duration,
    event_tx: Option<ProgressSender>,
}

impl MatrixExecutor {
    pub fn new(
        matrix: Arc<Matrix>,
        runner: Arc<ActionRunner>,
        control: RunControl,
        log: Arc<MatrixResultLog>,
    ) -> Self {
        Self {
            matrix,
            runner,
            control,
            log,
            state: Arc::new(RwLock::new(MatrixState::NotStarted)),
            recheck: RecheckPolicy::default(),
            max_wait: Duration::from_secs(30),
            event_tx: None,
        }
    }

    pub fn with_recheck(mut self, policy: RecheckPolicy, max_wait: Duration) -> Self {
        self.recheck = policy;
        self.max_wait = max_wait;
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Share the state cell with an observer
    pub fn with_state(mut self, state: Arc<RwLock<MatrixState>>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> MatrixState {
        *self.state.read()
    }

    pub async fn execute(self) -> MatrixReport {
        let started = Instant::now();
        let matrix = self.matrix.clone();
        *self.state.write() = MatrixState::Running;

        self.event_tx.send_event(ExecutionEvent::matrix_started(
            &matrix.name,
            matrix.steps.len(),
            matrix.action_count(),
        ));
        tracing::info!(matrix = %matrix.name, steps = matrix.steps.len(), "Matrix started");

        let mut scope = MatrixScope::new(&matrix.name, self.log.clone());
        let updater = AsyncUpdater::new(&self.runner, &self.control, &self.recheck, self.max_wait);
        let steps = StepExecutor::new(&self.runner, &self.control, &updater, self.event_tx.clone());

        let mut skipped: HashMap<&str, String> = HashMap::new();
        let mut durations: HashMap<&str, Duration> = HashMap::new();
        let mut halted_by: Option<&str> = None;
        let mut interrupted = false;

        for (index, step) in matrix.steps.iter().enumerate() {
            if let Some(failed_step) = halted_by {
                let reason = format!("Skipped after failure of step '{}'", failed_step);
                steps.skip(&mut scope, step, &reason);
                skipped.insert(&step.name, reason);
                continue;
            }

            if self.control.is_stopped() {
                let reason = "Execution stopped".to_string();
                steps.skip(&mut scope, step, &reason);
                skipped.insert(&step.name, reason);
                interrupted = true;
                continue;
            }

            if step.policy.ask_for_continue && step.policy.execute {
                let reason = format!("Waiting to continue before step '{}'", step.name);
                self.control.pause(&reason);
                self.event_tx.send_event(ExecutionEvent::Paused {
                    matrix: matrix.name.clone(),
                    reason,
                });
                self.control.wait_if_paused().await;

                if self.control.is_stopped() {
                    let reason = "Execution stopped".to_string();
                    steps.skip(&mut scope, step, &reason);
                    skipped.insert(&step.name, reason);
                    interrupted = true;
                    continue;
                }
                self.event_tx.send_event(ExecutionEvent::Resumed {
                    matrix: matrix.name.clone(),
                });
            }

            let run = steps.execute(&mut scope, step, index).await;
            durations.insert(&step.name, run.duration);
            interrupted |= run.interrupted;

            if run.failed() && !step.policy.continue_on_failure && !matrix.continue_on_failure {
                tracing::info!(matrix = %matrix.name, step = %step.name, "Step failed, skipping remaining steps");
                halted_by = Some(&step.name);
            }
        }

        // Anything still pending is resolved at the end of the matrix
        updater.drain(&mut scope, None).await;
        if self.control.is_stopped()
            && self
                .log
                .snapshot()
                .iter()
                .any(|r| r.fail_reason == Some(FailReason::Interrupted))
        {
            interrupted = true;
        }

        let outcomes = matrix
            .steps
            .iter()
            .map(|step| {
                let results = self.log.for_step(&step.name);
                match skipped.get(step.name.as_str()) {
                    Some(reason) => StepOutcome::skipped(&step.name, results, reason.as_str()),
                    None => StepOutcome::from_results(
                        &step.name,
                        results,
                        durations.get(step.name.as_str()).copied().unwrap_or_default(),
                    ),
                }
            })
            .collect();

        let state = if interrupted {
            MatrixState::Interrupted
        } else {
            MatrixState::Finished
        };
        *self.state.write() = state;

        let report = MatrixReport::new(&matrix.name, state, outcomes, started.elapsed());
        self.event_tx.send_event(ExecutionEvent::matrix_completed(
            &matrix.name,
            report.verdict,
            report.duration,
        ));
        tracing::info!(matrix = %matrix.name, verdict = ?report.verdict, "Matrix finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionRegistry;
    use crate::compare::FieldComparator;
    use crate::connectivity::InMemoryConnectionRegistry;
    use crate::context::GlobalContext;
    use crate::model::{ActionSpec, ActionStatus, Step, StepPolicy, StepStatus, Verdict};

    fn runner() -> Arc<ActionRunner> {
        Arc::new(ActionRunner::new(
            Arc::new(ActionRegistry::with_builtins()),
            Arc::new(InMemoryConnectionRegistry::new()),
            Arc::new(GlobalContext::new("tester")),
            Arc::new(FieldComparator::new()),
        ))
    }

    fn failing_compare(id: &str) -> ActionSpec {
        ActionSpec::new(id, "CompareValues")
            .with_param("Expected.X", "1")
            .with_param("Actual.X", "2")
    }

    async fn run(matrix: Matrix) -> (MatrixReport, Arc<MatrixResultLog>) {
        let log = Arc::new(MatrixResultLog::new());
        let report = MatrixExecutor::new(Arc::new(matrix), runner(), RunControl::new(), log.clone())
            .execute()
            .await;
        (report, log)
    }

    #[tokio::test]
    async fn test_mandatory_failure_skips_rest_of_step_and_later_steps() {
        let matrix = Matrix::new("orders")
            .with_step(Step::new("S1").with_action(ActionSpec::new("a1", "SetStatic").with_param("X", "1")))
            .with_step(
                Step::new("S2")
                    .with_action(failing_compare("a2").mandatory())
                    .with_action(ActionSpec::new("a3", "SetStatic")),
            )
            .with_step(Step::new("S3").with_action(ActionSpec::new("a4", "SetStatic")));

        let (report, log) = run(matrix).await;
        assert_eq!(report.verdict, Verdict::Failed);
        assert_eq!(report.state, MatrixState::Finished);
        assert_eq!(report.step("S1").unwrap().status, StepStatus::Passed);
        assert_eq!(report.step("S2").unwrap().status, StepStatus::Failed);
        assert_eq!(report.step("S3").unwrap().status, StepStatus::Skipped);
        assert_eq!(log.get("a3").unwrap().status, ActionStatus::Skipped);
        assert_eq!(log.len(), 4);
    }

    #[tokio::test]
    async fn test_continue_on_failure_runs_later_steps() {
        let matrix = Matrix::new("orders")
            .with_step(
                Step::new("S1")
                    .with_policy(StepPolicy {
                        continue_on_failure: true,
                        ..StepPolicy::default()
                    })
                    .with_action(failing_compare("a1"))
                    .with_action(ActionSpec::new("a2", "SetStatic")),
            )
            .with_step(Step::new("S2").with_action(ActionSpec::new("a3", "SetStatic")));

        let (report, log) = run(matrix).await;
        assert_eq!(report.verdict, Verdict::Failed);
        // Non-mandatory failure lets the step continue
        assert!(log.get("a2").unwrap().is_passed());
        assert_eq!(report.step("S2").unwrap().status, StepStatus::Passed);
    }

    #[tokio::test]
    async fn test_disabled_step_and_action_are_skipped() {
        let mut disabled = ActionSpec::new("a2", "SetStatic");
        disabled.executable = false;
        let matrix = Matrix::new("m")
            .with_step(
                Step::new("S1")
                    .with_action(ActionSpec::new("a1", "SetStatic"))
                    .with_action(disabled),
            )
            .with_step(
                Step::new("S2")
                    .with_policy(StepPolicy {
                        execute: false,
                        ..StepPolicy::default()
                    })
                    .with_action(ActionSpec::new("a3", "SetStatic")),
            );

        let (report, _) = run(matrix).await;
        assert_eq!(report.verdict, Verdict::Passed);
        assert_eq!(report.count(ActionStatus::Skipped), 2);
        assert_eq!(report.step("S2").unwrap().status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_references_flow_between_actions() {
        let matrix = Matrix::new("m").with_step(
            Step::new("S1")
                .with_action(ActionSpec::new("a1", "SetStatic").with_param("Price", "10"))
                .with_action(
                    ActionSpec::new("a2", "CompareValues")
                        .with_param("Expected.Price", "10")
                        .with_param("Actual.Price", "@{a1.Price}"),
                )
                .with_action(
                    ActionSpec::new("a3", "CompareValues")
                        .with_param("Expected.Price", "@{a1.Missing}")
                        .with_param("Actual.Price", "10"),
                ),
        );

        let (_, log) = run(matrix).await;
        assert!(log.get("a2").unwrap().is_passed());
        let a3 = log.get("a3").unwrap();
        assert_eq!(a3.fail_reason, Some(FailReason::Calculation));
        assert!(a3.comment.contains("Missing"));
    }

    #[tokio::test]
    async fn test_stopped_before_start_skips_everything() {
        let matrix = Matrix::new("m")
            .with_step(Step::new("S1").with_action(ActionSpec::new("a1", "SetStatic")))
            .with_step(Step::new("S2").with_action(ActionSpec::new("a2", "SetStatic")));
        let control = RunControl::new();
        control.stop();
        let log = Arc::new(MatrixResultLog::new());

        let report = MatrixExecutor::new(Arc::new(matrix), runner(), control, log.clone())
            .execute()
            .await;
        assert_eq!(report.verdict, Verdict::Interrupted);
        assert_eq!(report.count(ActionStatus::Skipped), 2);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_during_last_step_skips_remaining_actions() {
        let sleep = |id: &str| ActionSpec::new(id, "Sleep").with_param("Duration", "100");
        let matrix = Matrix::new("m").with_step(
            Step::new("Only")
                .with_action(sleep("a1"))
                .with_action(sleep("a2"))
                .with_action(ActionSpec::new("a3", "SetStatic")),
        );
        let control = RunControl::new();
        let log = Arc::new(MatrixResultLog::new());
        let executor = MatrixExecutor::new(Arc::new(matrix), runner(), control.clone(), log.clone());

        let handle = tokio::spawn(executor.execute());
        tokio::time::sleep(Duration::from_millis(30)).await;
        control.stop();
        let report = handle.await.unwrap();

        // a1 was already running and finishes; nothing after it starts
        assert!(log.get("a1").unwrap().is_passed());
        assert_eq!(log.get("a2").unwrap().status, ActionStatus::Skipped);
        assert_eq!(log.get("a3").unwrap().status, ActionStatus::Skipped);
        assert_eq!(report.state, MatrixState::Interrupted);
        assert_eq!(report.verdict, Verdict::Interrupted);
    }
}
