// Step Executor
// Runs the actions of one step in order under the step's policy

use crate::action::{ActionRunner, AsyncUpdater};
use crate::execution::control::RunControl;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::scope::MatrixScope;
use crate::model::{Step, StepOutcome, StepStatus};

use std::time::{Duration, Instant};

/// Outcome of running one step, before late asynchronous results arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRun {
    pub status: StepStatus,
    /// Some actions were skipped because the run was stopped
    pub interrupted: bool,
    pub duration: Duration,
}

impl StepRun {
    pub fn failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

pub struct StepExecutor<'a> {
    runner: &'a ActionRunner,
    control: &'a RunControl,
    updater: &'a AsyncUpdater<'a>,
    event_tx: Option<ProgressSender>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        runner: &'a ActionRunner,
        control: &'a RunControl,
        updater: &'a AsyncUpdater<'a>,
        event_tx: Option<ProgressSender>,
    ) -> Self {
        Self {
            runner,
            control,
            updater,
            event_tx,
        }
    }

    /// Record every action of `step` as skipped
    pub fn skip(&self, scope: &mut MatrixScope, step: &Step, reason: &str) {
        for spec in &step.actions {
            self.runner.skip(scope, &step.name, spec, reason);
        }
        self.event_tx
            .send_event(ExecutionEvent::step_skipped(&scope.matrix, &step.name, reason));
    }

    pub async fn execute(&self, scope: &mut MatrixScope, step: &Step, index: usize) -> StepRun {
        let started = Instant::now();

        if !step.policy.execute {
            self.skip(scope, step, "Step is not executable");
            return StepRun {
                status: StepStatus::Skipped,
                interrupted: false,
                duration: started.elapsed(),
            };
        }

        self.event_tx.send_event(ExecutionEvent::step_started(
            &scope.matrix,
            &step.name,
            index,
            step.actions.len(),
        ));
        tracing::info!(matrix = %scope.matrix, step = %step.name, "Step started");

        let mut interrupted = false;
        let mut actions = step.actions.iter();
        while let Some(spec) = actions.next() {
            self.control.wait_if_paused().await;

            if self.control.is_stopped() {
                let reason = "Execution stopped";
                self.runner.skip(scope, &step.name, spec, reason);
                for rest in actions.by_ref() {
                    self.runner.skip(scope, &step.name, rest, reason);
                }
                interrupted = true;
                break;
            }

            let result = self.runner.run(scope, step, spec).await;
            if result.is_failed() && spec.mandatory {
                let reason = format!("Mandatory action '{}' failed", spec.id);
                tracing::info!(matrix = %scope.matrix, step = %step.name, action = %spec.id, "Mandatory action failed, skipping rest of step");
                for rest in actions.by_ref() {
                    self.runner.skip(scope, &step.name, rest, &reason);
                }
                break;
            }
        }

        if step.policy.wait_async && !interrupted {
            self.updater.drain(scope, Some(&step.name)).await;
        }

        let duration = started.elapsed();
        let status = StepOutcome::from_results(&step.name, scope.log.for_step(&step.name), duration).status;
        self.event_tx.send_event(ExecutionEvent::step_completed(
            &scope.matrix,
            &step.name,
            status,
            duration,
        ));
        tracing::info!(matrix = %scope.matrix, step = %step.name, ?status, "Step finished");

        StepRun {
            status,
            interrupted,
            duration,
        }
    }
}
