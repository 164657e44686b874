// Action Runner
// Resolves parameters, invokes one action with its timeout and records the result

use crate::action::params;
use crate::action::recheck::PendingAction;
use crate::action::registry::ActionRegistry;
use crate::action::{ActionCapability, ActionContext, ActionError, ActionOutcome};
use crate::compare::ComparisonService;
use crate::connectivity::{Connection, ConnectionRegistry};
use crate::context::GlobalContext;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::scope::MatrixScope;
use crate::model::{ActionResult, ActionSpec, ActionStatus, FailReason, Step};

use chrono::{DateTime, Utc};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Invokes actions and turns every outcome into exactly one logged result
pub struct ActionRunner {
    registry: Arc<ActionRegistry>,
    connections: Arc<dyn ConnectionRegistry>,
    global: Arc<GlobalContext>,
    comparison: Arc<dyn ComparisonService>,
    default_timeout: Option<Duration>,
    event_tx: Option<ProgressSender>,
}

impl ActionRunner {
    pub fn new(
        registry: Arc<ActionRegistry>,
        connections: Arc<dyn ConnectionRegistry>,
        global: Arc<GlobalContext>,
        comparison: Arc<dyn ComparisonService>,
    ) -> Self {
        Self {
            registry,
            connections,
            global,
            comparison,
            default_timeout: None,
            event_tx: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Action timeout wins over the step timeout, which wins over the default
    fn timeout_for(&self, spec: &ActionSpec, step: &Step) -> Option<Duration> {
        spec.timeout.or(step.policy.timeout).or(self.default_timeout)
    }

    fn resolve_connections(&self, spec: &ActionSpec) -> Result<Vec<Arc<dyn Connection>>, Vec<String>> {
        let mut resolved = Vec::with_capacity(spec.connections.len());
        let mut missing = Vec::new();
        for name in &spec.connections {
            match self.connections.get(name) {
                Some(connection) => resolved.push(connection),
                None => missing.push(format!("connection '{}' is not defined", name)),
            }
        }
        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(missing)
        }
    }

    /// Run one action and record its result.
    ///
    /// Asynchronous actions that ask for a re-check are recorded as pending
    /// and queued on the scope.
    pub async fn run(&self, scope: &mut MatrixScope, step: &Step, spec: &ActionSpec) -> ActionResult {
        let started_at = Utc::now();
        let started = Instant::now();
        self.event_tx.send_event(ExecutionEvent::action_started(
            &scope.matrix,
            &step.name,
            &spec.id,
            &spec.action_type,
        ));

        if !spec.executable {
            let result = ActionResult::skipped("Action is not executable");
            return self.finish(scope, spec, &step.name, result, started_at, started, 0);
        }

        let Some(action) = self.registry.create(spec) else {
            let result = ActionResult::failed(format!("Unknown action type '{}'", spec.action_type))
                .with_fail_reason(FailReason::Calculation);
            return self.finish(scope, spec, &step.name, result, started_at, started, 0);
        };

        let input = match params::resolve(spec, &action.parameters(), &scope.context) {
            Ok(input) => input,
            Err(errors) => {
                tracing::debug!(action = %spec.id, %errors, "Parameter resolution failed");
                let result = ActionResult::failed(errors.to_string()).with_fail_reason(FailReason::Calculation);
                return self.finish(scope, spec, &step.name, result, started_at, started, 0);
            }
        };

        let connections = match self.resolve_connections(spec) {
            Ok(connections) => connections,
            Err(problems) => {
                let result = ActionResult::failed(problems.join("; ")).with_fail_reason(FailReason::Calculation);
                return self.finish(scope, spec, &step.name, result, started_at, started, 0);
            }
        };

        let timeout = self.timeout_for(spec, step);
        let outcome = {
            let mut ctx = ActionContext {
                spec,
                matrix: &scope.matrix,
                step: &step.name,
                params: &input,
                matrix_context: &mut scope.context,
                global: &self.global,
                connections: &connections,
                comparison: self.comparison.as_ref(),
                attempt: 1,
            };
            invoke(timeout, action.execute(&mut ctx)).await
        };

        let (result, needs_update) = self.interpret(spec, action.capability(), outcome, timeout);
        if !needs_update {
            return self.finish(scope, spec, &step.name, result, started_at, started, 1);
        }

        let provisional = self.provisional(scope, spec, &step.name, result, started_at, started, 1);
        self.event_tx.send_event(ExecutionEvent::ActionPending {
            matrix: scope.matrix.clone(),
            step: step.name.clone(),
            action_id: spec.id.clone(),
        });
        scope.pending.push(PendingAction {
            action,
            spec: spec.clone(),
            step: step.name.clone(),
            params: input,
            connections,
            timeout,
            last: provisional.clone(),
            attempts: 1,
            started_at,
            started,
            registered_at: Instant::now(),
        });
        provisional
    }

    /// Re-check a pending action once. Returns true when it reached a final result.
    pub async fn poll(&self, scope: &mut MatrixScope, pending: &mut PendingAction) -> bool {
        pending.attempts += 1;
        let outcome = {
            let mut ctx = ActionContext {
                spec: &pending.spec,
                matrix: &scope.matrix,
                step: &pending.step,
                params: &pending.params,
                matrix_context: &mut scope.context,
                global: &self.global,
                connections: &pending.connections,
                comparison: self.comparison.as_ref(),
                attempt: pending.attempts,
            };
            invoke(pending.timeout, pending.action.poll_update(&mut ctx, &pending.last)).await
        };

        let (result, needs_update) = self.interpret(
            &pending.spec,
            ActionCapability::AsyncUpdatable,
            outcome,
            pending.timeout,
        );
        if needs_update {
            pending.last = self.provisional(
                scope,
                &pending.spec,
                &pending.step,
                result,
                pending.started_at,
                pending.started,
                pending.attempts,
            );
            return false;
        }

        self.finish(
            scope,
            &pending.spec,
            &pending.step,
            result,
            pending.started_at,
            pending.started,
            pending.attempts,
        );
        true
    }

    /// Finalize a pending action with a result decided outside the action
    pub fn conclude(&self, scope: &mut MatrixScope, pending: PendingAction, result: ActionResult) -> ActionResult {
        let result = result.with_outputs(pending.last.outputs.clone());
        self.finish(
            scope,
            &pending.spec,
            &pending.step,
            result,
            pending.started_at,
            pending.started,
            pending.attempts,
        )
    }

    /// Record a skip for an action that never ran
    pub fn skip(&self, scope: &mut MatrixScope, step: &str, spec: &ActionSpec, reason: &str) -> ActionResult {
        let result = ActionResult::skipped(reason).bind(&spec.id, &spec.action_type, step);
        scope.log.record(result.clone());
        self.event_tx.send_event(ExecutionEvent::ActionSkipped {
            matrix: scope.matrix.clone(),
            step: step.to_string(),
            action_id: spec.id.clone(),
            reason: reason.to_string(),
        });
        result
    }

    fn interpret(
        &self,
        spec: &ActionSpec,
        capability: ActionCapability,
        outcome: Option<Result<ActionOutcome, ActionError>>,
        timeout: Option<Duration>,
    ) -> (ActionResult, bool) {
        match outcome {
            None => {
                let millis = timeout.map(|t| t.as_millis()).unwrap_or_default();
                tracing::warn!(action = %spec.id, timeout_ms = millis as u64, "Action timed out");
                let result = ActionResult::failed(format!("Action timed out after {} ms", millis))
                    .with_fail_reason(FailReason::Timeout);
                (result, false)
            }
            Some(Err(error)) => {
                tracing::error!(action = %spec.id, action_type = %spec.action_type, %error, "Action failed unexpectedly");
                (ActionResult::crashed(&error), false)
            }
            Some(Ok(ActionOutcome::Completed(mut result))) => {
                if result.status == ActionStatus::Pending {
                    result.status = ActionStatus::Failed;
                    result.fail_reason = Some(FailReason::Exception);
                    result.comment = format!("Action completed without a verdict: {}", result.comment);
                }
                (result, false)
            }
            Some(Ok(ActionOutcome::UpdateNeeded(mut result))) => match capability {
                ActionCapability::AsyncUpdatable => {
                    result.status = ActionStatus::Pending;
                    result.fail_reason = None;
                    (result, true)
                }
                ActionCapability::Synchronous => {
                    let result = ActionResult::failed("Synchronous action asked for a re-check")
                        .with_fail_reason(FailReason::Exception);
                    (result, false)
                }
            },
            Some(Ok(ActionOutcome::Handled(comment))) => {
                tracing::debug!(action = %spec.id, %comment, "Action reported a handled failure");
                let mut result = ActionResult::failed(comment);
                result.suppressed = true;
                (result, false)
            }
        }
    }

    fn stamp(
        &self,
        spec: &ActionSpec,
        step: &str,
        result: ActionResult,
        started_at: DateTime<Utc>,
        started: Instant,
        attempts: u32,
    ) -> ActionResult {
        let mut result = result.bind(&spec.id, &spec.action_type, step);
        result.attempts = attempts;
        result.started_at = Some(started_at);
        result.duration = started.elapsed();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn provisional(
        &self,
        scope: &mut MatrixScope,
        spec: &ActionSpec,
        step: &str,
        result: ActionResult,
        started_at: DateTime<Utc>,
        started: Instant,
        attempts: u32,
    ) -> ActionResult {
        let result = self.stamp(spec, step, result, started_at, started, attempts);
        scope.log.record(result.clone());
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        scope: &mut MatrixScope,
        spec: &ActionSpec,
        step: &str,
        result: ActionResult,
        started_at: DateTime<Utc>,
        started: Instant,
        attempts: u32,
    ) -> ActionResult {
        let mut result = self.stamp(spec, step, result, started_at, started, attempts);

        let business_verdict = matches!(
            result.fail_reason,
            None | Some(FailReason::Failed) | Some(FailReason::Comparison)
        );
        if spec.inverted && !result.suppressed && business_verdict {
            result = result.invert();
        }

        if result.status != ActionStatus::Skipped {
            scope.context.publish_outputs(&spec.id, &result.outputs);
        }
        scope.log.record(result.clone());

        match result.status {
            ActionStatus::Skipped => self.event_tx.send_event(ExecutionEvent::ActionSkipped {
                matrix: scope.matrix.clone(),
                step: step.to_string(),
                action_id: spec.id.clone(),
                reason: result.comment.clone(),
            }),
            _ => self
                .event_tx
                .send_event(ExecutionEvent::action_completed(&scope.matrix, &result)),
        }
        tracing::debug!(
            matrix = %scope.matrix,
            action = %spec.id,
            status = %result.status,
            attempts,
            "Action finished"
        );
        result
    }
}

/// Await an action future, bounded by `timeout` when one applies
async fn invoke<F>(timeout: Option<Duration>, future: F) -> Option<Result<ActionOutcome, ActionError>>
where
    F: Future<Output = Result<ActionOutcome, ActionError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}
