// Asynchronous Re-check
// Pending asynchronous actions and the loop that polls them to a final result

use crate::action::params::InputParams;
use crate::action::runner::ActionRunner;
use crate::action::Action;
use crate::connectivity::Connection;
use crate::execution::control::RunControl;
use crate::execution::scope::MatrixScope;
use crate::model::{ActionResult, ActionSpec, FailReason};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Delay between re-check rounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecheckPolicy {
    Fixed {
        interval_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        factor: f64,
        max_interval_ms: u64,
    },
}

impl Default for RecheckPolicy {
    fn default() -> Self {
        RecheckPolicy::Fixed { interval_ms: 100 }
    }
}

impl RecheckPolicy {
    pub fn fixed(interval: Duration) -> Self {
        RecheckPolicy::Fixed {
            interval_ms: interval.as_millis() as u64,
        }
    }

    /// Delay before round `round` (0-based)
    pub fn delay(&self, round: u32) -> Duration {
        match self {
            RecheckPolicy::Fixed { interval_ms } => Duration::from_millis(*interval_ms),
            RecheckPolicy::Exponential {
                initial_ms,
                factor,
                max_interval_ms,
            } => {
                let factor = if *factor < 1.0 { 1.0 } else { *factor };
                let scaled = (*initial_ms as f64) * factor.powi(round.min(64) as i32);
                Duration::from_millis(scaled.min(*max_interval_ms as f64) as u64)
            }
        }
    }
}

/// An asynchronous action awaiting its final result
pub struct PendingAction {
    pub action: Arc<dyn Action>,
    pub spec: ActionSpec,
    pub step: String,
    pub params: InputParams,
    pub connections: Vec<Arc<dyn Connection>>,
    pub timeout: Option<Duration>,
    /// Latest provisional result
    pub last: ActionResult,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub registered_at: Instant,
}

/// Polls pending actions until each reaches a final result
pub struct AsyncUpdater<'a> {
    runner: &'a ActionRunner,
    control: &'a RunControl,
    policy: &'a RecheckPolicy,
    max_wait: Duration,
}

impl<'a> AsyncUpdater<'a> {
    pub fn new(
        runner: &'a ActionRunner,
        control: &'a RunControl,
        policy: &'a RecheckPolicy,
        max_wait: Duration,
    ) -> Self {
        Self {
            runner,
            control,
            policy,
            max_wait,
        }
    }

    /// Re-check pending actions of `step`, or of every step when `None`.
    ///
    /// Each re-check replaces the action's slot in the result log. Actions
    /// still pending after `max_wait` fail with a timeout; a stop request
    /// fails every remaining action as interrupted.
    pub async fn drain(&self, scope: &mut MatrixScope, step: Option<&str>) {
        let mut waiting = scope.take_pending(|p| step.map_or(true, |s| p.step == s));
        if waiting.is_empty() {
            return;
        }
        tracing::debug!(matrix = %scope.matrix, count = waiting.len(), "Re-checking asynchronous actions");

        let mut round = 0u32;
        while !waiting.is_empty() {
            if self.control.is_stopped() || !self.control.sleep(self.policy.delay(round)).await {
                for pending in waiting.drain(..) {
                    let result = ActionResult::failed("Execution stopped before the asynchronous result arrived")
                        .with_fail_reason(FailReason::Interrupted);
                    self.runner.conclude(scope, pending, result);
                }
                break;
            }
            round += 1;

            let mut still_waiting = Vec::with_capacity(waiting.len());
            for mut pending in std::mem::take(&mut waiting) {
                if self.runner.poll(scope, &mut pending).await {
                    continue;
                }
                if pending.registered_at.elapsed() >= self.max_wait {
                    let result = ActionResult::failed(format!(
                        "No final result within {} ms: {}",
                        self.max_wait.as_millis(),
                        pending.last.comment
                    ))
                    .with_fail_reason(FailReason::Timeout);
                    self.runner.conclude(scope, pending, result);
                    continue;
                }
                still_waiting.push(pending);
            }
            waiting = still_waiting;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let policy = RecheckPolicy::fixed(Duration::from_millis(50));
        assert_eq!(policy.delay(0), Duration::from_millis(50));
        assert_eq!(policy.delay(7), Duration::from_millis(50));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RecheckPolicy::Exponential {
            initial_ms: 10,
            factor: 2.0,
            max_interval_ms: 50,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(10));
        assert_eq!(policy.delay(1), Duration::from_millis(20));
        assert_eq!(policy.delay(2), Duration::from_millis(40));
        assert_eq!(policy.delay(3), Duration::from_millis(50));
        assert_eq!(policy.delay(40), Duration::from_millis(50));
    }

    #[test]
    fn test_policy_from_yaml() {
        let policy: RecheckPolicy =
            serde_yaml::from_str("kind: exponential\ninitial_ms: 5\nfactor: 1.5\nmax_interval_ms: 100\n").unwrap();
        assert!(matches!(policy, RecheckPolicy::Exponential { initial_ms: 5, .. }));
        assert_eq!(RecheckPolicy::default(), RecheckPolicy::Fixed { interval_ms: 100 });
    }
}
