// Built-in Actions
// Generic actions available to every matrix

use crate::action::registry::ActionRegistry;
use crate::action::{Action, ActionCapability, ActionContext, ActionError, ActionOutcome, ParamKind, ParamSpec};
use crate::connectivity::Message;
use crate::context::response_key;
use crate::model::{ActionResult, FailReason};

use async_trait::async_trait;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Register every built-in action type
pub fn register_all(registry: &mut ActionRegistry) {
    registry.register_shared("SetStatic", Arc::new(SetStatic));
    registry.register_shared("Sleep", Arc::new(Sleep));
    registry.register_shared("CompareValues", Arc::new(CompareValues));
    registry.register_shared("SendMessage", Arc::new(SendMessage));
    registry.register_shared("ReceiveMessage", Arc::new(ReceiveMessage));
}

/// Publishes its parameters as outputs
pub struct SetStatic;

#[async_trait]
impl Action for SetStatic {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, ActionError> {
        let outputs = ctx.params.all().clone();
        let count = outputs.len();
        Ok(ActionOutcome::Completed(
            ActionResult::passed(format!("{} value(s) set", count)).with_outputs(outputs),
        ))
    }
}

/// Waits for `Duration` milliseconds
pub struct Sleep;

#[async_trait]
impl Action for Sleep {
    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("Duration").of_kind(ParamKind::DurationMillis)]
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, ActionError> {
        let duration = ctx.params.get_duration("Duration")?.unwrap_or_default();
        tokio::time::sleep(duration).await;
        Ok(ActionOutcome::Completed(ActionResult::passed(format!(
            "Slept for {} ms",
            duration.as_millis()
        ))))
    }
}

/// Compares `Expected.<field>` against `Actual.<field>`
pub struct CompareValues;

#[async_trait]
impl Action for CompareValues {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, ActionError> {
        let expected = ctx.params.with_prefix("Expected.");
        if expected.is_empty() {
            return Ok(ActionOutcome::Completed(
                ActionResult::failed("No 'Expected.' parameters to compare")
                    .with_fail_reason(FailReason::Calculation),
            ));
        }
        let actual = ctx.params.with_prefix("Actual.");
        Ok(ActionOutcome::Completed(verify(ctx, &expected, &actual)))
    }
}

/// Sends every parameter as a message field over the first connection
pub struct SendMessage;

#[async_trait]
impl Action for SendMessage {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, ActionError> {
        let message: Message = ctx.params.all().clone();
        let connection = {
            let (name, channel) = ctx.message_channel()?;
            channel.send(message.clone())?;
            name.to_string()
        };
        ctx.matrix_context
            .overwrite(response_key(&ctx.spec.id), message.clone());
        Ok(ActionOutcome::Completed(
            ActionResult::passed(format!("Message with {} field(s) sent via '{}'", message.len(), connection))
                .with_outputs(message),
        ))
    }
}

/// Waits for a message whose `Key.<field>` values match, then verifies `Expected.<field>`
pub struct ReceiveMessage;

impl ReceiveMessage {
    /// Take the first matching message so no other receive can claim it
    fn take(ctx: &ActionContext<'_>, keys: &BTreeMap<String, String>) -> Result<Option<Message>, ActionError> {
        let (_, channel) = ctx.message_channel()?;
        Ok(channel.take_first(&|message: &Message| keys.iter().all(|(k, v)| message.get(k) == Some(v))))
    }

    fn check(&self, ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, ActionError> {
        let keys = ctx.params.with_prefix("Key.");
        if keys.is_empty() {
            return Ok(ActionOutcome::Completed(
                ActionResult::failed("No 'Key.' parameters to match a message")
                    .with_fail_reason(FailReason::Calculation),
            ));
        }

        let Some(message) = Self::take(ctx, &keys)? else {
            let wanted: Vec<String> = keys.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            return Ok(ActionOutcome::UpdateNeeded(ActionResult::pending(format!(
                "Waiting for a message with {}",
                wanted.join(", ")
            ))));
        };

        ctx.matrix_context
            .overwrite(response_key(&ctx.spec.id), message.clone());

        let expected = ctx.params.with_prefix("Expected.");
        let result = if expected.is_empty() {
            ActionResult::passed("Message received")
        } else {
            verify(ctx, &expected, &message)
        };
        Ok(ActionOutcome::Completed(result.with_outputs(message)))
    }
}

#[async_trait]
impl Action for ReceiveMessage {
    fn capability(&self) -> ActionCapability {
        ActionCapability::AsyncUpdatable
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, ActionError> {
        self.check(ctx)
    }

    async fn poll_update(
        &self,
        ctx: &mut ActionContext<'_>,
        _previous: &ActionResult,
    ) -> Result<ActionOutcome, ActionError> {
        self.check(ctx)
    }
}

fn verify(
    ctx: &ActionContext<'_>,
    expected: &BTreeMap<String, String>,
    actual: &BTreeMap<String, String>,
) -> ActionResult {
    let details = ctx.comparison.compare(expected, actual);
    let summary = details.summary();
    if details.passed() {
        ActionResult::passed(summary).with_details(details)
    } else {
        ActionResult::failed(summary)
            .with_fail_reason(FailReason::Comparison)
            .with_details(details)
    }
}
