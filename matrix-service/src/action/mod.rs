// Actions
// The Action trait, its execution context and the outcomes an action can report

pub mod builtin;
pub mod params;
pub mod recheck;
pub mod registry;
pub mod runner;

pub use params::{InputParams, ParamErrors, ParamKind, ParamSpec, Reference};
pub use recheck::{AsyncUpdater, PendingAction, RecheckPolicy};
pub use registry::ActionRegistry;
pub use runner::ActionRunner;

use crate::compare::ComparisonService;
use crate::connectivity::{Connection, ConnectionError, MessageChannel};
use crate::context::{ContextError, GlobalContext, MatrixContext};
use crate::model::{ActionResult, ActionSpec};

use async_trait::async_trait;
use thiserror::Error;

use std::sync::Arc;

/// Whether an action finishes in one call or needs re-checking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCapability {
    Synchronous,
    /// May return `UpdateNeeded` and be polled again later
    AsyncUpdatable,
}

/// What an action reports back to the runner
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// Final result
    Completed(ActionResult),
    /// Provisional result; the action must be re-checked
    UpdateNeeded(ActionResult),
    /// Expected failure the action has already reported; recorded as
    /// failed without crash diagnostics
    Handled(String),
}

/// Unexpected failure inside an action
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Params(#[from] ParamErrors),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{message}")]
    Unexpected {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ActionError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        ActionError::Unexpected {
            message: message.into(),
            source: None,
        }
    }

    pub fn caused_by(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ActionError::Unexpected {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Everything an action can see while it runs
pub struct ActionContext<'a> {
    pub spec: &'a ActionSpec,
    pub matrix: &'a str,
    pub step: &'a str,
    pub params: &'a InputParams,
    pub matrix_context: &'a mut MatrixContext,
    pub global: &'a GlobalContext,
    pub connections: &'a [Arc<dyn Connection>],
    pub comparison: &'a dyn ComparisonService,
    /// 1 for the first invocation, incremented on every re-check
    pub attempt: u32,
}

impl<'a> ActionContext<'a> {
    /// The first connection the action declared
    pub fn connection(&self) -> Result<&Arc<dyn Connection>, ActionError> {
        self.connections.first().ok_or_else(|| {
            ActionError::unexpected(format!("action '{}' declares no connection", self.spec.id))
        })
    }

    pub fn message_channel(&self) -> Result<(&str, &dyn MessageChannel), ActionError> {
        let connection = self.connection()?;
        let channel = connection
            .message_channel()
            .ok_or_else(|| ConnectionError::NoMessaging(connection.name().to_string()))?;
        Ok((connection.name(), channel))
    }
}

/// A unit of test behaviour
#[async_trait]
pub trait Action: Send + Sync {
    fn capability(&self) -> ActionCapability {
        ActionCapability::Synchronous
    }

    /// Parameters this action understands
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, ActionError>;

    /// Re-check an asynchronous action given its previous provisional result
    async fn poll_update(
        &self,
        ctx: &mut ActionContext<'_>,
        previous: &ActionResult,
    ) -> Result<ActionOutcome, ActionError> {
        let _ = ctx;
        Ok(ActionOutcome::Completed(previous.clone()))
    }
}
