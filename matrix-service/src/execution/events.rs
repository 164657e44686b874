// Execution Events
// Progress reporting and event types for scheduler runs

use crate::model::{ActionStatus, RunVerdict, StepStatus, Verdict};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while a scheduler run progresses
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Scheduler passed its pre-flight checks and started
    SchedulerStarted { user: String, matrices: Vec<String> },

    /// Every matrix finished and global resources were released
    SchedulerCompleted {
        verdict: RunVerdict,
        duration: Duration,
    },

    MatrixStarted {
        matrix: String,
        total_steps: usize,
        total_actions: usize,
    },

    MatrixCompleted {
        matrix: String,
        verdict: Verdict,
        duration: Duration,
    },

    StepStarted {
        matrix: String,
        step: String,
        step_index: usize,
        total_actions: usize,
    },

    /// Step finished; asynchronous actions still pending count as not failed
    StepCompleted {
        matrix: String,
        step: String,
        status: StepStatus,
        duration: Duration,
    },

    /// Step was not run (disabled, earlier failure or stop request)
    StepSkipped {
        matrix: String,
        step: String,
        reason: String,
    },

    ActionStarted {
        matrix: String,
        step: String,
        action_id: String,
        action_type: String,
    },

    ActionCompleted {
        matrix: String,
        step: String,
        action_id: String,
        status: ActionStatus,
        comment: String,
        duration: Duration,
    },

    /// Asynchronous action registered for re-check
    ActionPending {
        matrix: String,
        step: String,
        action_id: String,
    },

    ActionSkipped {
        matrix: String,
        step: String,
        action_id: String,
        reason: String,
    },

    /// Scheduler is waiting for a resume
    Paused { matrix: String, reason: String },

    Resumed { matrix: String },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        matrix: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn matrix_started(matrix: impl Into<String>, total_steps: usize, total_actions: usize) -> Self {
        Self::MatrixStarted {
            matrix: matrix.into(),
            total_steps,
            total_actions,
        }
    }

    pub fn matrix_completed(matrix: impl Into<String>, verdict: Verdict, duration: Duration) -> Self {
        Self::MatrixCompleted {
            matrix: matrix.into(),
            verdict,
            duration,
        }
    }

    pub fn step_started(
        matrix: impl Into<String>,
        step: impl Into<String>,
        step_index: usize,
        total_actions: usize,
    ) -> Self {
        Self::StepStarted {
            matrix: matrix.into(),
            step: step.into(),
            step_index,
            total_actions,
        }
    }

    pub fn step_completed(
        matrix: impl Into<String>,
        step: impl Into<String>,
        status: StepStatus,
        duration: Duration,
    ) -> Self {
        Self::StepCompleted {
            matrix: matrix.into(),
            step: step.into(),
            status,
            duration,
        }
    }

    pub fn step_skipped(matrix: impl Into<String>, step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StepSkipped {
            matrix: matrix.into(),
            step: step.into(),
            reason: reason.into(),
        }
    }

    pub fn action_started(
        matrix: impl Into<String>,
        step: impl Into<String>,
        action_id: impl Into<String>,
        action_type: impl Into<String>,
    ) -> Self {
        Self::ActionStarted {
            matrix: matrix.into(),
            step: step.into(),
            action_id: action_id.into(),
            action_type: action_type.into(),
        }
    }

    /// Completion event built from a finished result
    pub fn action_completed(matrix: impl Into<String>, result: &crate::model::ActionResult) -> Self {
        Self::ActionCompleted {
            matrix: matrix.into(),
            step: result.step.clone(),
            action_id: result.action_id.clone(),
            status: result.status,
            comment: result.comment.clone(),
            duration: result.duration,
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, matrix: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            matrix,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, matrix: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            matrix,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, matrix: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            matrix,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
