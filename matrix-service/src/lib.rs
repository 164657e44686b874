// Matrix Service Library
// Scheduler and execution engine for matrix-driven test automation

pub mod action;
pub mod compare;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod execution;
pub mod logging;
pub mod model;
pub mod parser;
pub mod report;
pub mod scheduler;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

pub use model::{
    ActionResult, ActionSpec, ActionStatus, FailReason, Matrix, MatrixReport, MatrixState, RunReport, RunVerdict,
    Step, StepOutcome, StepPolicy, StepStatus, TeardownFailure, Verdict,
};

pub use parser::{MatrixSource, MatrixValidator, ParseError, ParseErrorKind, ParseResult, YamlMatrixSource};

pub use action::{
    Action, ActionCapability, ActionContext, ActionError, ActionOutcome, ActionRegistry, ActionRunner, InputParams,
    ParamSpec, RecheckPolicy,
};

pub use context::{Closeable, ContextError, GlobalContext, MatrixContext};

pub use connectivity::{
    Connection, ConnectionError, ConnectionRegistry, ConnectionRunningRule, ConnectionValidationRule,
    ExclusiveSettingRule, InMemoryConnectionRegistry, MessageChannel, ReadinessGate, SimulatedConnection,
};

pub use execution::{progress_channel, ExecutionEvent, MatrixExecutor, ProgressReceiver, ProgressSender, RunControl};

pub use compare::{ComparisonService, FieldComparator};
pub use config::{ConfigError, SchedulerConfig};
pub use logging::init_logging;
pub use report::{JsonFileSink, MemorySink, ReportFormat, ReportSink, RunReporter};
pub use scheduler::{Scheduler, SchedulerState};
