// Execution Engine Module
// Matrix and step orchestration, run control, result logging and progress events

pub mod control;
pub mod events;
pub mod log;
pub mod matrix;
pub mod scope;
pub mod step;

// Re-export key types
pub use control::RunControl;
pub use events::{progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use log::MatrixResultLog;
pub use matrix::MatrixExecutor;
pub use scope::MatrixScope;
pub use step::{StepExecutor, StepRun};
