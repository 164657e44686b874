// Matrix Model
// Matrices, steps, action declarations and the verdicts produced for them

pub mod matrix;
pub mod result;

pub use matrix::{ActionSpec, Matrix, MatrixState, Step, StepPolicy};
pub use result::{
    ActionResult, ActionStatus, FailReason, MatrixReport, RunReport, RunVerdict, StepOutcome,
    StepStatus, TeardownFailure, Verdict,
};

use serde::Serializer;
use std::time::Duration;

/// Serialize a duration as whole milliseconds
pub(crate) fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}
