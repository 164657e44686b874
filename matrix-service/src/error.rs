// Service Errors
// Errors that cross the scheduler boundary

use crate::context::ContextError;
use crate::model::TeardownFailure;
use crate::parser::ParseError;

use thiserror::Error;

/// Errors returned by scheduler-level operations
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A matrix could not be parsed or registered
    #[error("Failed to load matrix: {}", .0.join("; "))]
    Load(Vec<String>),

    /// Pre-flight checks failed; every violation is listed
    #[error("Configuration error: {}", .0.join("; "))]
    Configuration(Vec<String>),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    /// One or more global resources failed to release
    #[error("Failed to release {} resource(s): {}", .0.len(), join_failures(.0))]
    Teardown(Vec<TeardownFailure>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report error: {0}")]
    Report(String),
}

impl ServiceError {
    pub fn load(message: impl Into<String>) -> Self {
        ServiceError::Load(vec![message.into()])
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ServiceError::Configuration(vec![message.into()])
    }

    /// Individual problems carried by load and configuration errors
    pub fn problems(&self) -> &[String] {
        match self {
            ServiceError::Load(problems) | ServiceError::Configuration(problems) => problems,
            _ => &[],
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ServiceError::Configuration(_))
    }

    pub fn is_load(&self) -> bool {
        matches!(self, ServiceError::Load(_))
    }
}

impl From<ParseError> for ServiceError {
    fn from(err: ParseError) -> Self {
        if err.problems.is_empty() {
            ServiceError::Load(vec![err.summary()])
        } else {
            ServiceError::Load(err.problems)
        }
    }
}

fn join_failures(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for scheduler-level operations
pub type ServiceResult<T> = Result<T, ServiceError>;
