// Context Store
// Run-scoped shared resources and matrix-scoped cross-action data

pub mod global;
pub mod matrix;

pub use global::{CloseError, Closeable, GlobalContext};
pub use matrix::{response_key, MatrixContext};

use thiserror::Error;

/// Errors raised by context lookups and resource creation
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Context key '{0}' is already set")]
    AlreadySet(String),

    #[error("Context key '{0}' is not set")]
    NotFound(String),

    #[error("Context key '{key}' does not hold a value of type {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Failed to create resource '{key}': {message}")]
    Factory { key: String, message: String },

    #[error("Global context has already been released, cannot create '{0}'")]
    Released(String),
}
