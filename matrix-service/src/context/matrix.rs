// Matrix Context
// Per-matrix key-value store shared by the actions of one matrix run

use super::ContextError;

use std::any::{type_name, Any};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Key under which an action publishes the message it sent or received
pub fn response_key(action_id: &str) -> String {
    format!("{}.response", action_id)
}

/// Data one action leaves for the actions after it.
///
/// Typed values are write-once: a second `set` for the same key fails,
/// `overwrite` replaces explicitly. Output parameters are kept per action id
/// and back `@{id.param}` references.
#[derive(Default)]
pub struct MatrixContext {
    matrix: String,
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
    outputs: HashMap<String, BTreeMap<String, String>>,
}

impl MatrixContext {
    pub fn new(matrix: impl Into<String>) -> Self {
        Self {
            matrix: matrix.into(),
            ..Self::default()
        }
    }

    pub fn matrix(&self) -> &str {
        &self.matrix
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> Result<(), ContextError> {
        let key = key.into();
        if self.values.contains_key(&key) {
            return Err(ContextError::AlreadySet(key));
        }
        self.values.insert(key, Arc::new(value));
        Ok(())
    }

    pub fn overwrite<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>, ContextError> {
        let value = self
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| ContextError::NotFound(key.to_string()))?;
        value.downcast::<T>().map_err(|_| ContextError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Record the output parameters of an action, replacing earlier ones
    pub fn publish_outputs(&mut self, action_id: &str, outputs: &BTreeMap<String, String>) {
        self.outputs.insert(action_id.to_string(), outputs.clone());
    }

    pub fn outputs(&self, action_id: &str) -> Option<&BTreeMap<String, String>> {
        self.outputs.get(action_id)
    }

    pub fn output(&self, action_id: &str, param: &str) -> Option<&str> {
        self.outputs
            .get(action_id)
            .and_then(|o| o.get(param))
            .map(String::as_str)
    }
}

impl std::fmt::Debug for MatrixContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixContext")
            .field("matrix", &self.matrix)
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs)
            .finish()
    }
}
