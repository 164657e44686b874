// Matrix Scope
// Mutable state owned by one running matrix

use crate::action::PendingAction;
use crate::context::MatrixContext;
use crate::execution::log::MatrixResultLog;

use std::sync::Arc;

/// Context, result log and pending re-checks of one matrix run
pub struct MatrixScope {
    pub matrix: String,
    pub context: MatrixContext,
    pub log: Arc<MatrixResultLog>,
    pub pending: Vec<PendingAction>,
}

impl MatrixScope {
    pub fn new(matrix: impl Into<String>, log: Arc<MatrixResultLog>) -> Self {
        let matrix = matrix.into();
        Self {
            context: MatrixContext::new(matrix.clone()),
            matrix,
            log,
            pending: Vec::new(),
        }
    }

    /// Remove and return the pending actions selected by `filter`
    pub fn take_pending<F>(&mut self, filter: F) -> Vec<PendingAction>
    where
        F: Fn(&PendingAction) -> bool,
    {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| filter(p));
        self.pending = kept;
        taken
    }
}
