// Result Log
// Append-only record of action results for one matrix run

use crate::model::{ActionResult, ActionStatus};

use parking_lot::RwLock;

use std::collections::HashMap;

#[derive(Default)]
struct Slots {
    results: Vec<ActionResult>,
    index: HashMap<String, usize>,
}

/// Results in the order actions first produced them.
///
/// Each action id owns exactly one slot: a re-check replaces the slot
/// instead of appending a second result.
#[derive(Default)]
pub struct MatrixResultLog {
    slots: RwLock<Slots>,
}

impl MatrixResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new result or replace the slot owned by the same action
    pub fn record(&self, result: ActionResult) {
        let mut slots = self.slots.write();
        match slots.index.get(&result.action_id).copied() {
            Some(position) => slots.results[position] = result,
            None => {
                let position = slots.results.len();
                slots.index.insert(result.action_id.clone(), position);
                slots.results.push(result);
            }
        }
    }

    pub fn get(&self, action_id: &str) -> Option<ActionResult> {
        let slots = self.slots.read();
        slots
            .index
            .get(action_id)
            .map(|&position| slots.results[position].clone())
    }

    pub fn snapshot(&self) -> Vec<ActionResult> {
        self.slots.read().results.clone()
    }

    /// Results belonging to one step, in execution order
    pub fn for_step(&self, step: &str) -> Vec<ActionResult> {
        self.slots
            .read()
            .results
            .iter()
            .filter(|r| r.step == step)
            .cloned()
            .collect()
    }

    pub fn count(&self, status: ActionStatus) -> usize {
        self.slots
            .read()
            .results
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.slots.read().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut slots = self.slots.write();
        slots.results.clear();
        slots.index.clear();
    }
}
