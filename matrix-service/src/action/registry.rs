// Action Registry
// Maps action type names to factories

use crate::action::builtin;
use crate::action::Action;
use crate::model::ActionSpec;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds an action instance for one declaration
pub type ActionFactory = Arc<dyn Fn(&ActionSpec) -> Arc<dyn Action> + Send + Sync>;

/// Registry of known action types
#[derive(Clone, Default)]
pub struct ActionRegistry {
    factories: BTreeMap<String, ActionFactory>,
}

impl ActionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in action types
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, action_type: impl Into<String>, factory: F)
    where
        F: Fn(&ActionSpec) -> Arc<dyn Action> + Send + Sync + 'static,
    {
        self.factories.insert(action_type.into(), Arc::new(factory));
    }

    /// Register a stateless action shared by every declaration
    pub fn register_shared(&mut self, action_type: impl Into<String>, action: Arc<dyn Action>) {
        self.register(action_type, move |_| action.clone());
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.factories.contains_key(action_type)
    }

    pub fn create(&self, spec: &ActionSpec) -> Option<Arc<dyn Action>> {
        self.factories.get(&spec.action_type).map(|factory| factory(spec))
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
