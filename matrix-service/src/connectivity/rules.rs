// Connection Validation Rules
// Pluggable readiness checks applied to every connection a run needs

use crate::connectivity::connection::{Connection, ConnectionRegistry};

use std::collections::BTreeSet;
use std::sync::Arc;

/// A readiness check for connections
pub trait ConnectionValidationRule: Send + Sync {
    fn name(&self) -> &str;

    fn is_applicable(&self, connection: &dyn Connection) -> bool;

    /// Description of the violation, or `None` when the connection is ready
    fn check(&self, connection: &dyn Connection) -> Option<String>;
}

/// The connection must be running
#[derive(Debug, Clone, Default)]
pub struct ConnectionRunningRule {
    types: BTreeSet<String>,
}

impl ConnectionRunningRule {
    /// Apply to every connection
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply only to connections of the given types
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }
}

impl ConnectionValidationRule for ConnectionRunningRule {
    fn name(&self) -> &str {
        "connection-running"
    }

    fn is_applicable(&self, connection: &dyn Connection) -> bool {
        self.types.is_empty() || self.types.contains(connection.type_name())
    }

    fn check(&self, connection: &dyn Connection) -> Option<String> {
        if connection.is_running() {
            None
        } else {
            Some(format!("Connection '{}' is not running", connection.name()))
        }
    }
}

/// No two running connections of one type may share the same value for a setting,
/// e.g. two consumers reading the same queue
pub struct ExclusiveSettingRule {
    connection_type: String,
    setting: String,
    registry: Arc<dyn ConnectionRegistry>,
}

impl ExclusiveSettingRule {
    pub fn new(
        connection_type: impl Into<String>,
        setting: impl Into<String>,
        registry: Arc<dyn ConnectionRegistry>,
    ) -> Self {
        Self {
            connection_type: connection_type.into(),
            setting: setting.into(),
            registry,
        }
    }
}

impl ConnectionValidationRule for ExclusiveSettingRule {
    fn name(&self) -> &str {
        "exclusive-setting"
    }

    fn is_applicable(&self, connection: &dyn Connection) -> bool {
        connection.type_name() == self.connection_type && connection.setting(&self.setting).is_some()
    }

    fn check(&self, connection: &dyn Connection) -> Option<String> {
        let value = connection.setting(&self.setting)?;
        let clashing: Vec<String> = self
            .registry
            .all()
            .into_iter()
            .filter(|other| {
                other.name() != connection.name()
                    && other.type_name() == self.connection_type
                    && other.is_running()
                    && other.setting(&self.setting).as_deref() == Some(value.as_str())
            })
            .map(|other| format!("'{}'", other.name()))
            .collect();

        if clashing.is_empty() {
            None
        } else {
            Some(format!(
                "Connection '{}': {} '{}' is already used by running connection(s) {}",
                connection.name(),
                self.setting,
                value,
                clashing.join(", ")
            ))
        }
    }
}
