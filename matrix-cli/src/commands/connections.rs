// Connections File
// Declares the simulated connections a local run can use

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use serde::Deserialize;

use matrix_service::{ExclusiveSettingRule, InMemoryConnectionRegistry, SimulatedConnection};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionsFile {
    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,

    /// Settings that must differ between connections of one type, as `type: setting`
    #[serde(default)]
    pub exclusive_settings: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_true")]
    pub running: bool,
    /// Deliver every sent message back to the connection's own inbox
    #[serde(default)]
    pub loopback: bool,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl ConnectionsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Cannot read connections file {}", path.display()))?;
        serde_yaml::from_str(&content).wrap_err_with(|| format!("Invalid connections file {}", path.display()))
    }

    pub fn registry(&self) -> Arc<InMemoryConnectionRegistry> {
        let registry = Arc::new(InMemoryConnectionRegistry::new());
        for entry in &self.connections {
            let mut connection = SimulatedConnection::new(&entry.name, &entry.type_name).with_loopback(entry.loopback);
            for (key, value) in &entry.settings {
                connection = connection.with_setting(key, value);
            }
            if !entry.running {
                connection = connection.stopped();
            }
            tracing::debug!(connection = %entry.name, kind = %entry.type_name, running = entry.running, "Declared connection");
            registry.register(Arc::new(connection));
        }
        registry
    }

    pub fn exclusive_rules(&self, registry: &Arc<InMemoryConnectionRegistry>) -> Vec<ExclusiveSettingRule> {
        self.exclusive_settings
            .iter()
            .map(|(type_name, setting)| ExclusiveSettingRule::new(type_name, setting, registry.clone()))
            .collect()
    }
}
