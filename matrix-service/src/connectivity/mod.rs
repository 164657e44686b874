// Connectivity
// Named connections, their registry and the readiness gate run before a scheduler starts

pub mod connection;
pub mod gate;
pub mod rules;

pub use connection::{
    Connection, ConnectionError, ConnectionRegistry, InMemoryConnectionRegistry, Message, MessageChannel,
    SimulatedConnection,
};
pub use gate::ReadinessGate;
pub use rules::{ConnectionRunningRule, ConnectionValidationRule, ExclusiveSettingRule};
