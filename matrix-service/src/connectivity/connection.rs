// Connections
// Connection abstraction, registry and an in-process simulated connection

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A message as a flat set of named fields
pub type Message = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection '{0}' is not running")]
    NotRunning(String),

    #[error("Connection '{0}' does not support messaging")]
    NoMessaging(String),

    #[error("Connection '{name}' failed: {message}")]
    Failed { name: String, message: String },
}

/// Sends and receives messages over a connection
pub trait MessageChannel: Send + Sync {
    fn send(&self, message: Message) -> Result<(), ConnectionError>;

    /// Every message received and not yet taken, oldest first
    fn received(&self) -> Vec<Message>;

    /// Remove and return the oldest received message accepted by `matches`
    fn take_first(&self, matches: &dyn Fn(&Message) -> bool) -> Option<Message>;
}

/// A named, externally managed connection
pub trait Connection: Send + Sync {
    fn name(&self) -> &str;

    /// Connection type, used to scope validation rules
    fn type_name(&self) -> &str;

    fn is_running(&self) -> bool;

    /// Named configuration setting, if the connection has it
    fn setting(&self, _key: &str) -> Option<String> {
        None
    }

    fn message_channel(&self) -> Option<&dyn MessageChannel> {
        None
    }
}

/// Lookup of connections by name
pub trait ConnectionRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<dyn Connection>>;

    fn all(&self) -> Vec<Arc<dyn Connection>>;
}

/// Registry backed by a map held in memory
#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    connections: RwLock<BTreeMap<String, Arc<dyn Connection>>>,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Arc<dyn Connection>) {
        self.connections
            .write()
            .insert(connection.name().to_string(), connection);
    }

    pub fn with(self, connection: Arc<dyn Connection>) -> Self {
        self.register(connection);
        self
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn Connection>> {
        self.connections.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl ConnectionRegistry for InMemoryConnectionRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Connection>> {
        self.connections.read().get(name).cloned()
    }

    fn all(&self) -> Vec<Arc<dyn Connection>> {
        self.connections.read().values().cloned().collect()
    }
}

/// In-process connection with an inbox.
///
/// With loopback enabled every sent message is also delivered to the inbox,
/// which lets a matrix send and then receive its own traffic.
pub struct SimulatedConnection {
    name: String,
    type_name: String,
    running: AtomicBool,
    loopback: bool,
    settings: BTreeMap<String, String>,
    sent: Mutex<Vec<Message>>,
    inbox: Mutex<Vec<Message>>,
}

impl SimulatedConnection {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            running: AtomicBool::new(true),
            loopback: false,
            settings: BTreeMap::new(),
            sent: Mutex::new(Vec::new()),
            inbox: Mutex::new(Vec::new()),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_loopback(mut self, loopback: bool) -> Self {
        self.loopback = loopback;
        self
    }

    pub fn stopped(self) -> Self {
        self.running.store(false, Ordering::SeqCst);
        self
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Put a message in the inbox as if the remote side had sent it
    pub fn deliver(&self, message: Message) {
        self.inbox.lock().push(message);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }
}

impl MessageChannel for SimulatedConnection {
    fn send(&self, message: Message) -> Result<(), ConnectionError> {
        if !self.is_running() {
            return Err(ConnectionError::NotRunning(self.name.clone()));
        }
        if self.loopback {
            self.inbox.lock().push(message.clone());
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn received(&self) -> Vec<Message> {
        self.inbox.lock().clone()
    }

    fn take_first(&self, matches: &dyn Fn(&Message) -> bool) -> Option<Message> {
        let mut inbox = self.inbox.lock();
        let position = inbox.iter().position(|m| matches(m))?;
        Some(inbox.remove(position))
    }
}

impl Connection for SimulatedConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn setting(&self, key: &str) -> Option<String> {
        self.settings.get(key).cloned()
    }

    fn message_channel(&self) -> Option<&dyn MessageChannel> {
        Some(self)
    }
}
