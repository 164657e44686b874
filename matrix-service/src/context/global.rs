// Global Context
// Resources shared by every matrix of a run and released once at teardown

use super::ContextError;
use crate::model::TeardownFailure;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use std::any::{type_name, Any};
use std::future::Future;
use std::sync::Arc;

/// Error returned by a resource factory or by `Closeable::close`
pub type CloseError = Box<dyn std::error::Error + Send + Sync>;

/// A resource that must be released when the run ends
pub trait Closeable: Send + Sync {
    fn close(&self) -> Result<(), CloseError>;
}

type SharedValue = Arc<dyn Any + Send + Sync>;

/// Resources created at most once per key, in creation order
#[derive(Default)]
struct Created {
    entries: Vec<(String, Arc<dyn Closeable>)>,
    released: bool,
}

/// Shared state for one scheduler run.
///
/// Plain values are set and read by key. Closeable resources are created
/// lazily through `get_or_create_closeable`; concurrent callers for the same
/// key observe a single instance, and `release_all` closes every instance in
/// reverse creation order.
pub struct GlobalContext {
    user: String,
    started_at: DateTime<Utc>,
    values: DashMap<String, SharedValue>,
    slots: DashMap<String, Arc<OnceCell<SharedValue>>>,
    created: Mutex<Created>,
}

impl GlobalContext {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            started_at: Utc::now(),
            values: DashMap::new(),
            slots: DashMap::new(),
            created: Mutex::new(Created::default()),
        }
    }

    /// User who started the run
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Store a plain value, replacing any previous one
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>, ContextError> {
        let value = self
            .values
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ContextError::NotFound(key.to_string()))?;
        value.downcast::<T>().map_err(|_| ContextError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key) || self.slots.get(key).is_some_and(|slot| slot.initialized())
    }

    /// Return the resource stored under `key`, creating it with `factory` on first use.
    ///
    /// The factory runs at most once per key even when many matrices race on
    /// the same key. Losers await the per-key cell without holding a worker
    /// thread and receive the winner's instance. A failed factory leaves the
    /// key empty so a later call can try again.
    pub async fn get_or_create_closeable<T, F, Fut>(&self, key: &str, factory: F) -> Result<Arc<T>, ContextError>
    where
        T: Closeable + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CloseError>>,
    {
        // Clone the cell out so the map shard is not locked while the factory runs
        let slot = self.slots.entry(key.to_string()).or_default().clone();

        let value = slot
            .get_or_try_init(|| async {
                if self.is_released() {
                    return Err(ContextError::Released(key.to_string()));
                }

                let resource = Arc::new(factory().await.map_err(|e| ContextError::Factory {
                    key: key.to_string(),
                    message: e.to_string(),
                })?);

                let released = {
                    let mut created = self.created.lock();
                    if !created.released {
                        created
                            .entries
                            .push((key.to_string(), resource.clone() as Arc<dyn Closeable>));
                    }
                    created.released
                };
                if released {
                    // Teardown started while the factory was running
                    if let Err(e) = resource.close() {
                        tracing::warn!(key, error = %e, "Failed to close resource created during teardown");
                    }
                    return Err(ContextError::Released(key.to_string()));
                }

                tracing::debug!(key, "Created global resource");
                Ok::<SharedValue, ContextError>(resource)
            })
            .await?;

        value.clone().downcast::<T>().map_err(|_| ContextError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
        })
    }

    /// Number of closeable resources currently held
    pub fn resource_count(&self) -> usize {
        self.created.lock().entries.len()
    }

    pub fn is_released(&self) -> bool {
        self.created.lock().released
    }

    /// Close every resource in reverse creation order.
    ///
    /// All resources are attempted; failures are collected, never raised early.
    /// Later calls release nothing and return no failures.
    pub fn release_all(&self) -> Vec<TeardownFailure> {
        let entries = {
            let mut created = self.created.lock();
            created.released = true;
            std::mem::take(&mut created.entries)
        };

        let mut failures = Vec::new();
        for (key, resource) in entries.into_iter().rev() {
            match resource.close() {
                Ok(()) => tracing::debug!(key = %key, "Released global resource"),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to release global resource");
                    failures.push(TeardownFailure {
                        key,
                        message: e.to_string(),
                    });
                }
            }
        }

        self.slots.clear();
        self.values.clear();
        failures
    }
}

impl std::fmt::Debug for GlobalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalContext")
            .field("user", &self.user)
            .field("started_at", &self.started_at)
            .field("values", &self.values.len())
            .field("resources", &self.resource_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Recorder {
        name: String,
        closed: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Closeable for Recorder {
        fn close(&self) -> Result<(), CloseError> {
            self.closed.lock().push(self.name.clone());
            if self.fail {
                Err(format!("{} refused to close", self.name).into())
            } else {
                Ok(())
            }
        }
    }

    fn recorder(name: &str, closed: &Arc<Mutex<Vec<String>>>, fail: bool) -> Recorder {
        Recorder {
            name: name.to_string(),
            closed: closed.clone(),
            fail,
        }
    }

    #[test]
    fn test_plain_values() {
        let ctx = GlobalContext::new("admin");
        ctx.set("limit", 10u32);
        assert_eq!(*ctx.get::<u32>("limit").unwrap(), 10);
        assert!(matches!(
            ctx.get::<String>("limit"),
            Err(ContextError::TypeMismatch { .. })
        ));
        assert!(matches!(ctx.get::<u32>("missing"), Err(ContextError::NotFound(_))));
        assert_eq!(ctx.user(), "admin");
    }

    #[tokio::test]
    async fn test_factory_runs_once_per_key() {
        let ctx = GlobalContext::new("admin");
        let closed = Arc::new(Mutex::new(Vec::new()));
        let calls = AtomicUsize::new(0);

        let first = ctx
            .get_or_create_closeable("router", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(recorder("router", &closed, false))
            })
            .await
            .unwrap();
        let second = ctx
            .get_or_create_closeable("router", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(recorder("other", &closed, false))
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.resource_count(), 1);
        assert!(ctx.contains("router"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_creation_yields_single_instance() {
        let ctx = Arc::new(GlobalContext::new("admin"));
        let closed = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        // More racers than worker threads: waiting callers must not hold a thread
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = ctx.clone();
                let closed = closed.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    ctx.get_or_create_closeable("pool", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(recorder("pool", &closed, false))
                    })
                    .await
                    .unwrap()
                })
            })
            .collect();

        let mut instances: Vec<Arc<Recorder>> = Vec::new();
        for handle in handles {
            instances.push(handle.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));

        assert!(ctx.release_all().is_empty());
        assert_eq!(*closed.lock(), vec!["pool".to_string()]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_slow_factory_does_not_block_other_tasks() {
        let ctx = Arc::new(GlobalContext::new("admin"));
        let closed = Arc::new(Mutex::new(Vec::new()));

        let creator = {
            let ctx = ctx.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                ctx.get_or_create_closeable("slow", || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(recorder("slow", &closed, false))
                })
                .await
                .map(|_| ())
            })
        };
        tokio::task::yield_now().await;
        let waiter = {
            let ctx = ctx.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                ctx.get_or_create_closeable("slow", || async { Ok(recorder("second", &closed, false)) })
                    .await
                    .map(|r| r.name.clone())
            })
        };

        // On a single thread this task only runs again if neither caller holds the thread
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!creator.is_finished());
        assert!(!waiter.is_finished());

        creator.await.unwrap().unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), "slow");
        assert_eq!(ctx.resource_count(), 1);
    }

    #[tokio::test]
    async fn test_release_order_and_failure_collection() {
        let ctx = GlobalContext::new("admin");
        let closed = Arc::new(Mutex::new(Vec::new()));
        for (name, fail) in [("a", false), ("b", true), ("c", false)] {
            ctx.get_or_create_closeable(name, || async { Ok(recorder(name, &closed, fail)) })
                .await
                .unwrap();
        }

        let failures = ctx.release_all();
        assert_eq!(*closed.lock(), vec!["c", "b", "a"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "b");
        assert!(failures[0].message.contains("refused"));

        // Second release is a no-op
        assert!(ctx.release_all().is_empty());
        assert_eq!(closed.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_creation_after_release_is_rejected() {
        let ctx = GlobalContext::new("admin");
        let closed = Arc::new(Mutex::new(Vec::new()));
        ctx.release_all();
        let result = ctx
            .get_or_create_closeable("late", || async { Ok(recorder("late", &closed, false)) })
            .await;
        assert!(matches!(result, Err(ContextError::Released(_))));
        assert!(closed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_factory_error_leaves_key_empty() {
        let ctx = GlobalContext::new("admin");
        let result: Result<Arc<Recorder>, _> = ctx
            .get_or_create_closeable("db", || async { Err("connection refused".into()) })
            .await;
        match result {
            Err(ContextError::Factory { key, message }) => {
                assert_eq!(key, "db");
                assert!(message.contains("refused"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(ctx.resource_count(), 0);
        assert!(!ctx.contains("db"));

        let closed = Arc::new(Mutex::new(Vec::new()));
        let retried = ctx
            .get_or_create_closeable("db", || async { Ok(recorder("db", &closed, false)) })
            .await;
        assert!(retried.is_ok());
    }
}
