//! Periodically refreshed decision points.
//!
//! # Lifecycle
//!
//! 1. Create with `PolicyCache::new(store, options)`; the first snapshot is
//!    built eagerly and a failure is returned to the caller.
//! 2. Call `start()` to spawn the refresh worker.
//! 3. Use `current()` to take a reference to the live [`PdpSet`]. A request
//!    keeps using the set it took even if a refresh swaps in a newer one.
//! 4. Call `stop()` to stop the worker and join its thread.
//!
//! A failed refresh keeps the previous set and is logged.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{PdpError, Result};
use crate::snapshot::PdpSet;
use crate::store::PolicyStore;

/// Default time between refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for [`PolicyCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub refresh_interval: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

struct Worker {
    stop: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Holds the live [`PdpSet`] and swaps in rebuilt sets on a background thread.
pub struct PolicyCache {
    store: Arc<dyn PolicyStore>,
    current: Arc<RwLock<Arc<PdpSet>>>,
    options: CacheOptions,
    worker: Mutex<Option<Worker>>,
}

impl PolicyCache {
    /// Builds the first snapshot from `store`.
    pub fn new(store: Arc<dyn PolicyStore>, options: CacheOptions) -> Result<Self> {
        let initial = PdpSet::load(store.as_ref())?;
        Ok(Self {
            store,
            current: Arc::new(RwLock::new(Arc::new(initial))),
            options,
            worker: Mutex::new(None),
        })
    }

    /// Returns the live decision points.
    pub fn current(&self) -> Arc<PdpSet> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Rebuilds the snapshot now. On failure the live set is unchanged.
    pub fn refresh(&self) -> Result<()> {
        rebuild(self.store.as_ref(), &self.current)
    }

    pub fn is_running(&self) -> bool {
        self.worker().is_some()
    }

    fn worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the refresh worker. Calling `start` on a running cache is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker();
        if worker.is_some() {
            return Ok(());
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let store = Arc::clone(&self.store);
        let current = Arc::clone(&self.current);
        let interval = self.options.refresh_interval;

        let handle = thread::Builder::new()
            .name("keystone-policy-cache".to_string())
            .spawn(move || Self::worker_loop(store.as_ref(), &current, &stopped, interval))
            .map_err(PdpError::CacheWorkerSpawn)?;

        info!(
            refresh_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Policy cache worker started"
        );
        *worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// The refresh loop.
    ///
    /// Exits when a stop message arrives or the sender is dropped.
    fn worker_loop(
        store: &dyn PolicyStore,
        current: &RwLock<Arc<PdpSet>>,
        stopped: &mpsc::Receiver<()>,
        interval: Duration,
    ) {
        loop {
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(error) = rebuild(store, current) {
                        warn!(%error, "Policy refresh failed; keeping previous snapshot");
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Stops the worker and waits for it to exit. Safe to call repeatedly.
    pub fn stop(&self) {
        let taken = self.worker().take();
        if let Some(worker) = taken {
            let _ = worker.stop.send(());
            let _ = worker.handle.join();
            info!("Policy cache worker stopped");
        }
    }
}

impl Drop for PolicyCache {
    fn drop(&mut self) {
        self.stop();
    }
}

fn rebuild(store: &dyn PolicyStore, current: &RwLock<Arc<PdpSet>>) -> Result<()> {
    let next = Arc::new(PdpSet::load(store)?);
    let mut guard = current.write().unwrap_or_else(PoisonError::into_inner);
    *guard = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::store::{InMemoryPolicyStore, PolicyDocument, StoreError};
    use keystone_types::{
        AttributeDefinition, AttributeRuleType, Obligation, RegisteredResource, SubjectMapping,
    };

    /// A store whose policy and availability can change between refreshes.
    #[derive(Default)]
    struct SwitchableStore {
        document: Mutex<PolicyDocument>,
        failing: AtomicBool,
    }

    impl SwitchableStore {
        fn with_values(values: &[&str]) -> Self {
            let store = Self::default();
            store.set_values(values);
            store
        }

        fn set_values(&self, values: &[&str]) {
            let mut doc = self.document.lock().unwrap();
            doc.attributes = vec![AttributeDefinition::new(
                "example.com",
                "level",
                AttributeRuleType::AnyOf,
                values,
            )];
        }

        fn check(&self) -> std::result::Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl PolicyStore for SwitchableStore {
        fn list_attributes(&self) -> std::result::Result<Vec<AttributeDefinition>, StoreError> {
            self.check()?;
            Ok(self.document.lock().unwrap().attributes.clone())
        }

        fn list_subject_mappings(&self) -> std::result::Result<Vec<SubjectMapping>, StoreError> {
            Ok(Vec::new())
        }

        fn list_registered_resources(
            &self,
        ) -> std::result::Result<Vec<RegisteredResource>, StoreError> {
            Ok(Vec::new())
        }

        fn list_obligations(&self) -> std::result::Result<Vec<Obligation>, StoreError> {
            Ok(Vec::new())
        }

        fn match_subject_mappings(
            &self,
            _selectors: &[String],
        ) -> std::result::Result<Vec<SubjectMapping>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn value_count(cache: &PolicyCache) -> usize {
        cache.current().entitlements.attributes().len()
    }

    #[test]
    fn initial_build_failure_is_returned() {
        let store = Arc::new(InMemoryPolicyStore::default());
        assert!(matches!(
            PolicyCache::new(store, CacheOptions::default()),
            Err(PdpError::MissingRequiredPolicy { .. })
        ));
    }

    #[test]
    fn refresh_swaps_snapshot() {
        let store = Arc::new(SwitchableStore::with_values(&["a"]));
        let cache = PolicyCache::new(Arc::clone(&store) as Arc<dyn PolicyStore>, CacheOptions::default()).unwrap();
        let before = cache.current();

        store.set_values(&["a", "b"]);
        cache.refresh().unwrap();

        assert_eq!(value_count(&cache), 2);
        // A reference taken before the refresh keeps its snapshot.
        assert_eq!(before.entitlements.attributes().len(), 1);
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let store = Arc::new(SwitchableStore::with_values(&["a"]));
        let cache = PolicyCache::new(Arc::clone(&store) as Arc<dyn PolicyStore>, CacheOptions::default()).unwrap();

        store.failing.store(true, Ordering::SeqCst);
        assert!(matches!(cache.refresh(), Err(PdpError::FailedToFetchAttributes(_))));
        assert_eq!(value_count(&cache), 1);
    }

    #[test]
    fn worker_refreshes_in_background() {
        let store = Arc::new(SwitchableStore::with_values(&["a"]));
        let cache = PolicyCache::new(
            Arc::clone(&store) as Arc<dyn PolicyStore>,
            CacheOptions {
                refresh_interval: Duration::from_millis(10),
            },
        )
        .unwrap();
        cache.start().unwrap();
        assert!(cache.is_running());

        store.set_values(&["a", "b", "c"]);
        let mut refreshed = false;
        for _ in 0..200 {
            if value_count(&cache) == 3 {
                refreshed = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cache.stop();

        assert!(refreshed);
        assert!(!cache.is_running());
    }

    #[test]
    fn stop_is_idempotent() {
        let store = Arc::new(SwitchableStore::with_values(&["a"]));
        let cache = PolicyCache::new(store, CacheOptions::default()).unwrap();
        cache.start().unwrap();
        cache.start().unwrap();
        cache.stop();
        cache.stop();
        assert!(!cache.is_running());
    }
}
