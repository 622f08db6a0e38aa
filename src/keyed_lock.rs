//! Per-key async locks so concurrent ingestion of the same document is
//! serialized while different documents proceed in parallel.
//!
//! The registry refcounts each key's mutex and evicts the entry when the
//! last guard drops, so the map never grows with the set of hashes seen
//! over a process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, LockEntry>>>,
}

struct LockEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    refs: usize,
}

pub struct KeyedLockGuard {
    _guard: OwnedMutexGuard<()>,
    registry: Arc<Mutex<HashMap<String, LockEntry>>>,
    key: String,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting if another task holds it.
    pub async fn acquire(&self, key: &str) -> KeyedLockGuard {
        let lock = {
            let mut map = lock_map(&self.inner);
            let entry = map.entry(key.to_string()).or_insert_with(|| LockEntry {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            Arc::clone(&entry.lock)
        };
        let guard = lock.lock_owned().await;
        KeyedLockGuard {
            _guard: guard,
            registry: Arc::clone(&self.inner),
            key: key.to_string(),
        }
    }

    #[cfg(test)]
    fn active_keys(&self) -> usize {
        lock_map(&self.inner).len()
    }
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        let mut map = lock_map(&self.registry);
        if let Some(entry) = map.get_mut(&self.key) {
            entry.refs -= 1;
            if entry.refs == 0 {
                map.remove(&self.key);
            }
        }
    }
}

fn lock_map(
    inner: &Arc<Mutex<HashMap<String, LockEntry>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, LockEntry>> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
