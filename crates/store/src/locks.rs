//! Name-keyed lock table: single writer / multiple readers per file name.
//!
//! Uploads take the write half briefly to publish the target name,
//! downloads hold the read half while streaming, so publication and
//! concurrent publications to one name serialize and never interleave
//! with an active read. Locks for distinct names are independent. The
//! table holds weak references and prunes dead entries on access, so it
//! never grows with the file count.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::RwLock;

pub(crate) struct NameLocks {
    inner: Mutex<HashMap<String, Weak<RwLock<()>>>>,
}

impl NameLocks {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the lock for `name`, creating it if absent.
    pub(crate) fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        let mut map = self.inner.lock().unwrap();
        map.retain(|_, weak| weak.strong_count() > 0);

        if let Some(lock) = map.get(name).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(RwLock::new(()));
        map.insert(name.to_string(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    pub(crate) fn live_entries(&self) -> usize {
        let mut map = self.inner.lock().unwrap();
        map.retain(|_, weak| weak.strong_count() > 0);
        map.len()
    }
}
