//! Per-probe write serialization.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per probe id.
///
/// Writes for the same id queue behind each other; writes for different ids
/// only share a dashmap shard for the instant it takes to clone the `Arc`.
/// An entry lives only while some caller holds or waits for it.
#[derive(Debug, Default)]
pub struct ProbeLocks {
    inner: DashMap<String, Arc<Mutex<()>>>,
}

impl ProbeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `probe_id`.
    pub async fn lock(&self, probe_id: &str) -> ProbeLockGuard<'_> {
        // Declared before the wait so a cancelled waiter still prunes the entry.
        let mut guard = ProbeLockGuard {
            locks: &self.inner,
            probe_id: probe_id.to_string(),
            guard: None,
        };
        // The shard guard is released at the end of this statement, before awaiting.
        let mutex = Arc::clone(self.inner.entry(probe_id.to_string()).or_default().value());
        guard.guard = Some(mutex.lock_owned().await);
        guard
    }

    /// Number of ids currently locked or waited on.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Exclusive access to one probe id. Dropping it releases the lock and
/// removes the map entry once nobody else references it.
#[derive(Debug)]
pub struct ProbeLockGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    probe_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ProbeLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Clones are only taken under the shard lock, so a count of one here
        // means no other caller holds or waits for this mutex.
        self.locks
            .remove_if(&self.probe_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
