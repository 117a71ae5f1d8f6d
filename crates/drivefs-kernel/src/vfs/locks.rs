//! Per-path operation queue.
//!
//! The backing stores have no transactions, so two mutations racing on the
//! same path (say a write and a delete) could leave a table entry pointing
//! at a removed blob. Mutations take the path's lock first; waiters queue in
//! FIFO order behind it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily created async mutex per path.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Guard over one or more path locks. Unused lock entries are pruned on drop.
pub struct PathGuard<'a> {
    owner: &'a PathLocks,
    held: Vec<(String, Option<OwnedMutexGuard<()>>)>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a single path.
    pub async fn lock(&self, path: &str) -> PathGuard<'_> {
        self.lock_many(&[path]).await
    }

    /// Lock several paths. Paths are deduplicated and acquired in sorted order,
    /// so two callers locking the same pair cannot deadlock.
    pub async fn lock_many(&self, paths: &[&str]) -> PathGuard<'_> {
        let mut keys: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        keys.sort();
        keys.dedup();

        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            let mutex = self
                .locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let guard = mutex.lock_owned().await;
            held.push((key, Some(guard)));
        }
        PathGuard { owner: self, held }
    }

    /// Number of paths with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        for (key, guard) in self.held.iter_mut().rev() {
            drop(guard.take());
            // Only the map's own handle left: nobody holds or waits on it.
            self.owner
                .locks
                .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entries_pruned() {
        let locks = PathLocks::new();
        {
            let _g = locks.lock_many(&["/b", "/a", "/a"]).await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_same_path_serializes() {
        let locks = Arc::new(PathLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _g = locks.lock("/same").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }
}
