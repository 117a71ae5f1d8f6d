//! Driver lifecycle: `Unmounted → Initializing → Ready → Unmounting → Closed`.
//!
//! Every driver embeds a [`Lifecycle`]. Operations enter through
//! [`Lifecycle::enter`], which checks the state and holds a read guard on the
//! operations gate; `uninit` takes the write side so it only proceeds once
//! in-flight operations have drained.

use parking_lot::Mutex;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::error::{FsError, FsResult};

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed, `init()` not called yet.
    Unmounted,
    Initializing,
    Ready,
    Unmounting,
    /// Terminal state after `uninit()`.
    Closed,
}

/// State machine plus operations gate shared by all drivers.
#[derive(Debug)]
pub struct Lifecycle {
    prefix: String,
    state: Mutex<DriverState>,
    gate: RwLock<()>,
}

/// Held for the duration of one operation.
pub type OpGuard<'a> = RwLockReadGuard<'a, ()>;

impl Lifecycle {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            state: Mutex::new(DriverState::Unmounted),
            gate: RwLock::new(()),
        }
    }

    pub fn state(&self) -> DriverState {
        *self.state.lock()
    }

    /// Fail unless the driver is `Ready`.
    pub fn check(&self) -> FsResult<()> {
        match self.state() {
            DriverState::Ready => Ok(()),
            DriverState::Unmounted | DriverState::Initializing => {
                Err(FsError::not_ready(&self.prefix))
            }
            DriverState::Unmounting | DriverState::Closed => Err(FsError::closed(&self.prefix)),
        }
    }

    /// Enter an asynchronous operation.
    ///
    /// The state is re-checked after the gate is acquired, so an operation
    /// that queued behind `uninit` observes `Closed`.
    pub async fn enter(&self) -> FsResult<OpGuard<'_>> {
        self.check()?;
        let guard = self.gate.read().await;
        self.check()?;
        Ok(guard)
    }

    /// Move to `Initializing`.
    ///
    /// Returns `Ok(false)` when the driver is already `Ready`, so a repeated
    /// `init()` is a no-op rather than a second load.
    pub fn begin_init(&self) -> FsResult<bool> {
        let mut state = self.state.lock();
        match *state {
            DriverState::Unmounted => {
                *state = DriverState::Initializing;
                Ok(true)
            }
            DriverState::Ready => Ok(false),
            DriverState::Initializing => Err(FsError::not_ready(&self.prefix)),
            DriverState::Unmounting | DriverState::Closed => Err(FsError::closed(&self.prefix)),
        }
    }

    /// Finish `init()`: `Ready` on success, back to `Unmounted` on failure.
    pub fn finish_init(&self, ok: bool) {
        *self.state.lock() = if ok {
            DriverState::Ready
        } else {
            DriverState::Unmounted
        };
    }

    /// Move to `Unmounting` and wait for in-flight operations to drain.
    ///
    /// Returns `None` if the driver was never ready or is already closed.
    pub async fn begin_uninit(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        {
            let mut state = self.state.lock();
            match *state {
                DriverState::Ready => *state = DriverState::Unmounting,
                DriverState::Unmounted | DriverState::Initializing => {
                    *state = DriverState::Closed;
                    return None;
                }
                DriverState::Unmounting | DriverState::Closed => return None,
            }
        }
        Some(self.gate.write().await)
    }

    pub fn finish_uninit(&self) {
        *self.state.lock() = DriverState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_states() {
        let lc = Lifecycle::new("c");
        assert!(matches!(lc.check(), Err(FsError::NotReady(_))));

        assert!(lc.begin_init().unwrap());
        assert_eq!(lc.state(), DriverState::Initializing);
        lc.finish_init(true);
        assert!(lc.enter().await.is_ok());

        assert!(!lc.begin_init().unwrap(), "second init is a no-op");

        let gate = lc.begin_uninit().await;
        assert!(gate.is_some());
        assert!(matches!(lc.check(), Err(FsError::Closed(_))));
        drop(gate);
        lc.finish_uninit();
        assert_eq!(lc.state(), DriverState::Closed);
        assert!(matches!(lc.begin_init(), Err(FsError::Closed(_))));
    }

    #[tokio::test]
    async fn test_failed_init_returns_to_unmounted() {
        let lc = Lifecycle::new("c");
        lc.begin_init().unwrap();
        lc.finish_init(false);
        assert_eq!(lc.state(), DriverState::Unmounted);
        assert!(lc.begin_init().unwrap());
    }

    #[tokio::test]
    async fn test_uninit_waits_for_in_flight() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let lc = Arc::new(Lifecycle::new("c"));
        lc.begin_init().unwrap();
        lc.finish_init(true);

        let op = lc.enter().await.unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let lc2 = Arc::clone(&lc);
        let done2 = Arc::clone(&done);
        let handle = tokio::spawn(async move {
            let _gate = lc2.begin_uninit().await;
            done2.store(true, Ordering::SeqCst);
        });

        tokio::task::yield_now().await;
        assert!(!done.load(Ordering::SeqCst));
        drop(op);
        handle.await.unwrap();
        assert!(done.load(Ordering::SeqCst));
    }
}
