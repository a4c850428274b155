//! Drain coordination for components that serve concurrent requests.
//!
//! Each in-flight request holds a [`DrainPermit`]. Once [`DrainCoordinator::wait`] is
//! called no new permits are handed out, and the caller waits for the existing ones
//! to be released.

use crate::constants::DRAIN_TIMEOUT;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Errors returned by the [`DrainCoordinator`].
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum DrainError {
    /// Draining has started; no new holders are accepted.
    #[error("draining has started; no new requests are accepted")]
    AlreadyDraining,

    /// Active holders remained when the drain timeout elapsed.
    #[error("timed out waiting for {active} active request(s) to finish")]
    Timeout {
        /// Holders still registered when the wait gave up.
        active: usize,
    },

    /// The wait was cancelled before all holders finished.
    #[error("drain wait cancelled")]
    Cancelled,
}

/// Tracks active request holders and gates shutdown on them. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DrainCoordinator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    draining: Mutex<bool>,
    active: watch::Sender<usize>,
}

/// Registration of one active holder. Released by [`DrainPermit::done`] or on drop.
#[derive(Debug)]
#[must_use = "dropping the permit releases it immediately"]
pub struct DrainPermit {
    inner: Arc<Inner>,
}

impl DrainCoordinator {
    /// Creates a coordinator with no holders that is not draining.
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                draining: Mutex::new(false),
                active,
            }),
        }
    }

    /// Registers one holder.
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::AlreadyDraining`] once [`wait`](Self::wait) has been called.
    pub fn inc(&self) -> Result<DrainPermit, DrainError> {
        let draining = self.inner.draining.lock();
        if *draining {
            return Err(DrainError::AlreadyDraining);
        }
        self.inner.active.send_modify(|n| *n += 1);
        drop(draining);

        Ok(DrainPermit {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Starts draining, then waits for every holder to finish.
    ///
    /// Draining cannot be undone: the flag stays set even when the wait fails.
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::Timeout`] if holders remain after [`DRAIN_TIMEOUT`], or
    /// [`DrainError::Cancelled`] if `cancel` fires first. A zero count always wins.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), DrainError> {
        *self.inner.draining.lock() = true;

        let mut active = self.inner.active.subscribe();
        tokio::select! {
            biased;
            _ = active.wait_for(|n| *n == 0) => Ok(()),
            () = tokio::time::sleep(DRAIN_TIMEOUT) => Err(DrainError::Timeout {
                active: self.active(),
            }),
            () = cancel.cancelled() => Err(DrainError::Cancelled),
        }
    }

    /// Returns `true` once draining has started.
    pub fn is_draining(&self) -> bool {
        *self.inner.draining.lock()
    }

    /// Number of registered holders.
    pub fn active(&self) -> usize {
        *self.inner.active.borrow()
    }
}

impl Default for DrainCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainPermit {
    /// Releases the holder.
    pub fn done(self) {}
}

impl Drop for DrainPermit {
    fn drop(&mut self) {
        self.inner.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}
