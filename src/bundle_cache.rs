//! Short-lived read cache for trust bundles served to many concurrent callers.
//!
//! An entry is only returned while the clock is strictly before its expiry; afterwards
//! the cache behaves as if empty. Nothing is evicted.

use crate::clock::{Clock, SystemClock};
use crate::constants::DEFAULT_BUNDLE_CACHE_TTL;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// TTL cache holding a single bundle of type `B`.
pub struct BundleCache<B> {
    entry: RwLock<Option<Entry<B>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

struct Entry<B> {
    bundle: Arc<B>,
    // `None` when `now + ttl` overflows: the entry never expires.
    expires_at: Option<SystemTime>,
}

impl<B> BundleCache<B> {
    /// Creates a cache whose entries live for `ttl`. A zero TTL disables caching.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Creates a cache reading time from `clock`.
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
            clock,
        }
    }

    /// A cache that never hits.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached bundle if it has not expired.
    pub fn get(&self) -> Option<Arc<B>> {
        let now = self.clock.now();
        let entry = self.entry.read();
        entry
            .as_ref()
            .filter(|e| e.expires_at.map_or(true, |at| now < at))
            .map(|e| Arc::clone(&e.bundle))
    }

    /// Stores `bundle`, replacing any existing entry.
    pub fn set(&self, bundle: Arc<B>) {
        let expires_at = self.clock.now().checked_add(self.ttl);
        *self.entry.write() = Some(Entry { bundle, expires_at });
    }

    /// Returns the cached bundle, or calls `fetch` and caches its result.
    ///
    /// `fetch` runs without holding the lock, so concurrent misses may each fetch.
    ///
    /// # Errors
    ///
    /// Returns the error from `fetch`; nothing is cached in that case.
    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Result<Arc<B>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<B, E>>,
    {
        if let Some(bundle) = self.get() {
            return Ok(bundle);
        }
        let bundle = Arc::new(fetch().await?);
        self.set(Arc::clone(&bundle));
        Ok(bundle)
    }
}

impl<B> Default for BundleCache<B> {
    fn default() -> Self {
        Self::new(DEFAULT_BUNDLE_CACHE_TTL)
    }
}

impl<B> fmt::Debug for BundleCache<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleCache")
            .field("ttl", &self.ttl)
            .field("populated", &self.entry.read().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn zero_ttl_always_misses() {
        let cache = BundleCache::disabled();
        cache.set(Arc::new(1_u8));
        assert!(cache.get().is_none());
    }

    #[test]
    fn expiry_is_strict() {
        let clock = Arc::new(ManualClock::default());
        let cache = BundleCache::with_clock(Duration::from_secs(1), clock.clone());
        cache.set(Arc::new("bundle"));

        clock.advance(Duration::from_millis(999));
        assert_eq!(cache.get().as_deref(), Some(&"bundle"));

        clock.advance(Duration::from_millis(1));
        assert!(cache.get().is_none());
    }

    #[test]
    fn overflowing_ttl_never_expires() {
        let clock = Arc::new(ManualClock::default());
        let cache = BundleCache::with_clock(Duration::MAX, clock.clone());
        cache.set(Arc::new("bundle"));

        clock.advance(Duration::from_secs(100 * 365 * 24 * 3600));
        assert_eq!(cache.get().as_deref(), Some(&"bundle"));
    }
}
