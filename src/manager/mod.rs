//! Identity cache and rotation manager.
//!
//! [`Manager`] attests once at construction, publishes the resulting SVID and trust
//! bundle through an [`IdentityCache`], and then keeps both fresh in the background:
//!
//! - the rotator renews the SVID when it nears expiry or when a bundle change leaves it
//!   uncovered, and re-attests if it has already expired;
//! - the bundle sync task polls the authority for trust bundle updates.
//!
//! Background failures are logged and retried; the last good identity stays in place.

mod attestor;
mod builder;
mod cache;
mod error;
mod rotator;
mod storage;
mod sync;

pub use attestor::{AttestationResult, Attestor, AuthorityClient, RenewedSvid};
pub use builder::ManagerBuilder;
pub use cache::{BundleStream, IdentityCache, IdentitySnapshot, IdentityUpdates};
pub use error::{BundleSyncError, ManagerError, RotationError};

use crate::bundle::X509Bundle;
use crate::clock::Clock;
use crate::metrics::{MetricsErrorKind, MetricsRecorder};
use crate::prelude::warn;
use crate::spiffe_id::{SpiffeId, TrustDomain};
use crate::svid::X509Svid;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::Storage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
struct Settings {
    sync_interval: Duration,
    rotation_interval: Duration,
    rotation_margin: Duration,
}

struct Shared<A, C> {
    attestor: A,
    client: C,
    cache: IdentityCache,
    clock: Arc<dyn Clock>,
    settings: Settings,
    storage: Storage,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    cancel: CancellationToken,
    // Serializes the rotator with `Manager::rotate_now`.
    rotation_lock: tokio::sync::Mutex<()>,
}

impl<A, C> Shared<A, C> {
    fn record_error(&self, kind: MetricsErrorKind) {
        if let Some(m) = &self.metrics {
            m.record_error(kind);
        }
    }

    async fn persist_svid(&self, svid: &X509Svid) {
        if let Err(e) = self.storage.store_svid(svid).await {
            warn!("Failed to persist SVID: error={}", e);
            self.record_error(MetricsErrorKind::Persist);
        }
    }

    async fn persist_bundle(&self, bundle: &X509Bundle) {
        if let Err(e) = self.storage.store_bundle(bundle).await {
            warn!("Failed to persist trust bundle: error={}", e);
            self.record_error(MetricsErrorKind::Persist);
        }
    }
}

/// Owns the agent's identity for its lifetime.
///
/// # Example
///
/// ```no_run
/// use spiffe_agent::manager::{AttestationResult, Attestor, AuthorityClient, Manager, RenewedSvid};
/// use spiffe_agent::{BoxError, TrustDomain, X509Bundle, X509Svid};
///
/// struct JoinToken;
/// struct Server;
///
/// impl Attestor for JoinToken {
///     async fn attest(&self) -> Result<AttestationResult, BoxError> {
///         unimplemented!()
///     }
/// }
///
/// impl AuthorityClient for Server {
///     async fn renew_svid(&self, _current: &X509Svid) -> Result<RenewedSvid, BoxError> {
///         unimplemented!()
///     }
///     async fn fetch_bundle(&self) -> Result<X509Bundle, BoxError> {
///         unimplemented!()
///     }
/// }
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = Manager::builder(TrustDomain::new("example.org")?, JoinToken, Server)
///     .svid_cache_path("/var/lib/agent/agent_svid.der")
///     .bundle_cache_path("/var/lib/agent/bundle.der")
///     .build()
///     .await?;
///
/// let mut updates = manager.updated();
/// updates.changed().await?;
/// println!("rotated: {}", manager.svid().spiffe_id());
///
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Manager<A: Attestor, C: AuthorityClient> {
    shared: Arc<Shared<A, C>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<A: Attestor, C: AuthorityClient> Manager<A, C> {
    /// Starts building a manager for `trust_domain`.
    pub fn builder(trust_domain: TrustDomain, attestor: A, client: C) -> ManagerBuilder<A, C> {
        ManagerBuilder::new(trust_domain, attestor, client)
    }

    fn from_parts(shared: Arc<Shared<A, C>>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            shared,
            tasks: Mutex::new(tasks),
            closed: AtomicBool::new(false),
        }
    }

    /// The SVID and bundle as one consistent pair.
    pub fn snapshot(&self) -> IdentitySnapshot {
        self.shared.cache.snapshot()
    }

    /// The current SVID.
    pub fn svid(&self) -> Arc<X509Svid> {
        self.shared.cache.svid()
    }

    /// The current trust bundle.
    pub fn bundle(&self) -> Arc<X509Bundle> {
        self.shared.cache.bundle()
    }

    /// The agent's SPIFFE ID. It does not change across rotations.
    pub fn spiffe_id(&self) -> SpiffeId {
        self.shared.cache.svid().spiffe_id().clone()
    }

    /// The configured trust domain.
    pub fn trust_domain(&self) -> &TrustDomain {
        self.shared.cache.trust_domain()
    }

    /// The underlying identity cache.
    pub fn cache(&self) -> &IdentityCache {
        &self.shared.cache
    }

    /// Feed of the update sequence; it advances on every SVID or bundle publication.
    pub fn updated(&self) -> IdentityUpdates {
        self.shared.cache.updated()
    }

    /// Subscribes to trust bundle changes.
    pub fn subscribe_to_bundle_changes(&self) -> BundleStream {
        self.shared.cache.subscribe_to_bundle_changes()
    }

    /// Rotates the SVID now, regardless of its remaining lifetime.
    ///
    /// # Errors
    ///
    /// Returns the [`RotationError`]; the current SVID is kept.
    pub async fn rotate_now(&self) -> Result<Arc<X509Svid>, RotationError> {
        rotator::rotate(&self.shared).await
    }

    /// Fetches the trust bundle now. Returns whether it changed.
    ///
    /// # Errors
    ///
    /// Returns the [`BundleSyncError`]; the current bundle is kept.
    pub async fn sync_bundle_now(&self) -> Result<bool, BundleSyncError> {
        sync::sync_bundle(&self.shared).await
    }

    /// Returns `true` once the manager has been shut down or its owner cancelled.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.shared.cancel.is_cancelled()
    }

    /// Stops the background tasks and waits for them. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Error joining identity manager task during shutdown: error={}", e);
            }
        }
    }

    /// Like [`shutdown`](Self::shutdown), but aborts the tasks after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ShutdownTimeout`] if the tasks had to be aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), ManagerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.cancel.cancel();

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let joined = tokio::time::timeout(timeout, async {
            for task in &mut tasks {
                if let Err(e) = task.await {
                    warn!("Error joining identity manager task during shutdown: error={}", e);
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!("Shutdown timeout exceeded; aborting identity manager tasks");
            for task in &tasks {
                task.abort();
            }
            return Err(ManagerError::ShutdownTimeout);
        }
        Ok(())
    }
}

impl<A: Attestor, C: AuthorityClient> Drop for Manager<A, C> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl<A: Attestor, C: AuthorityClient> fmt::Debug for Manager<A, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("cache", &self.shared.cache)
            .field("settings", &self.shared.settings)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
