use super::attestor::{Attestor, AuthorityClient};
use super::cache::IdentityCache;
use super::error::ManagerError;
use super::storage::Storage;
use super::{rotator, sync, Manager, Settings, Shared};
use crate::clock::{Clock, SystemClock};
use crate::constants::{
    DEFAULT_ROTATION_INTERVAL, DEFAULT_ROTATION_MARGIN, DEFAULT_SYNC_INTERVAL,
};
use crate::metrics::MetricsRecorder;
use crate::prelude::info;
use crate::spiffe_id::TrustDomain;
use crate::svid::X509Svid;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builder for [`Manager`].
///
/// Durations set to zero fall back to their defaults.
pub struct ManagerBuilder<A, C> {
    trust_domain: TrustDomain,
    attestor: A,
    client: C,
    sync_interval: Duration,
    rotation_interval: Duration,
    rotation_margin: Duration,
    clock: Arc<dyn Clock>,
    storage: Storage,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    cancel: Option<CancellationToken>,
}

impl<A: Attestor, C: AuthorityClient> ManagerBuilder<A, C> {
    pub(super) fn new(trust_domain: TrustDomain, attestor: A, client: C) -> Self {
        Self {
            trust_domain,
            attestor,
            client,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            rotation_margin: DEFAULT_ROTATION_MARGIN,
            clock: Arc::new(SystemClock),
            storage: Storage::default(),
            metrics: None,
            cancel: None,
        }
    }

    /// How often the trust bundle is fetched from the authority.
    #[must_use]
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = or_default(interval, DEFAULT_SYNC_INTERVAL);
        self
    }

    /// How often the rotator checks the SVID's remaining lifetime.
    #[must_use]
    pub fn rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = or_default(interval, DEFAULT_ROTATION_INTERVAL);
        self
    }

    /// Rotate once the SVID is this close to expiry (capped at half its lifetime).
    #[must_use]
    pub fn rotation_margin(mut self, margin: Duration) -> Self {
        self.rotation_margin = or_default(margin, DEFAULT_ROTATION_MARGIN);
        self
    }

    /// Time source for expiry decisions.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Writes the SVID chain to `path` after every publication.
    #[must_use]
    pub fn svid_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.svid_path = Some(path.into());
        self
    }

    /// Writes the trust bundle to `path` after every change.
    #[must_use]
    pub fn bundle_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.bundle_path = Some(path.into());
        self
    }

    /// Reports rotations and errors to `metrics`.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Ties the manager to `owner`: cancelling it stops the background tasks.
    #[must_use]
    pub fn cancellation_token(mut self, owner: &CancellationToken) -> Self {
        self.cancel = Some(owner.child_token());
        self
    }

    /// Attests, seeds the identity cache and starts rotation and bundle sync.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Attestation`] if attestation fails,
    /// [`ManagerError::IdentityParse`] if the result is not a usable SVID, or
    /// [`ManagerError::TrustDomainMismatch`] if it belongs to another trust domain.
    pub async fn build(self) -> Result<Manager<A, C>, ManagerError> {
        let attested = self
            .attestor
            .attest()
            .await
            .map_err(ManagerError::Attestation)?;
        let svid = X509Svid::from_parts(attested.svid, attested.key)?;

        for actual in [svid.spiffe_id().trust_domain(), attested.bundle.trust_domain()] {
            if actual != &self.trust_domain {
                return Err(ManagerError::TrustDomainMismatch {
                    expected: self.trust_domain.clone(),
                    actual: actual.clone(),
                });
            }
        }

        info!(
            "Node attestation succeeded: spiffe_id={}, not_after={:?}",
            svid.spiffe_id(),
            svid.not_after()
        );

        let cache = IdentityCache::new(
            self.trust_domain,
            Arc::new(svid),
            Arc::new(attested.bundle),
        );
        let shared = Arc::new(Shared {
            attestor: self.attestor,
            client: self.client,
            cache,
            clock: self.clock,
            settings: Settings {
                sync_interval: self.sync_interval,
                rotation_interval: self.rotation_interval,
                rotation_margin: self.rotation_margin,
            },
            storage: self.storage,
            metrics: self.metrics,
            cancel: self.cancel.unwrap_or_default(),
            rotation_lock: tokio::sync::Mutex::new(()),
        });

        shared.persist_svid(&shared.cache.svid()).await;
        shared.persist_bundle(&shared.cache.bundle()).await;

        let bundles = shared.cache.subscribe_to_bundle_changes();
        let tasks = vec![
            tokio::spawn(rotator::run(Arc::clone(&shared), bundles)),
            tokio::spawn(sync::run(Arc::clone(&shared))),
        ];

        Ok(Manager::from_parts(shared, tasks))
    }
}

impl<A, C> fmt::Debug for ManagerBuilder<A, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("trust_domain", &self.trust_domain)
            .field("sync_interval", &self.sync_interval)
            .field("rotation_interval", &self.rotation_interval)
            .field("rotation_margin", &self.rotation_margin)
            .field("clock", &self.clock)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

fn or_default(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}
