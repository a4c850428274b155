//! Current identity and trust bundle, published atomically.

use super::error::ManagerError;
use crate::bundle::X509Bundle;
use crate::spiffe_id::TrustDomain;
use crate::svid::X509Svid;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// The SVID and bundle as published together.
#[derive(Debug, Clone)]
pub struct IdentitySnapshot {
    svid: Arc<X509Svid>,
    bundle: Arc<X509Bundle>,
}

impl IdentitySnapshot {
    /// The current SVID.
    pub fn svid(&self) -> &Arc<X509Svid> {
        &self.svid
    }

    /// The current trust bundle.
    pub fn bundle(&self) -> &Arc<X509Bundle> {
        &self.bundle
    }
}

/// Holds the agent's current SVID and trust bundle.
///
/// Readers load an `Arc` without waiting on writers. Writers replace the whole
/// snapshot, so an SVID's certificate and key are never observed apart.
pub struct IdentityCache {
    trust_domain: TrustDomain,
    current: ArcSwap<IdentitySnapshot>,
    write: Mutex<()>,
    bundle_tx: watch::Sender<Arc<X509Bundle>>,
    update_tx: watch::Sender<u64>,
}

impl IdentityCache {
    /// Creates a cache seeded with `svid` and `bundle`.
    pub fn new(trust_domain: TrustDomain, svid: Arc<X509Svid>, bundle: Arc<X509Bundle>) -> Self {
        let (bundle_tx, _) = watch::channel(Arc::clone(&bundle));
        let (update_tx, _) = watch::channel(0);
        Self {
            trust_domain,
            current: ArcSwap::from_pointee(IdentitySnapshot { svid, bundle }),
            write: Mutex::new(()),
            bundle_tx,
            update_tx,
        }
    }

    /// The trust domain this cache serves.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Returns the SVID and bundle as one consistent pair.
    pub fn snapshot(&self) -> IdentitySnapshot {
        IdentitySnapshot::clone(&self.current.load())
    }

    /// The current SVID.
    pub fn svid(&self) -> Arc<X509Svid> {
        Arc::clone(&self.current.load().svid)
    }

    /// The current trust bundle.
    pub fn bundle(&self) -> Arc<X509Bundle> {
        Arc::clone(&self.current.load().bundle)
    }

    /// Publishes a new SVID, keeping the bundle.
    pub fn update_svid(&self, svid: Arc<X509Svid>) {
        let _guard = self.write.lock();
        let bundle = Arc::clone(&self.current.load().bundle);
        self.current.store(Arc::new(IdentitySnapshot { svid, bundle }));
        self.bump();
    }

    /// Publishes a new bundle. Returns `false`, and notifies nobody, if it equals the current one.
    pub fn update_bundle(&self, bundle: X509Bundle) -> bool {
        let _guard = self.write.lock();
        let current = self.current.load_full();
        if *current.bundle == bundle {
            return false;
        }
        let bundle = Arc::new(bundle);
        self.current.store(Arc::new(IdentitySnapshot {
            svid: Arc::clone(&current.svid),
            bundle: Arc::clone(&bundle),
        }));
        self.bundle_tx.send_replace(bundle);
        self.bump();
        true
    }

    /// Publishes a new SVID and bundle together. Bundle subscribers are notified only
    /// if the bundle changed.
    pub fn update_identity(&self, svid: Arc<X509Svid>, bundle: X509Bundle) {
        let _guard = self.write.lock();
        let bundle_changed = *self.current.load().bundle != bundle;
        let bundle = if bundle_changed {
            Arc::new(bundle)
        } else {
            Arc::clone(&self.current.load().bundle)
        };
        self.current.store(Arc::new(IdentitySnapshot {
            svid,
            bundle: Arc::clone(&bundle),
        }));
        if bundle_changed {
            self.bundle_tx.send_replace(bundle);
        }
        self.bump();
    }

    /// Subscribes to bundle changes. Only bundles published after this call are reported.
    pub fn subscribe_to_bundle_changes(&self) -> BundleStream {
        BundleStream {
            rx: self.bundle_tx.subscribe(),
        }
    }

    /// Returns a feed of the update sequence number.
    pub fn updated(&self) -> IdentityUpdates {
        IdentityUpdates {
            rx: self.update_tx.subscribe(),
        }
    }

    fn bump(&self) {
        self.update_tx.send_modify(|seq| *seq += 1);
    }
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("trust_domain", &self.trust_domain)
            .field("spiffe_id", self.current.load().svid.spiffe_id())
            .field("update_seq", &*self.update_tx.borrow())
            .finish_non_exhaustive()
    }
}

/// Bundle-change subscription.
///
/// Coalescing: a slow reader sees only the latest bundle. Publishing an equal bundle
/// is not a change.
#[derive(Debug, Clone)]
pub struct BundleStream {
    rx: watch::Receiver<Arc<X509Bundle>>,
}

impl BundleStream {
    /// Waits for the next bundle. Returns `None` once the cache is gone.
    pub async fn changed(&mut self) -> Option<Arc<X509Bundle>> {
        self.rx.changed().await.ok()?;
        Some(Arc::clone(&self.rx.borrow_and_update()))
    }

    /// The latest bundle, without waiting.
    pub fn current(&self) -> Arc<X509Bundle> {
        Arc::clone(&self.rx.borrow())
    }
}

/// Watch-style feed of the identity update sequence.
///
/// The sequence starts at 0 and increases by one per publication. Slow readers may
/// skip intermediate values.
#[derive(Debug, Clone)]
pub struct IdentityUpdates {
    rx: watch::Receiver<u64>,
}

impl IdentityUpdates {
    /// Waits for the next publication and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Closed`] once the cache is gone.
    pub async fn changed(&mut self) -> Result<u64, ManagerError> {
        self.rx.changed().await.map_err(|_| ManagerError::Closed)?;
        Ok(*self.rx.borrow_and_update())
    }

    /// The latest sequence number, without waiting.
    pub fn last(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Waits until the sequence number satisfies `f`. Returns at once if it already does.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Closed`] once the cache is gone.
    pub async fn wait_for<F>(&mut self, mut f: F) -> Result<u64, ManagerError>
    where
        F: FnMut(&u64) -> bool,
    {
        let current = self.last();
        if f(&current) {
            return Ok(current);
        }
        loop {
            let seq = self.changed().await?;
            if f(&seq) {
                return Ok(seq);
            }
        }
    }
}
