//! SVID rotation.
//!
//! The rotator wakes on a fixed interval and on bundle changes. It rotates when the SVID
//! is within the rotation margin of expiry, or when a new bundle no longer covers it.

use super::attestor::{Attestor, AuthorityClient};
use super::cache::BundleStream;
use super::error::RotationError;
use super::Shared;
use crate::metrics::MetricsErrorKind;
use crate::prelude::{debug, info, warn};
use crate::supervisor::{ErrorKey, ErrorTracker};
use crate::svid::X509Svid;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

pub(super) async fn run<A: Attestor, C: AuthorityClient>(
    shared: Arc<Shared<A, C>>,
    mut bundles: BundleStream,
) {
    let mut ticker = interval(shared.settings.rotation_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = ErrorTracker::default();

    loop {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            changed = bundles.changed() => {
                let Some(bundle) = changed else { break };
                let svid = shared.cache.svid();
                if svid.chains_to(&bundle) {
                    debug!("Trust bundle changed; SVID still chains to it: spiffe_id={}", svid.spiffe_id());
                    continue;
                }
                info!(
                    "Trust bundle changed and no longer covers the SVID; rotating: spiffe_id={}",
                    svid.spiffe_id()
                );
                attempt(&shared, &mut tracker).await;
            }
            _ = ticker.tick() => {
                let snapshot = shared.cache.snapshot();
                let svid = snapshot.svid();
                if svid.should_rotate(shared.clock.now(), shared.settings.rotation_margin) {
                    info!("SVID is near expiry; rotating: spiffe_id={}", svid.spiffe_id());
                    attempt(&shared, &mut tracker).await;
                } else if !svid.chains_to(snapshot.bundle()) {
                    // A bundle-triggered rotation failed earlier; keep retrying until covered.
                    debug!(
                        "SVID is not covered by the current trust bundle; rotating: spiffe_id={}",
                        svid.spiffe_id()
                    );
                    attempt(&shared, &mut tracker).await;
                }
            }
        }
    }

    debug!("Rotator stopped");
}

async fn attempt<A: Attestor, C: AuthorityClient>(
    shared: &Shared<A, C>,
    tracker: &mut ErrorTracker,
) {
    match rotate(shared).await {
        Ok(_) => {
            if tracker.last_error_kind() == Some(ErrorKey::Rotation) {
                info!(
                    "SVID rotation recovered after {} consecutive failures",
                    tracker.consecutive_count()
                );
            }
            tracker.reset();
        }
        Err(RotationError::Closed) => {}
        Err(e) => {
            shared.record_error(match &e {
                RotationError::Attestation(_) => MetricsErrorKind::Reattestation,
                _ => MetricsErrorKind::Rotation,
            });
            if tracker.record_error(ErrorKey::Rotation) {
                warn!(
                    "Failed to rotate SVID; keeping the current one: error={}, retry_in_ms={}",
                    e,
                    shared.settings.rotation_interval.as_millis()
                );
            } else {
                debug!(
                    "Failed to rotate SVID (repeated): error={}, consecutive_failures={}",
                    e,
                    tracker.consecutive_count()
                );
            }
        }
    }
}

/// Replaces the current SVID.
///
/// Renews through the authority, or re-attests when the SVID has already expired.
/// Concurrent calls are serialized.
pub(super) async fn rotate<A: Attestor, C: AuthorityClient>(
    shared: &Shared<A, C>,
) -> Result<Arc<X509Svid>, RotationError> {
    let _guard = tokio::select! {
        biased;
        () = shared.cancel.cancelled() => return Err(RotationError::Closed),
        guard = shared.rotation_lock.lock() => guard,
    };

    let current = shared.cache.svid();
    let work = async {
        if current.is_expired(shared.clock.now()) {
            reattest(shared, &current).await
        } else {
            renew(shared, &current).await
        }
    };
    let svid = tokio::select! {
        biased;
        () = shared.cancel.cancelled() => return Err(RotationError::Closed),
        svid = work => svid?,
    };

    info!(
        "SVID rotated: spiffe_id={}, not_after={:?}",
        svid.spiffe_id(),
        svid.not_after()
    );
    if let Some(m) = &shared.metrics {
        m.record_rotation();
    }
    shared.persist_svid(&svid).await;
    Ok(svid)
}

async fn renew<A: Attestor, C: AuthorityClient>(
    shared: &Shared<A, C>,
    current: &X509Svid,
) -> Result<Arc<X509Svid>, RotationError> {
    let renewed = shared
        .client
        .renew_svid(current)
        .await
        .map_err(RotationError::Renewal)?;
    let svid = X509Svid::from_parts(renewed.cert_chain, renewed.private_key)?;
    ensure_same_identity(current, &svid)?;

    let svid = Arc::new(svid);
    shared.cache.update_svid(Arc::clone(&svid));
    Ok(svid)
}

async fn reattest<A: Attestor, C: AuthorityClient>(
    shared: &Shared<A, C>,
    current: &X509Svid,
) -> Result<Arc<X509Svid>, RotationError> {
    warn!(
        "SVID has expired; re-attesting: spiffe_id={}",
        current.spiffe_id()
    );
    let result = shared
        .attestor
        .attest()
        .await
        .map_err(RotationError::Attestation)?;
    let svid = X509Svid::from_parts(result.svid, result.key)?;
    ensure_same_identity(current, &svid)?;

    let trust_domain = shared.cache.trust_domain();
    if result.bundle.trust_domain() != trust_domain {
        return Err(RotationError::TrustDomainMismatch {
            expected: trust_domain.clone(),
            actual: result.bundle.trust_domain().clone(),
        });
    }

    let svid = Arc::new(svid);
    shared.cache.update_identity(Arc::clone(&svid), result.bundle);
    shared.persist_bundle(&shared.cache.bundle()).await;
    Ok(svid)
}

fn ensure_same_identity(current: &X509Svid, next: &X509Svid) -> Result<(), RotationError> {
    if current.spiffe_id() == next.spiffe_id() {
        Ok(())
    } else {
        Err(RotationError::IdentityChanged {
            expected: current.spiffe_id().clone(),
            actual: next.spiffe_id().clone(),
        })
    }
}
