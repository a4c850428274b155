//! Periodic trust bundle synchronization.

use super::attestor::{Attestor, AuthorityClient};
use super::error::BundleSyncError;
use super::Shared;
use crate::metrics::MetricsErrorKind;
use crate::prelude::{debug, info, warn};
use crate::supervisor::{ErrorKey, ErrorTracker};
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub(super) async fn run<A: Attestor, C: AuthorityClient>(shared: Arc<Shared<A, C>>) {
    let period = shared.settings.sync_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = ErrorTracker::default();

    loop {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            _ = ticker.tick() => match sync_bundle(&shared).await {
                Ok(_) => tracker.reset(),
                Err(BundleSyncError::Closed) => break,
                Err(e) => {
                    shared.record_error(MetricsErrorKind::BundleSync);
                    if tracker.record_error(ErrorKey::BundleSync) {
                        warn!(
                            "Failed to synchronize trust bundle; retrying: error={}, retry_in_ms={}",
                            e,
                            period.as_millis()
                        );
                    } else {
                        debug!(
                            "Failed to synchronize trust bundle (repeated): error={}, consecutive_failures={}",
                            e,
                            tracker.consecutive_count()
                        );
                    }
                }
            },
        }
    }

    debug!("Bundle sync stopped");
}

/// Fetches the bundle and publishes it if it changed. Returns whether it changed.
pub(super) async fn sync_bundle<A: Attestor, C: AuthorityClient>(
    shared: &Shared<A, C>,
) -> Result<bool, BundleSyncError> {
    let fetched = tokio::select! {
        biased;
        () = shared.cancel.cancelled() => return Err(BundleSyncError::Closed),
        fetched = shared.client.fetch_bundle() => fetched.map_err(BundleSyncError::Fetch)?,
    };

    let trust_domain = shared.cache.trust_domain();
    if fetched.trust_domain() != trust_domain {
        return Err(BundleSyncError::TrustDomainMismatch {
            expected: trust_domain.clone(),
            actual: fetched.trust_domain().clone(),
        });
    }

    if !shared.cache.update_bundle(fetched) {
        return Ok(false);
    }

    let bundle = shared.cache.bundle();
    info!(
        "Trust bundle updated: trust_domain={}, authorities={}",
        bundle.trust_domain(),
        bundle.authorities().len()
    );
    shared.persist_bundle(&bundle).await;
    Ok(true)
}
