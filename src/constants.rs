//! Defaults shared by the agent lifecycle components.

use std::time::Duration;

/// Name of the environment variable holding the Workload API socket address.
pub const SPIFFE_SOCKET_ENV: &str = "SPIFFE_ENDPOINT_SOCKET";

/// How long [`DrainCoordinator::wait`](crate::drain::DrainCoordinator::wait) waits for
/// active holders before giving up.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifetime of an entry in the server-side [`BundleCache`](crate::bundle_cache::BundleCache).
pub const DEFAULT_BUNDLE_CACHE_TTL: Duration = Duration::from_secs(1);

/// Interval between bundle synchronizations with the remote authority.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Interval at which the rotator checks whether the SVID must be renewed.
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on how close to expiry an SVID may get before it is renewed.
///
/// The effective margin is the smaller of this value and half the SVID lifetime.
pub const DEFAULT_ROTATION_MARGIN: Duration = Duration::from_secs(30 * 60);

/// First delay between connection attempts.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(200);

/// Largest delay between connection attempts.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
