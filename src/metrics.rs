//! Metrics collaborator.
//!
//! The crate only reports events; wiring them to an exporter is left to the caller.

use std::fmt;

/// Receives lifecycle events from the stream manager and the identity manager.
///
/// Implementations must be cheap and non-blocking; they are called from background tasks.
///
/// # Example
///
/// ```no_run
/// use spiffe_agent::{MetricsErrorKind, MetricsRecorder};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Default)]
/// struct Counters {
///     rotations: AtomicU64,
/// }
///
/// impl MetricsRecorder for Counters {
///     fn record_reconnect(&self) {}
///     fn record_rotation(&self) {
///         self.rotations.fetch_add(1, Ordering::Relaxed);
///     }
///     fn record_error(&self, _kind: MetricsErrorKind) {}
/// }
/// ```
pub trait MetricsRecorder: Send + Sync {
    /// A reconnect cycle is about to run (not recorded for the initial connect).
    fn record_reconnect(&self);

    /// A new SVID was published.
    fn record_rotation(&self);

    /// An error occurred; see [`MetricsErrorKind`].
    fn record_error(&self, kind: MetricsErrorKind);
}

/// Stable, low-cardinality error labels.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum MetricsErrorKind {
    /// Dialling the transport failed.
    Dial,
    /// Opening the identity stream failed.
    OpenStream,
    /// Closing a stream handle failed.
    Close,
    /// Renewing the SVID failed.
    Rotation,
    /// Re-attesting an expired SVID failed.
    Reattestation,
    /// Fetching the trust bundle failed or returned an unusable bundle.
    BundleSync,
    /// Writing the SVID or bundle to disk failed.
    Persist,
}

impl MetricsErrorKind {
    /// Returns the label as a string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dial => "dial",
            Self::OpenStream => "open_stream",
            Self::Close => "close",
            Self::Rotation => "rotation",
            Self::Reattestation => "reattestation",
            Self::BundleSync => "bundle_sync",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for MetricsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
