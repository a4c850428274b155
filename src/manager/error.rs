use crate::spiffe_id::{SpiffeId, TrustDomain};
use crate::svid::X509SvidError;
use crate::BoxError;

/// Errors returned while building or operating a [`Manager`](super::Manager).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ManagerError {
    /// The attestor failed; no manager was created.
    #[error("node attestation failed")]
    Attestation(#[source] BoxError),

    /// The attested chain or key is not a usable SVID.
    #[error("attested identity is not a valid X.509-SVID")]
    IdentityParse(#[from] X509SvidError),

    /// The SVID or the bundle belongs to another trust domain.
    #[error("trust domain mismatch: expected {expected}, got {actual}")]
    TrustDomainMismatch {
        /// Configured trust domain.
        expected: TrustDomain,
        /// Trust domain that was received.
        actual: TrustDomain,
    },

    /// The manager has been shut down.
    #[error("identity manager is closed")]
    Closed,

    /// Background tasks did not stop within the shutdown timeout and were aborted.
    #[error("identity manager shutdown timed out")]
    ShutdownTimeout,
}

/// A failed rotation. The previous SVID stays in place.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RotationError {
    /// The authority rejected or failed the renewal.
    #[error("SVID renewal failed")]
    Renewal(#[source] BoxError),

    /// Re-attestation of an expired SVID failed.
    #[error("re-attestation failed")]
    Attestation(#[source] BoxError),

    /// The new chain or key is not a usable SVID.
    #[error("renewed identity is not a valid X.509-SVID")]
    IdentityParse(#[from] X509SvidError),

    /// The new SVID names a different SPIFFE ID.
    #[error("renewed SVID changed identity from {expected} to {actual}")]
    IdentityChanged {
        /// SPIFFE ID of the current SVID.
        expected: SpiffeId,
        /// SPIFFE ID of the rejected SVID.
        actual: SpiffeId,
    },

    /// The re-attested bundle belongs to another trust domain.
    #[error("trust domain mismatch: expected {expected}, got {actual}")]
    TrustDomainMismatch {
        /// Configured trust domain.
        expected: TrustDomain,
        /// Trust domain that was received.
        actual: TrustDomain,
    },

    /// The manager was shut down during the rotation.
    #[error("identity manager is closed")]
    Closed,
}

/// A failed bundle synchronization.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BundleSyncError {
    /// The authority could not be reached or returned an error.
    #[error("failed to fetch trust bundle")]
    Fetch(#[source] BoxError),

    /// The fetched bundle belongs to another trust domain.
    #[error("trust domain mismatch: expected {expected}, got {actual}")]
    TrustDomainMismatch {
        /// Configured trust domain.
        expected: TrustDomain,
        /// Trust domain that was received.
        actual: TrustDomain,
    },

    /// The manager was shut down during the sync.
    #[error("identity manager is closed")]
    Closed,
}
