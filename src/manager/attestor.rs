//! Collaborator seams for attestation and the remote authority.

use crate::bundle::X509Bundle;
use crate::cert::{Certificate, PrivateKey};
use crate::svid::X509Svid;
use crate::BoxError;
use std::future::Future;

/// Output of a successful attestation.
#[derive(Debug, Clone)]
pub struct AttestationResult {
    /// Certificate chain of the issued SVID, leaf first.
    pub svid: Vec<Certificate>,
    /// Private key matching the leaf certificate.
    pub key: PrivateKey,
    /// Trust bundle of the agent's trust domain.
    pub bundle: X509Bundle,
}

/// Proves the agent's identity to the authority and obtains a first SVID.
///
/// Implementations wrap a concrete node attestor; only the result matters here.
pub trait Attestor: Send + Sync + 'static {
    /// Runs attestation.
    fn attest(&self) -> impl Future<Output = Result<AttestationResult, BoxError>> + Send;
}

/// A renewed certificate chain and its key.
#[derive(Debug, Clone)]
pub struct RenewedSvid {
    /// Certificate chain, leaf first.
    pub cert_chain: Vec<Certificate>,
    /// Private key matching the leaf certificate.
    pub private_key: PrivateKey,
}

/// The remote authority, reached over an already-authenticated channel.
pub trait AuthorityClient: Send + Sync + 'static {
    /// Requests a fresh SVID for the identity in `current`.
    fn renew_svid(
        &self,
        current: &X509Svid,
    ) -> impl Future<Output = Result<RenewedSvid, BoxError>> + Send;

    /// Fetches the current trust bundle.
    fn fetch_bundle(&self) -> impl Future<Output = Result<X509Bundle, BoxError>> + Send;
}
