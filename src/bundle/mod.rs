//! X.509 trust bundle.

use crate::cert::error::CertificateError;
use crate::cert::parsing::split_der_certificates;
use crate::cert::Certificate;
use crate::spiffe_id::TrustDomain;

/// The trusted X.509 authorities of a [`TrustDomain`].
///
/// Bundles are immutable once built; an update replaces the whole value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct X509Bundle {
    trust_domain: TrustDomain,
    x509_authorities: Vec<Certificate>,
}

/// An error building an [`X509Bundle`].
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum X509BundleError {
    /// Error processing or validating the X.509 certificates in the bundle.
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

impl X509Bundle {
    /// Creates a bundle from authorities that are already decoded.
    pub fn new(trust_domain: TrustDomain, x509_authorities: Vec<Certificate>) -> Self {
        Self {
            trust_domain,
            x509_authorities,
        }
    }

    /// Creates a bundle from a list of DER-encoded X.509 authorities.
    ///
    /// # Errors
    ///
    /// Fails if any authority is not a DER-encoded certificate.
    pub fn from_x509_authorities(
        trust_domain: TrustDomain,
        authorities: &[&[u8]],
    ) -> Result<Self, X509BundleError> {
        let x509_authorities = authorities
            .iter()
            .map(|b| Certificate::try_from(*b))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(trust_domain, x509_authorities))
    }

    /// Parses a bundle from concatenated DER certificates.
    ///
    /// # Errors
    ///
    /// Fails if the bytes are not a sequence of DER-encoded certificates.
    pub fn parse_from_der(
        trust_domain: TrustDomain,
        bundle_der: &[u8],
    ) -> Result<Self, X509BundleError> {
        let x509_authorities = split_der_certificates(bundle_der, None)?;
        Ok(Self::new(trust_domain, x509_authorities))
    }

    /// Returns the [`TrustDomain`] associated with the bundle.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Returns the X.509 authorities in the bundle.
    pub fn authorities(&self) -> &[Certificate] {
        &self.x509_authorities
    }

    /// Concatenated DER of all authorities.
    pub fn to_der(&self) -> Vec<u8> {
        self.x509_authorities
            .iter()
            .flat_map(|c| c.as_bytes().iter().copied())
            .collect()
    }
}
