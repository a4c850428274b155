//! X.509-SVID type and rotation checks.

use crate::bundle::X509Bundle;
use crate::cert::error::{CertificateError, PrivateKeyError};
use crate::cert::parsing::{
    parse_x509, single_spiffe_id, split_der_certificates, MAX_CERT_CHAIN_LENGTH,
};
use crate::cert::{Certificate, PrivateKey};
use crate::spiffe_id::SpiffeId;
use std::time::{Duration, SystemTime};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::ParsedExtension;
use x509_parser::oid_registry;

/// A [SPIFFE X509-SVID](https://github.com/spiffe/spiffe/blob/main/standards/X509-SVID.md).
///
/// Holds the certificate chain (leaf first) and the matching private key together,
/// so a single value is always a consistent pair. Rotation replaces the whole value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct X509Svid {
    spiffe_id: SpiffeId,
    cert_chain: Vec<Certificate>,
    private_key: PrivateKey,
    not_before: SystemTime,
    not_after: SystemTime,
}

/// An error building an [`X509Svid`].
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum X509SvidError {
    /// The chain of certificates is empty.
    #[error("no certificates found in chain")]
    EmptyChain,

    /// The chain holds more certificates than allowed.
    #[error("certificate chain exceeds {max} certificates")]
    ChainTooLong {
        /// Maximum accepted chain length.
        max: usize,
    },

    /// 'CA' flag not allowed in leaf certificate.
    #[error("leaf certificate must not have CA flag set to true")]
    LeafCertificateHasCaFlag,

    /// 'digitalSignature' must be present in the leaf key usage.
    #[error("leaf certificate must have 'digitalSignature' set as key usage")]
    LeafCertificateMissingDigitalSignature,

    /// The leaf certificate carries no usable SPIFFE ID.
    #[error("leaf certificate has no usable SPIFFE ID")]
    MissingSpiffeId(#[source] CertificateError),

    /// Error processing or validating the X.509 certificates.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Error processing the private key.
    #[error(transparent)]
    PrivateKey(#[from] PrivateKeyError),
}

impl X509Svid {
    /// Creates an `X509Svid` from an already-decoded chain (leaf first) and key.
    ///
    /// # Errors
    ///
    /// Fails if the chain is empty or too long, or if the leaf is not a valid SVID leaf.
    pub fn from_parts(
        cert_chain: Vec<Certificate>,
        private_key: PrivateKey,
    ) -> Result<Self, X509SvidError> {
        if cert_chain.len() > MAX_CERT_CHAIN_LENGTH {
            return Err(X509SvidError::ChainTooLong {
                max: MAX_CERT_CHAIN_LENGTH,
            });
        }
        let leaf = cert_chain.first().ok_or(X509SvidError::EmptyChain)?;
        let (_, x509) = parse_x509(leaf.as_bytes())?;

        validate_leaf(&x509)?;
        let spiffe_id = single_spiffe_id(&x509).map_err(|e| match e {
            CertificateError::ParseX509Certificate(_) => X509SvidError::Certificate(e),
            other => X509SvidError::MissingSpiffeId(other),
        })?;
        let (not_before, not_after) = leaf.validity()?;

        Ok(Self {
            spiffe_id,
            cert_chain,
            private_key,
            not_before,
            not_after,
        })
    }

    /// Creates an `X509Svid` from a concatenated DER chain and a PKCS#8 DER key.
    ///
    /// # Errors
    ///
    /// Fails if either input does not parse or the leaf is not a valid SVID leaf.
    pub fn parse_from_der(
        cert_chain_der: &[u8],
        private_key_der: &[u8],
    ) -> Result<Self, X509SvidError> {
        let cert_chain = split_der_certificates(cert_chain_der, Some(MAX_CERT_CHAIN_LENGTH))?;
        let private_key = PrivateKey::try_from(private_key_der)?;
        Self::from_parts(cert_chain, private_key)
    }

    /// Returns the [`SpiffeId`] from the leaf's URI SAN.
    pub fn spiffe_id(&self) -> &SpiffeId {
        &self.spiffe_id
    }

    /// Returns the certificate chain. The first certificate is the leaf.
    pub fn cert_chain(&self) -> &[Certificate] {
        &self.cert_chain
    }

    /// Returns the leaf certificate.
    pub fn leaf(&self) -> &Certificate {
        &self.cert_chain[0]
    }

    /// Returns the private key.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Start of the leaf validity window.
    pub fn not_before(&self) -> SystemTime {
        self.not_before
    }

    /// End of the leaf validity window.
    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }

    /// Returns `true` once `now` has reached `not_after`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.not_after
    }

    /// The instant from which the SVID should be rotated.
    ///
    /// That is `not_after - min(margin, lifetime / 2)`, so a short-lived SVID is
    /// renewed at half its lifetime rather than immediately.
    pub fn rotation_deadline(&self, margin: Duration) -> SystemTime {
        let lifetime = self
            .not_after
            .duration_since(self.not_before)
            .unwrap_or(Duration::ZERO);
        let lead = margin.min(lifetime / 2);
        self.not_after
            .checked_sub(lead)
            .unwrap_or(self.not_before)
    }

    /// Returns `true` if the SVID is within `margin` of expiry.
    pub fn should_rotate(&self, now: SystemTime, margin: Duration) -> bool {
        now >= self.rotation_deadline(margin)
    }

    /// Returns `true` if the top of the chain is signed by, or is, one of the bundle's authorities.
    ///
    /// Matching is by issuer/subject distinguished name; signatures are not verified.
    pub fn chains_to(&self, bundle: &X509Bundle) -> bool {
        let Some(top) = self.cert_chain.last() else {
            return false;
        };
        if bundle.authorities().iter().any(|a| a == top) {
            return true;
        }
        let Ok(issuer) = top.issuer_der() else {
            return false;
        };
        bundle
            .authorities()
            .iter()
            .filter_map(|a| a.subject_der().ok())
            .any(|subject| subject == issuer)
    }
}

fn validate_leaf(cert: &X509Certificate<'_>) -> Result<(), X509SvidError> {
    let tbs = &cert.tbs_certificate;

    if let Some(ext) = tbs
        .get_extension_unique(&oid_registry::OID_X509_EXT_BASIC_CONSTRAINTS)
        .map_err(CertificateError::from)?
    {
        if let ParsedExtension::BasicConstraints(b) = ext.parsed_extension() {
            if b.ca {
                return Err(X509SvidError::LeafCertificateHasCaFlag);
            }
        }
    }

    if let Some(ext) = tbs
        .get_extension_unique(&oid_registry::OID_X509_EXT_KEY_USAGE)
        .map_err(CertificateError::from)?
    {
        if let ParsedExtension::KeyUsage(k) = ext.parsed_extension() {
            if !k.digital_signature() {
                return Err(X509SvidError::LeafCertificateMissingDigitalSignature);
            }
        }
    }

    Ok(())
}
