//! DER-backed [`Certificate`] and [`PrivateKey`] types.
//!
//! Both validate their bytes on construction; a value of either type is always parseable.

use crate::cert::error::{CertificateError, PrivateKeyError};
use crate::cert::parsing::{asn1_to_system_time, parse_x509, single_spiffe_id};
use crate::spiffe_id::SpiffeId;
use pkcs8::PrivateKeyInfo;
use std::time::SystemTime;
use zeroize::Zeroize;

pub mod error;
pub(crate) mod parsing;

/// A single DER-encoded X.509 certificate.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Certificate(Vec<u8>);

impl Certificate {
    pub(crate) fn from_validated(der: Vec<u8>) -> Self {
        Self(der)
    }

    /// Returns the DER bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the single SPIFFE ID in the certificate's URI SAN.
    ///
    /// # Errors
    ///
    /// Fails if there is no SPIFFE ID, more than one, or the certificate cannot be parsed.
    pub fn spiffe_id(&self) -> Result<SpiffeId, CertificateError> {
        let (_, x509) = parse_x509(&self.0)?;
        single_spiffe_id(&x509)
    }

    /// Returns the `(not_before, not_after)` validity window.
    ///
    /// # Errors
    ///
    /// Fails if the certificate cannot be parsed.
    pub fn validity(&self) -> Result<(SystemTime, SystemTime), CertificateError> {
        let (_, x509) = parse_x509(&self.0)?;
        let validity = x509.validity();
        Ok((
            asn1_to_system_time(validity.not_before),
            asn1_to_system_time(validity.not_after),
        ))
    }

    /// Returns the raw DER encoding of the subject name.
    ///
    /// # Errors
    ///
    /// Fails if the certificate cannot be parsed.
    pub fn subject_der(&self) -> Result<Vec<u8>, CertificateError> {
        let (_, x509) = parse_x509(&self.0)?;
        Ok(x509.subject().as_raw().to_vec())
    }

    /// Returns the raw DER encoding of the issuer name.
    ///
    /// # Errors
    ///
    /// Fails if the certificate cannot be parsed.
    pub fn issuer_der(&self) -> Result<Vec<u8>, CertificateError> {
        let (_, x509) = parse_x509(&self.0)?;
        Ok(x509.issuer().as_raw().to_vec())
    }
}

impl AsRef<[u8]> for Certificate {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Certificate {
    type Error = CertificateError;

    fn try_from(der: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(der.to_vec())
    }
}

impl TryFrom<Vec<u8>> for Certificate {
    type Error = CertificateError;

    fn try_from(der: Vec<u8>) -> Result<Self, Self::Error> {
        let (rest, _) = parse_x509(&der)?;
        if !rest.is_empty() {
            return Err(CertificateError::ParseX509Certificate(
                x509_parser::error::X509Error::InvalidCertificate,
            ));
        }
        Ok(Self(der))
    }
}

/// A PKCS#8 DER-encoded private key. Zeroized on drop.
#[derive(Clone, Eq, PartialEq, Zeroize)]
#[zeroize(drop)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    /// Returns the DER bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for PrivateKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for PrivateKey {
    type Error = PrivateKeyError;

    fn try_from(der: &[u8]) -> Result<Self, Self::Error> {
        PrivateKeyInfo::try_from(der).map_err(PrivateKeyError::DecodePkcs8)?;
        Ok(Self(der.to_vec()))
    }
}

impl TryFrom<Vec<u8>> for PrivateKey {
    type Error = PrivateKeyError;

    fn try_from(der: Vec<u8>) -> Result<Self, Self::Error> {
        PrivateKeyInfo::try_from(der.as_slice()).map_err(PrivateKeyError::DecodePkcs8)?;
        Ok(Self(der))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("len", &self.0.len())
            .finish()
    }
}
