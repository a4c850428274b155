//! Errors for certificate and private key parsing.

use crate::spiffe_id::SpiffeIdError;
use x509_parser::error::X509Error;

/// An error parsing or inspecting an X.509 certificate.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum CertificateError {
    /// The X.509 parser rejected the input.
    #[error("failed parsing X.509 certificate")]
    ParseX509Certificate(#[from] X509Error),

    /// The chain holds more certificates than allowed.
    #[error("certificate chain exceeds {max} certificates")]
    TooManyCertificates {
        /// Maximum accepted chain length.
        max: usize,
    },

    /// A required extension is absent.
    #[error("X.509 extension is missing: {0}")]
    MissingX509Extension(String),

    /// An extension was present under the expected OID but decoded to something else.
    #[error("unexpected X.509 extension: {0}")]
    UnexpectedExtension(String),

    /// No URI SAN is a SPIFFE ID.
    #[error("certificate is missing SPIFFE ID in URI SAN")]
    MissingSpiffeId,

    /// More than one URI SAN is a SPIFFE ID.
    #[error("certificate contains multiple SPIFFE IDs in URI SAN")]
    MultipleSpiffeIds,

    /// Too many URI SAN entries to inspect.
    #[error("certificate has too many URI SAN entries (max {max})")]
    TooManyUriSanEntries {
        /// Number of URI SAN entries inspected before giving up.
        max: usize,
    },

    /// A `spiffe://` URI SAN is not a valid SPIFFE ID.
    #[error("failed to parse SPIFFE ID from URI SAN: {0}")]
    InvalidSpiffeId(#[from] SpiffeIdError),
}

/// An error decoding a private key.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum PrivateKeyError {
    /// The bytes are not a PKCS#8 `PrivateKeyInfo`.
    #[error("failed decoding PKCS#8 private key")]
    DecodePkcs8(pkcs8::Error),
}
