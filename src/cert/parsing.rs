//! Internal parsing helpers over `x509-parser`.

use crate::cert::error::CertificateError;
use crate::cert::Certificate;
use crate::spiffe_id::{SpiffeId, SPIFFE_SCHEME_PREFIX};
use std::time::{Duration, SystemTime};
use x509_parser::certificate::X509Certificate;
use x509_parser::error::X509Error;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::nom::Err;
use x509_parser::oid_registry;
use x509_parser::time::ASN1Time;

const MAX_URI_SAN_ENTRIES: usize = 32;
const MAX_URI_LENGTH: usize = 2048;

/// SVID chains are leaf + a few intermediates; anything longer is rejected.
pub(crate) const MAX_CERT_CHAIN_LENGTH: usize = 16;

pub(crate) fn parse_x509(der: &[u8]) -> Result<(&[u8], X509Certificate<'_>), CertificateError> {
    x509_parser::parse_x509_certificate(der).map_err(|e| match e {
        Err::Incomplete(_) => CertificateError::ParseX509Certificate(X509Error::InvalidCertificate),
        Err::Error(err) | Err::Failure(err) => CertificateError::ParseX509Certificate(err),
    })
}

/// Splits concatenated DER certificates. `limit` bounds the count when set.
pub(crate) fn split_der_certificates(
    der: &[u8],
    limit: Option<usize>,
) -> Result<Vec<Certificate>, CertificateError> {
    let mut rest = der;
    let mut certs = Vec::new();

    while !rest.is_empty() {
        if let Some(max) = limit {
            if certs.len() >= max {
                return Err(CertificateError::TooManyCertificates { max });
            }
        }
        let (remaining, _) = parse_x509(rest)?;
        let len = rest.len() - remaining.len();
        certs.push(Certificate::from_validated(rest[..len].to_vec()));
        rest = remaining;
    }

    Ok(certs)
}

/// Returns every SPIFFE ID found among the URI SANs.
pub(crate) fn spiffe_ids_from_uri_san(
    cert: &X509Certificate<'_>,
) -> Result<Vec<SpiffeId>, CertificateError> {
    let oid = &oid_registry::OID_X509_EXT_SUBJECT_ALT_NAME;
    let ext = cert
        .tbs_certificate
        .get_extension_unique(oid)?
        .ok_or_else(|| CertificateError::MissingX509Extension(oid.to_id_string()))?;

    let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() else {
        return Err(CertificateError::UnexpectedExtension(oid.to_id_string()));
    };

    let uris = san.general_names.iter().filter_map(|name| match name {
        GeneralName::URI(uri) => Some(*uri),
        _ => None,
    });

    let mut ids = Vec::new();
    for (index, uri) in uris.enumerate() {
        if index >= MAX_URI_SAN_ENTRIES {
            return Err(CertificateError::TooManyUriSanEntries {
                max: MAX_URI_SAN_ENTRIES,
            });
        }
        if uri.len() > MAX_URI_LENGTH || !uri.starts_with(SPIFFE_SCHEME_PREFIX) {
            continue;
        }
        ids.push(SpiffeId::new(uri)?);
    }
    Ok(ids)
}

/// Returns the single SPIFFE ID carried by the certificate.
pub(crate) fn single_spiffe_id(cert: &X509Certificate<'_>) -> Result<SpiffeId, CertificateError> {
    let mut ids = spiffe_ids_from_uri_san(cert)?.into_iter();
    let first = ids.next().ok_or(CertificateError::MissingSpiffeId)?;
    if ids.next().is_some() {
        return Err(CertificateError::MultipleSpiffeIds);
    }
    Ok(first)
}

pub(crate) fn asn1_to_system_time(t: ASN1Time) -> SystemTime {
    let secs = t.timestamp();
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}
