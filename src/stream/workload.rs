//! Workload API messages used by the `FetchX509SVID` stream.

use crate::svid::{X509Svid, X509SvidError};
use std::collections::HashMap;

/// Request for the X.509-SVID stream. Carries no fields.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct X509SvidRequest {}

/// One update on the X.509-SVID stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct X509SvidResponse {
    /// SVIDs issued to the caller.
    #[prost(message, repeated, tag = "1")]
    pub svids: Vec<X509SvidMessage>,
    /// ASN.1 DER encoded certificate revocation lists.
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub crl: Vec<Vec<u8>>,
    /// Federated bundles keyed by trust domain ID, each as concatenated DER.
    #[prost(map = "string, bytes", tag = "3")]
    pub federated_bundles: HashMap<String, Vec<u8>>,
}

/// A single SVID as sent on the wire.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct X509SvidMessage {
    /// The SPIFFE ID of the SVID.
    #[prost(string, tag = "1")]
    pub spiffe_id: String,
    /// Concatenated DER certificate chain, leaf first.
    #[prost(bytes = "vec", tag = "2")]
    pub x509_svid: Vec<u8>,
    /// PKCS#8 DER private key.
    #[prost(bytes = "vec", tag = "3")]
    pub x509_svid_key: Vec<u8>,
    /// Concatenated DER bundle for the SVID's trust domain.
    #[prost(bytes = "vec", tag = "4")]
    pub bundle: Vec<u8>,
    /// Operator-specified hint for choosing among several SVIDs.
    #[prost(string, tag = "5")]
    pub hint: String,
}

impl X509SvidMessage {
    /// Decodes the chain and key into an [`X509Svid`].
    ///
    /// # Errors
    ///
    /// Fails if the DER is malformed or the leaf has no usable SPIFFE ID.
    pub fn to_x509_svid(&self) -> Result<X509Svid, X509SvidError> {
        X509Svid::parse_from_der(&self.x509_svid, &self.x509_svid_key)
    }
}
