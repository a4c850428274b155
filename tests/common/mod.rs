//! Shared fixtures: a throwaway CA built with rcgen, plus fake attestor and authority.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyPair, KeyUsagePurpose, SanType,
};
use rcgen::string::Ia5String;
use spiffe_agent::manager::{AttestationResult, Attestor, AuthorityClient, RenewedSvid};
use spiffe_agent::{
    BoxError, Certificate, Clock, ManualClock, PrivateKey, TrustDomain, X509Bundle, X509Svid,
};
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const TRUST_DOMAIN: &str = "example.org";
pub const AGENT_ID: &str = "spiffe://example.org/spire/agent/join_token/abc";

pub fn trust_domain() -> TrustDomain {
    TrustDomain::new(TRUST_DOMAIN).unwrap()
}

/// Wall-clock start for tests, truncated to whole seconds to match certificate precision.
pub fn start_time() -> SystemTime {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// A self-signed CA that records every (leaf, key) pair it issues.
pub struct TestCa {
    key: KeyPair,
    cert_pem: String,
    cert_der: Vec<u8>,
    issued: Mutex<HashSet<(Vec<u8>, Vec<u8>)>>,
}

impl TestCa {
    pub fn new(common_name: &str) -> Arc<Self> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = ::time::OffsetDateTime::now_utc();
        params.not_before = now - ::time::Duration::days(1);
        params.not_after = now + ::time::Duration::days(365);

        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        Arc::new(Self {
            key,
            cert_pem: cert.pem(),
            cert_der: cert.der().to_vec(),
            issued: Mutex::new(HashSet::new()),
        })
    }

    pub fn certificate(&self) -> Certificate {
        Certificate::try_from(self.cert_der.as_slice()).unwrap()
    }

    pub fn bundle(&self) -> X509Bundle {
        X509Bundle::new(trust_domain(), vec![self.certificate()])
    }

    /// Issues a leaf SVID for `spiffe_id` valid over `[not_before, not_after]`.
    pub fn issue(
        &self,
        spiffe_id: &str,
        not_before: SystemTime,
        not_after: SystemTime,
    ) -> (Vec<Certificate>, PrivateKey) {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String("svid".to_string()));
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.subject_alt_names =
            vec![SanType::URI(Ia5String::try_from(spiffe_id.to_string()).unwrap())];
        params.not_before = ::time::OffsetDateTime::from(not_before);
        params.not_after = ::time::OffsetDateTime::from(not_after);

        let leaf_key = KeyPair::generate().unwrap();
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &self.key).unwrap();
        let leaf = params.signed_by(&leaf_key, &issuer).unwrap();

        let leaf_der = leaf.der().to_vec();
        let key_der = leaf_key.serialize_der();
        self.issued
            .lock()
            .insert((leaf_der.clone(), key_der.clone()));

        (
            vec![Certificate::try_from(leaf_der).unwrap()],
            PrivateKey::try_from(key_der).unwrap(),
        )
    }

    /// Issues a leaf with no URI SAN.
    pub fn issue_without_spiffe_id(&self, now: SystemTime) -> (Vec<Certificate>, PrivateKey) {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.not_before = ::time::OffsetDateTime::from(now);
        params.not_after = ::time::OffsetDateTime::from(now + Duration::from_secs(3600));

        let leaf_key = KeyPair::generate().unwrap();
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &self.key).unwrap();
        let leaf = params.signed_by(&leaf_key, &issuer).unwrap();
        (
            vec![Certificate::try_from(leaf.der().to_vec()).unwrap()],
            PrivateKey::try_from(leaf_key.serialize_der()).unwrap(),
        )
    }

    /// Issues an SVID valid from `now` for `lifetime`.
    pub fn issue_svid(&self, spiffe_id: &str, now: SystemTime, lifetime: Duration) -> X509Svid {
        let (chain, key) = self.issue(spiffe_id, now, now + lifetime);
        X509Svid::from_parts(chain, key).unwrap()
    }

    /// Whether `svid`'s leaf and key were issued together by this CA.
    pub fn issued_together(&self, svid: &X509Svid) -> bool {
        let pair = (
            svid.leaf().as_bytes().to_vec(),
            svid.private_key().as_bytes().to_vec(),
        );
        self.issued.lock().contains(&pair)
    }
}

fn failure(msg: &str) -> BoxError {
    Box::new(io::Error::other(msg.to_string()))
}

/// Attestor issuing fresh SVIDs from a [`TestCa`].
#[derive(Clone)]
pub struct FakeAttestor {
    inner: Arc<AttestorState>,
}

struct AttestorState {
    ca: Arc<TestCa>,
    clock: Arc<ManualClock>,
    lifetime: Duration,
    spiffe_id: Mutex<String>,
    svid_override: Mutex<Option<Vec<Certificate>>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeAttestor {
    pub fn new(ca: Arc<TestCa>, clock: Arc<ManualClock>, lifetime: Duration) -> Self {
        Self {
            inner: Arc::new(AttestorState {
                ca,
                clock,
                lifetime,
                spiffe_id: Mutex::new(AGENT_ID.to_string()),
                svid_override: Mutex::new(None),
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.inner.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_svid_chain(&self, chain: Vec<Certificate>) {
        *self.inner.svid_override.lock() = Some(chain);
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

impl Attestor for FakeAttestor {
    async fn attest(&self) -> Result<AttestationResult, BoxError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail.load(Ordering::SeqCst) {
            return Err(failure("attestation rejected"));
        }

        let now = self.inner.clock.now();
        let spiffe_id = self.inner.spiffe_id.lock().clone();
        let (chain, key) = self
            .inner
            .ca
            .issue(&spiffe_id, now, now + self.inner.lifetime);
        let svid = self.inner.svid_override.lock().clone().unwrap_or(chain);

        Ok(AttestationResult {
            svid,
            key,
            bundle: self.inner.ca.bundle(),
        })
    }
}

/// Authority renewing SVIDs and serving bundles from a swappable [`TestCa`].
#[derive(Clone)]
pub struct FakeAuthority {
    inner: Arc<AuthorityState>,
}

struct AuthorityState {
    ca: Mutex<Arc<TestCa>>,
    clock: Arc<ManualClock>,
    lifetime: Duration,
    renew_as: Mutex<Option<String>>,
    fail_renewals: AtomicBool,
    renewals: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeAuthority {
    pub fn new(ca: Arc<TestCa>, clock: Arc<ManualClock>, lifetime: Duration) -> Self {
        Self {
            inner: Arc::new(AuthorityState {
                ca: Mutex::new(ca),
                clock,
                lifetime,
                renew_as: Mutex::new(None),
                fail_renewals: AtomicBool::new(false),
                renewals: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
            }),
        }
    }

    /// Switches the signing CA; renewals and fetched bundles follow it.
    pub fn set_ca(&self, ca: Arc<TestCa>) {
        *self.inner.ca.lock() = ca;
    }

    /// Makes renewals return an SVID for `spiffe_id` instead of the requested one.
    pub fn renew_as(&self, spiffe_id: &str) {
        *self.inner.renew_as.lock() = Some(spiffe_id.to_string());
    }

    pub fn set_failing(&self, fail: bool) {
        self.inner.fail_renewals.store(fail, Ordering::SeqCst);
    }

    pub fn renewals(&self) -> usize {
        self.inner.renewals.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }
}

impl AuthorityClient for FakeAuthority {
    async fn renew_svid(&self, current: &X509Svid) -> Result<RenewedSvid, BoxError> {
        self.inner.renewals.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_renewals.load(Ordering::SeqCst) {
            return Err(failure("renewal rejected"));
        }

        let spiffe_id = self
            .inner
            .renew_as
            .lock()
            .clone()
            .unwrap_or_else(|| current.spiffe_id().to_string());
        let now = self.inner.clock.now();
        let ca = self.inner.ca.lock().clone();
        let (cert_chain, private_key) = ca.issue(&spiffe_id, now, now + self.inner.lifetime);

        Ok(RenewedSvid {
            cert_chain,
            private_key,
        })
    }

    async fn fetch_bundle(&self) -> Result<X509Bundle, BoxError> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        let ca = self.inner.ca.lock().clone();
        Ok(ca.bundle())
    }
}
