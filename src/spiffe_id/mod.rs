//! SPIFFE ID and trust domain types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

pub(crate) const SPIFFE_SCHEME_PREFIX: &str = "spiffe://";

/// A validated [SPIFFE ID](https://github.com/spiffe/spiffe/blob/main/standards/SPIFFE-ID.md),
/// e.g. `spiffe://example.org/agent/node-1`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SpiffeId {
    trust_domain: TrustDomain,
    path: String,
}

/// The trust domain component of a SPIFFE ID.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TrustDomain {
    name: String,
}

/// An error parsing a [`SpiffeId`] or [`TrustDomain`].
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum SpiffeIdError {
    /// Empty input.
    #[error("cannot be empty")]
    Empty,

    /// The `spiffe://` scheme is missing.
    #[error("scheme is missing or invalid")]
    WrongScheme,

    /// No trust domain between the scheme and the path.
    #[error("trust domain is missing")]
    MissingTrustDomain,

    /// The trust domain contains characters outside `[a-z0-9._-]`.
    #[error(
        "trust domain characters are limited to lowercase letters, numbers, dots, dashes, and \
         underscores"
    )]
    BadTrustDomainChar,

    /// A path segment contains characters outside `[a-zA-Z0-9._-]`.
    #[error(
        "path segment characters are limited to letters, numbers, dots, dashes, and underscores"
    )]
    BadPathSegmentChar,

    /// The path contains `//`.
    #[error("path cannot contain empty segments")]
    EmptySegment,

    /// The path contains `.` or `..` segments.
    #[error("path cannot contain dot segments")]
    DotSegment,

    /// The path ends with `/`.
    #[error("path cannot have a trailing slash")]
    TrailingSlash,
}

impl SpiffeId {
    /// Parses a SPIFFE ID.
    ///
    /// # Errors
    ///
    /// Returns a [`SpiffeIdError`] if `id` is not a valid SPIFFE ID.
    ///
    /// # Examples
    ///
    /// ```
    /// use spiffe_agent::SpiffeId;
    ///
    /// let id = SpiffeId::new("spiffe://example.org/agent").unwrap();
    /// assert_eq!(id.trust_domain().name(), "example.org");
    /// assert_eq!(id.path(), "/agent");
    /// ```
    pub fn new(id: &str) -> Result<Self, SpiffeIdError> {
        if id.is_empty() {
            return Err(SpiffeIdError::Empty);
        }
        let rest = id
            .strip_prefix(SPIFFE_SCHEME_PREFIX)
            .ok_or(SpiffeIdError::WrongScheme)?;

        let (td, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
        let trust_domain = TrustDomain::new(td)?;
        if !path.is_empty() {
            validate_path(path)?;
        }

        Ok(Self {
            trust_domain,
            path: path.to_owned(),
        })
    }

    /// Returns the trust domain.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Returns the path, e.g. `/agent/node-1`. Empty for a trust-domain-only ID.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns `true` if this ID belongs to `trust_domain`.
    pub fn is_member_of(&self, trust_domain: &TrustDomain) -> bool {
        &self.trust_domain == trust_domain
    }
}

impl TrustDomain {
    /// Parses a trust domain name. A full SPIFFE ID is also accepted and its
    /// trust domain is extracted.
    ///
    /// # Errors
    ///
    /// Returns a [`SpiffeIdError`] if the name is empty or contains invalid characters.
    pub fn new(name: &str) -> Result<Self, SpiffeIdError> {
        if let Some(rest) = name.strip_prefix(SPIFFE_SCHEME_PREFIX) {
            let end = rest.find('/').unwrap_or(rest.len());
            return Self::new(&rest[..end]);
        }
        if name.is_empty() {
            return Err(SpiffeIdError::MissingTrustDomain);
        }
        if !name.bytes().all(is_trust_domain_byte) {
            return Err(SpiffeIdError::BadTrustDomainChar);
        }
        Ok(Self {
            name: name.to_owned(),
        })
    }

    /// Returns the bare trust domain name, e.g. `example.org`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the trust domain as a SPIFFE ID string, e.g. `spiffe://example.org`.
    pub fn id_string(&self) -> String {
        format!("{SPIFFE_SCHEME_PREFIX}{}", self.name)
    }
}

fn validate_path(path: &str) -> Result<(), SpiffeIdError> {
    if path.ends_with('/') {
        return Err(SpiffeIdError::TrailingSlash);
    }
    for segment in path.split('/').skip(1) {
        match segment {
            "" => return Err(SpiffeIdError::EmptySegment),
            "." | ".." => return Err(SpiffeIdError::DotSegment),
            s if !s.bytes().all(is_path_byte) => return Err(SpiffeIdError::BadPathSegmentChar),
            _ => {}
        }
    }
    Ok(())
}

fn is_trust_domain_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'.' | b'_')
}

fn is_path_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_')
}

impl Display for SpiffeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{SPIFFE_SCHEME_PREFIX}{}{}", self.trust_domain.name, self.path)
    }
}

impl Display for TrustDomain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for SpiffeId {
    type Err = SpiffeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl FromStr for TrustDomain {
    type Err = SpiffeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for TrustDomain {
    type Error = SpiffeIdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_ids() {
        let id = SpiffeId::new("spiffe://example.org/spire/agent/x509pop/abc").unwrap();
        assert_eq!(id.trust_domain().name(), "example.org");
        assert_eq!(id.path(), "/spire/agent/x509pop/abc");
        assert_eq!(id.to_string(), "spiffe://example.org/spire/agent/x509pop/abc");

        let td_only = SpiffeId::new("spiffe://example.org").unwrap();
        assert_eq!(td_only.path(), "");
    }

    macro_rules! invalid_id_tests {
        ($($name:ident: $value:expr,)*) => {
            $(
                #[test]
                fn $name() {
                    let (input, expected) = $value;
                    assert_eq!(SpiffeId::new(input).unwrap_err(), expected);
                }
            )*
        }
    }

    invalid_id_tests! {
        empty_id: ("", SpiffeIdError::Empty),
        wrong_scheme: ("https://example.org/a", SpiffeIdError::WrongScheme),
        missing_trust_domain: ("spiffe:///path", SpiffeIdError::MissingTrustDomain),
        uppercase_trust_domain: ("spiffe://Example.org", SpiffeIdError::BadTrustDomainChar),
        empty_segment: ("spiffe://example.org//a", SpiffeIdError::EmptySegment),
        dot_segment: ("spiffe://example.org/a/../b", SpiffeIdError::DotSegment),
        trailing_slash: ("spiffe://example.org/a/", SpiffeIdError::TrailingSlash),
        bad_path_char: ("spiffe://example.org/a$b", SpiffeIdError::BadPathSegmentChar),
    }

    #[test]
    fn trust_domain_from_id_string() {
        let td = TrustDomain::new("spiffe://example.org/workload").unwrap();
        assert_eq!(td.name(), "example.org");
        assert_eq!(td.id_string(), "spiffe://example.org");
    }

    #[test]
    fn membership() {
        let id = SpiffeId::new("spiffe://example.org/a").unwrap();
        assert!(id.is_member_of(&TrustDomain::new("example.org").unwrap()));
        assert!(!id.is_member_of(&TrustDomain::new("other.org").unwrap()));
    }
}
