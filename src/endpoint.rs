//! Identity-stream endpoint addresses.
//!
//! Only local endpoints are dialled: a UNIX socket with an absolute path, or TCP
//! on a loopback address.

use crate::constants::SPIFFE_SOCKET_ENV;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// UNIX domain socket.
    Unix(PathBuf),

    /// TCP endpoint; the host is always an IP address.
    Tcp {
        /// IP address of the endpoint.
        host: IpAddr,
        /// TCP port of the endpoint.
        port: u16,
    },
}

/// Errors returned by [`Endpoint::parse`].
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EndpointError {
    /// The input could not be parsed as a URI.
    #[error("endpoint socket is not a valid URI")]
    Parse(#[from] url::ParseError),

    /// The URI scheme is neither `unix:` nor `tcp:`.
    #[error("endpoint socket URI scheme must be unix: or tcp:")]
    InvalidScheme,

    /// User info, query or fragment present.
    #[error("endpoint socket URI must not include user info, query values or a fragment")]
    UnexpectedComponent,

    /// UNIX endpoints must not include an authority.
    #[error("unix: endpoint socket URI must not include an authority")]
    UnixAuthorityNotAllowed,

    /// UNIX endpoints must include an absolute path.
    #[error("unix: endpoint socket URI must include an absolute path")]
    UnixMissingPath,

    /// TCP endpoints must use an IP address.
    #[error("tcp: endpoint socket URI host must be an IP address")]
    TcpHostNotIp,

    /// TCP endpoints must include a port.
    #[error("tcp: endpoint socket URI must include a port")]
    TcpMissingPort,

    /// TCP endpoints must not include a path.
    #[error("tcp: endpoint socket URI must not include a path")]
    TcpUnexpectedPath,

    /// The endpoint environment variable is unset.
    #[error("{SPIFFE_SOCKET_ENV} is not set")]
    MissingEnv,
}

impl Endpoint {
    /// Parses an endpoint URI.
    ///
    /// Accepts `unix:///path`, `unix:/path`, `tcp://1.2.3.4:8081` and `tcp:1.2.3.4:8081`.
    ///
    /// # Errors
    ///
    /// Returns an [`EndpointError`] if the URI is malformed or breaks the rules of its scheme.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(&normalize_endpoint_uri(input))?;

        if !url.username().is_empty() || url.query().is_some() || url.fragment().is_some() {
            return Err(EndpointError::UnexpectedComponent);
        }

        match url.scheme() {
            "unix" => {
                if url.host_str().is_some_and(|h| !h.is_empty()) {
                    return Err(EndpointError::UnixAuthorityNotAllowed);
                }
                let path = url.path();
                if path.len() < 2 || !path.starts_with('/') {
                    return Err(EndpointError::UnixMissingPath);
                }
                Ok(Self::Unix(PathBuf::from(path)))
            }
            "tcp" => {
                let host = match url.host() {
                    Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip),
                    Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip),
                    Some(url::Host::Domain(domain)) => {
                        IpAddr::from_str(domain).map_err(|_| EndpointError::TcpHostNotIp)?
                    }
                    None => return Err(EndpointError::TcpHostNotIp),
                };
                let port = url.port().ok_or(EndpointError::TcpMissingPort)?;
                if !matches!(url.path(), "" | "/") {
                    return Err(EndpointError::TcpUnexpectedPath);
                }
                Ok(Self::Tcp { host, port })
            }
            _ => Err(EndpointError::InvalidScheme),
        }
    }

    /// Reads the endpoint from `SPIFFE_ENDPOINT_SOCKET`.
    ///
    /// # Errors
    ///
    /// Fails if the variable is unset or does not parse.
    pub fn from_env() -> Result<Self, EndpointError> {
        let value = std::env::var(SPIFFE_SOCKET_ENV).map_err(|_| EndpointError::MissingEnv)?;
        Self::parse(&value)
    }

    /// Returns `true` for an absolute-path UNIX socket or a loopback TCP address.
    pub fn is_local(&self) -> bool {
        match self {
            Self::Unix(path) => path.is_absolute(),
            Self::Tcp { host, .. } => host.is_loopback(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp {
                host: IpAddr::V6(ip),
                port,
            } => write!(f, "tcp://[{ip}]:{port}"),
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
        }
    }
}

fn normalize_endpoint_uri(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("unix:/") {
        if !rest.starts_with('/') {
            return format!("unix:///{rest}");
        }
    }
    if let Some(rest) = input.strip_prefix("tcp:") {
        if !rest.starts_with("//") {
            return format!("tcp://{rest}");
        }
    }
    input.to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_unix_forms() {
        let expected = Endpoint::Unix(PathBuf::from("/tmp/agent.sock"));
        assert_eq!(Endpoint::parse("unix:///tmp/agent.sock").unwrap(), expected);
        assert_eq!(Endpoint::parse("unix:/tmp/agent.sock").unwrap(), expected);
        assert!(expected.is_local());
    }

    #[test]
    fn parse_tcp_forms() {
        let ep = Endpoint::parse("tcp:127.0.0.1:8081").unwrap();
        assert_eq!(
            ep,
            Endpoint::Tcp {
                host: "127.0.0.1".parse().unwrap(),
                port: 8081
            }
        );
        assert!(ep.is_local());
        assert_eq!(ep.to_string(), "tcp://127.0.0.1:8081");

        let v6 = Endpoint::parse("tcp://[::1]:9000").unwrap();
        assert!(v6.is_local());
        assert_eq!(v6.to_string(), "tcp://[::1]:9000");
    }

    #[test]
    fn non_loopback_tcp_is_not_local() {
        let ep = Endpoint::parse("tcp://10.0.0.5:8081").unwrap();
        assert!(!ep.is_local());
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            Endpoint::parse("http://127.0.0.1:80"),
            Err(EndpointError::InvalidScheme)
        );
        assert_eq!(
            Endpoint::parse("unix://host/sock"),
            Err(EndpointError::UnixAuthorityNotAllowed)
        );
        assert_eq!(
            Endpoint::parse("unix:///"),
            Err(EndpointError::UnixMissingPath)
        );
        assert_eq!(
            Endpoint::parse("tcp://localhost:80"),
            Err(EndpointError::TcpHostNotIp)
        );
        assert_eq!(
            Endpoint::parse("tcp://127.0.0.1"),
            Err(EndpointError::TcpMissingPort)
        );
        assert_eq!(
            Endpoint::parse("tcp://127.0.0.1:80/path"),
            Err(EndpointError::TcpUnexpectedPath)
        );
        assert_eq!(
            Endpoint::parse("unix:///sock?x=1"),
            Err(EndpointError::UnexpectedComponent)
        );
        assert!(matches!(
            Endpoint::parse("not a uri"),
            Err(EndpointError::Parse(_))
        ));
    }
}
