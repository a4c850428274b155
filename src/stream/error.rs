//! Errors for the stream manager.

use crate::endpoint::EndpointError;
use crate::BoxError;
use std::fmt;

/// Errors returned by the [`StreamManager`](super::StreamManager).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StreamError {
    /// The endpoint address does not parse.
    #[error("invalid stream endpoint")]
    Configuration(#[from] EndpointError),

    /// The endpoint is not a local address.
    #[error("stream endpoint must be local (unix socket or loopback tcp): {endpoint}")]
    NotLocal {
        /// The rejected endpoint.
        endpoint: String,
    },

    /// Dialling the transport failed.
    #[error("failed to dial identity stream transport")]
    Dial(#[source] BoxError),

    /// The transport was dialled but opening the stream failed.
    #[error("failed to open identity stream")]
    OpenStream(#[source] BoxError),

    /// The owner cancelled the manager.
    #[error("stream manager cancelled")]
    Cancelled,

    /// `start()` was called while the manager was already starting or running.
    #[error("stream manager already started")]
    AlreadyStarted,
}

/// Failures while closing a [`ManagedStream`](super::ManagedStream).
///
/// Both halves are always closed; each failure is kept.
#[derive(Debug)]
pub struct CloseError {
    /// Failure closing the streaming call.
    pub call: Option<BoxError>,
    /// Failure closing the transport.
    pub transport: Option<BoxError>,
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to close stream handle")?;
        if let Some(e) = &self.call {
            write!(f, "; call: {e}")?;
        }
        if let Some(e) = &self.transport {
            write!(f, "; transport: {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.call
            .as_deref()
            .or(self.transport.as_deref())
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
