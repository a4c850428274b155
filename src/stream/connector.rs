//! Transport seam for the stream manager.

use crate::endpoint::Endpoint;
use crate::BoxError;
use std::future::Future;

/// A resource that must be released explicitly.
pub trait Closable {
    /// Releases the resource. Closing twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns the underlying failure; the resource is considered released regardless.
    fn close(&mut self) -> Result<(), BoxError>;
}

/// Dials a transport and opens the identity stream over it.
pub trait Connector: Send + Sync + 'static {
    /// The connected transport, e.g. a gRPC channel.
    type Transport: Closable + Send + 'static;

    /// The open streaming call.
    type Call: Closable + Send + 'static;

    /// Connects to `endpoint`.
    fn dial(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Transport, BoxError>> + Send;

    /// Opens the identity stream over `transport`.
    fn open_stream(
        &self,
        transport: &Self::Transport,
    ) -> impl Future<Output = Result<Self::Call, BoxError>> + Send;
}
