//! Reconnecting identity-stream manager.
//!
//! [`StreamManager`] keeps one stream to the identity source open. It connects with
//! jittered exponential backoff and publishes each new [`ManagedStream`] to a single-slot
//! [`HandleReceiver`]: an unread handle is replaced, and closed, by a newer one.
//!
//! The transport is pluggable through [`Connector`]; [`GrpcConnector`] speaks the
//! Workload API over a UNIX socket or loopback TCP.

mod builder;
mod connector;
mod error;
mod grpc;
mod handle;
mod mailbox;
mod manager;
pub mod workload;

pub use builder::{ReconnectConfig, StreamManagerBuilder};
pub use connector::{Closable, Connector};
pub use error::{CloseError, StreamError};
pub use grpc::{GrpcCall, GrpcConnector, GrpcTransport};
pub use handle::ManagedStream;
pub use mailbox::HandleReceiver;
pub use manager::StreamManager;
