#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

//! Agent-side lifecycle for SPIFFE X.509 identities.
//!
//! The crate keeps an agent's own identity alive and delivers identities to local
//! workloads:
//!
//! - [`Manager`] attests, caches the SVID and trust bundle, and rotates the SVID before
//!   it expires or when the bundle stops covering it;
//! - [`StreamManager`] keeps an identity stream to a local endpoint open, reconnecting
//!   with backoff;
//! - [`DrainCoordinator`] tracks in-flight requests so shutdown can wait for them;
//! - [`BundleCache`] bounds the cost of repeated bundle lookups.
//!
//! ```no_run
//! use spiffe_agent::stream::GrpcConnector;
//! use spiffe_agent::{DrainCoordinator, StreamManager};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let shutdown = CancellationToken::new();
//! let (streams, handles) = StreamManager::builder("unix:///run/spire/agent.sock", GrpcConnector)
//!     .cancellation_token(&shutdown)
//!     .build()?;
//! streams.start().await?;
//!
//! let drain = DrainCoordinator::new();
//! let permit = drain.inc()?;
//! let handle = handles.recv().await.ok_or("stream closed")?;
//! println!("serving on stream generation {}", handle.generation());
//! permit.done();
//!
//! drain.wait(&shutdown).await?;
//! streams.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`logging`** (default): diagnostics through the `log` facade
//! - **`tracing`**: diagnostics through `tracing` (takes precedence over `logging`)

mod observability;
mod prelude;
mod supervisor;

pub mod bundle;
pub mod bundle_cache;
pub mod cert;
pub mod clock;
pub mod constants;
pub mod drain;
pub mod endpoint;
pub mod manager;
pub mod metrics;
pub mod spiffe_id;
pub mod stream;
pub mod svid;

/// Boxed error used where third-party failures cross a trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use crate::{
    bundle::{X509Bundle, X509BundleError},
    bundle_cache::BundleCache,
    cert::{Certificate, PrivateKey},
    clock::{Clock, ManualClock, SystemClock},
    drain::{DrainCoordinator, DrainError, DrainPermit},
    endpoint::{Endpoint, EndpointError},
    manager::{Manager, ManagerBuilder, ManagerError, RotationError},
    metrics::{MetricsErrorKind, MetricsRecorder},
    spiffe_id::{SpiffeId, SpiffeIdError, TrustDomain},
    stream::{HandleReceiver, ManagedStream, StreamError, StreamManager},
    svid::{X509Svid, X509SvidError},
};
