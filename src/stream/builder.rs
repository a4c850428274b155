use super::connector::Connector;
use super::error::StreamError;
use super::handle::ManagedStream;
use super::mailbox::{self, HandleReceiver};
use super::manager::{Inner, StreamManager};
use crate::constants::{DEFAULT_MAX_BACKOFF, DEFAULT_MIN_BACKOFF};
use crate::endpoint::Endpoint;
use crate::metrics::MetricsRecorder;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Reconnect behavior for the stream manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Initial delay before retrying.
    pub min_backoff: Duration,
    /// Maximum delay between retries.
    pub max_backoff: Duration,
    /// Cap on attempts made by [`StreamManager::start`]. `None` retries until cancelled.
    pub max_initial_attempts: Option<NonZeroU32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_initial_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Swaps the bounds if `min_backoff > max_backoff`.
    pub(crate) fn normalize(mut self) -> Self {
        if self.min_backoff > self.max_backoff {
            std::mem::swap(&mut self.min_backoff, &mut self.max_backoff);
        }
        self
    }
}

/// Builder for [`StreamManager`].
///
/// # Example
///
/// ```no_run
/// use spiffe_agent::stream::{GrpcConnector, StreamManager};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let (manager, handles) =
///     StreamManager::builder("unix:///tmp/spire-agent/public/api.sock", GrpcConnector)
///         .max_initial_attempts(5)
///         .build()?;
/// manager.start().await?;
///
/// while let Some(mut handle) = handles.recv().await {
///     while let Ok(Some(update)) = handle.call_mut().message().await {
///         println!("received {} svid(s)", update.svids.len());
///     }
///     manager.reconnect();
/// }
/// # Ok(())
/// # }
/// ```
pub struct StreamManagerBuilder<C: Connector> {
    endpoint: String,
    connector: C,
    reconnect: ReconnectConfig,
    cancel: Option<CancellationToken>,
    connectivity: Option<mpsc::UnboundedSender<bool>>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl<C: Connector> StreamManagerBuilder<C> {
    pub(crate) fn new(endpoint: String, connector: C) -> Self {
        Self {
            endpoint,
            connector,
            reconnect: ReconnectConfig::default(),
            cancel: None,
            connectivity: None,
            metrics: None,
        }
    }

    /// Sets the retry backoff bounds. Inverted bounds are swapped.
    #[must_use]
    pub fn reconnect_backoff(mut self, min_backoff: Duration, max_backoff: Duration) -> Self {
        self.reconnect.min_backoff = min_backoff;
        self.reconnect.max_backoff = max_backoff;
        self
    }

    /// Caps the attempts made by `start()`. Zero means unbounded.
    #[must_use]
    pub fn max_initial_attempts(mut self, attempts: u32) -> Self {
        self.reconnect.max_initial_attempts = NonZeroU32::new(attempts);
        self
    }

    /// Ties the manager to `owner`: cancelling it stops the manager.
    #[must_use]
    pub fn cancellation_token(mut self, owner: &CancellationToken) -> Self {
        self.cancel = Some(owner.child_token());
        self
    }

    /// Receives `true` on each successful connect and `false` when a reconnect begins.
    #[must_use]
    pub fn connectivity(mut self, tx: mpsc::UnboundedSender<bool>) -> Self {
        self.connectivity = Some(tx);
        self
    }

    /// Reports reconnects and errors to `metrics`.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates the endpoint and builds the manager with its handle mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Configuration`] if the endpoint does not parse, or
    /// [`StreamError::NotLocal`] if it is not a local address.
    pub fn build(self) -> Result<(StreamManager<C>, HandleReceiver<ManagedStream<C>>), StreamError> {
        let endpoint = Endpoint::parse(&self.endpoint)?;
        if !endpoint.is_local() {
            return Err(StreamError::NotLocal {
                endpoint: endpoint.to_string(),
            });
        }

        let (slot, handles) = mailbox::channel();
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let (connected, _) = watch::channel(false);

        let inner = Inner {
            connector: self.connector,
            endpoint,
            reconnect: self.reconnect.normalize(),
            slot,
            reconnect_tx,
            connectivity: self.connectivity,
            connected,
            cancel: self.cancel.unwrap_or_default(),
            metrics: self.metrics,
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        };

        Ok((StreamManager::from_parts(inner, reconnect_rx), handles))
    }
}

impl<C: Connector> fmt::Debug for StreamManagerBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamManagerBuilder")
            .field("endpoint", &self.endpoint)
            .field("reconnect", &self.reconnect)
            .field("metrics", &self.metrics.as_ref().map(|_| "<MetricsRecorder>"))
            .finish_non_exhaustive()
    }
}
