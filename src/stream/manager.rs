use super::builder::{ReconnectConfig, StreamManagerBuilder};
use super::connector::{Closable, Connector};
use super::error::StreamError;
use super::handle::ManagedStream;
use super::mailbox::HandleSlot;
use crate::endpoint::Endpoint;
use crate::metrics::{MetricsErrorKind, MetricsRecorder};
use crate::prelude::{debug, info, warn};
use crate::supervisor::{next_backoff, sleep_or_cancel, ErrorKey, ErrorTracker};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Keeps one identity stream open, reconnecting with backoff when asked to.
///
/// New handles are published to the [`HandleReceiver`](super::HandleReceiver) returned by
/// [`StreamManagerBuilder::build`]. The reader reports a broken stream by calling
/// [`reconnect`](Self::reconnect).
///
/// Dropping the manager cancels it; [`shutdown`](Self::shutdown) also waits for the
/// background task to exit.
pub struct StreamManager<C: Connector> {
    inner: Arc<Inner<C>>,
    reconnect_rx: Mutex<Option<mpsc::Receiver<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

pub(super) struct Inner<C: Connector> {
    pub(super) connector: C,
    pub(super) endpoint: Endpoint,
    pub(super) reconnect: ReconnectConfig,
    pub(super) slot: HandleSlot<ManagedStream<C>>,
    pub(super) reconnect_tx: mpsc::Sender<()>,
    pub(super) connectivity: Option<mpsc::UnboundedSender<bool>>,
    pub(super) connected: watch::Sender<bool>,
    pub(super) cancel: CancellationToken,
    pub(super) metrics: Option<Arc<dyn MetricsRecorder>>,
    pub(super) started: AtomicBool,
    pub(super) running: AtomicBool,
    pub(super) generation: AtomicU64,
}

impl<C: Connector> StreamManager<C> {
    /// Starts building a manager for `endpoint` (e.g. `unix:///run/agent.sock`).
    pub fn builder(endpoint: impl Into<String>, connector: C) -> StreamManagerBuilder<C> {
        StreamManagerBuilder::new(endpoint.into(), connector)
    }

    pub(super) fn from_parts(inner: Inner<C>, reconnect_rx: mpsc::Receiver<()>) -> Self {
        Self {
            inner: Arc::new(inner),
            reconnect_rx: Mutex::new(Some(reconnect_rx)),
            task: Mutex::new(None),
        }
    }

    /// Connects, publishes the first handle, then spawns the reconnect loop.
    ///
    /// Retries with backoff until a connect succeeds, the attempt cap is reached, or the
    /// manager is cancelled. On failure no background loop is running.
    ///
    /// # Errors
    ///
    /// [`StreamError::AlreadyStarted`] if called again after a successful start;
    /// otherwise the last connect error or [`StreamError::Cancelled`].
    pub async fn start(&self) -> Result<(), StreamError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(StreamError::AlreadyStarted);
        }

        let max_attempts = self.inner.reconnect.max_initial_attempts;
        let stream = match connect_with_retry(&self.inner, max_attempts).await {
            Ok(stream) => stream,
            Err(e) => {
                if matches!(e, StreamError::Cancelled) {
                    self.inner.close_mailbox();
                } else {
                    self.inner.started.store(false, Ordering::Release);
                }
                warn!("Failed to start identity stream: error={}", e);
                return Err(e);
            }
        };

        let Some(reconnect_rx) = self.reconnect_rx.lock().take() else {
            let _ = stream.close();
            return Err(StreamError::AlreadyStarted);
        };

        self.inner.deliver(stream);
        self.inner.set_connected(true);

        self.inner.running.store(true, Ordering::Release);
        let inner = Arc::clone(&self.inner);
        *self.task.lock() = Some(tokio::spawn(run_loop(inner, reconnect_rx)));

        info!("Identity stream started: endpoint={}", self.inner.endpoint);
        Ok(())
    }

    /// Asks the background loop to replace the current stream.
    ///
    /// Never blocks. A request already pending absorbs this one, and before a
    /// successful `start()` the call does nothing.
    pub fn reconnect(&self) {
        if !self.inner.running.load(Ordering::Acquire) {
            debug!("Ignoring reconnect request: stream manager is not running");
            return;
        }
        let _ = self.inner.reconnect_tx.try_send(());
    }

    /// Returns `true` while a handle from the latest connect is current.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Returns `true` while the background loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// The endpoint this manager dials.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Cancels the manager and waits for the background loop to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Stream manager task failed during shutdown: error={}", e);
            }
        } else {
            self.inner.close_mailbox();
        }
    }
}

impl<C: Connector> Drop for StreamManager<C> {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl<C: Connector> fmt::Debug for StreamManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamManager")
            .field("endpoint", &self.inner.endpoint)
            .field("running", &self.is_running())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Inner<C> {
    fn deliver(&self, stream: ManagedStream<C>) {
        if let Some(stale) = self.slot.send(stream) {
            self.close_stale(stale);
        }
    }

    fn close_mailbox(&self) {
        if let Some(stale) = self.slot.close() {
            self.close_stale(stale);
        }
    }

    fn close_stale(&self, stale: ManagedStream<C>) {
        let generation = stale.generation();
        if let Err(e) = stale.close() {
            warn!(
                "Failed to close unread stream handle: generation={}, error={}",
                generation, e
            );
            self.record_error(MetricsErrorKind::Close);
        }
    }

    fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
        if let Some(tx) = &self.connectivity {
            let _ = tx.send(connected);
        }
    }

    fn record_error(&self, kind: MetricsErrorKind) {
        if let Some(m) = &self.metrics {
            m.record_error(kind);
        }
    }
}

async fn run_loop<C: Connector>(inner: Arc<Inner<C>>, mut reconnect_rx: mpsc::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            signal = reconnect_rx.recv() => {
                if signal.is_none() {
                    break;
                }
                inner.set_connected(false);
                if let Some(m) = &inner.metrics {
                    m.record_reconnect();
                }
                match connect_with_retry(&inner, None).await {
                    Ok(stream) => {
                        inner.deliver(stream);
                        inner.set_connected(true);
                    }
                    Err(_) => break,
                }
            }
        }
    }

    inner.running.store(false, Ordering::Release);
    inner.connected.send_replace(false);
    inner.close_mailbox();
    debug!("Stream manager loop exited: endpoint={}", inner.endpoint);
}

/// Dials and opens a stream until one attempt succeeds.
///
/// `max_attempts` of `None` retries until cancelled.
async fn connect_with_retry<C: Connector>(
    inner: &Inner<C>,
    max_attempts: Option<NonZeroU32>,
) -> Result<ManagedStream<C>, StreamError> {
    let mut backoff = inner.reconnect.min_backoff;
    let mut tracker = ErrorTracker::default();
    let mut attempt: u32 = 0;

    loop {
        if inner.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        attempt = attempt.saturating_add(1);

        let err = match try_connect(inner, backoff, &mut tracker).await {
            Ok(stream) => return Ok(stream),
            Err(StreamError::Cancelled) => return Err(StreamError::Cancelled),
            Err(e) => e,
        };

        if max_attempts.is_some_and(|max| attempt >= max.get()) {
            return Err(err);
        }
        if sleep_or_cancel(&inner.cancel, backoff).await {
            return Err(StreamError::Cancelled);
        }
        backoff = next_backoff(backoff, inner.reconnect.max_backoff);
    }
}

async fn try_connect<C: Connector>(
    inner: &Inner<C>,
    backoff: Duration,
    tracker: &mut ErrorTracker,
) -> Result<ManagedStream<C>, StreamError> {
    let dialled = cancellable(&inner.cancel, inner.connector.dial(&inner.endpoint)).await?;
    let mut transport = match dialled {
        Ok(transport) => transport,
        Err(e) => {
            log_failure(tracker, ErrorKey::Dial, &*e, backoff);
            inner.record_error(MetricsErrorKind::Dial);
            return Err(StreamError::Dial(e));
        }
    };

    let opened = match cancellable(&inner.cancel, inner.connector.open_stream(&transport)).await {
        Ok(opened) => opened,
        Err(cancelled) => {
            let _ = transport.close();
            return Err(cancelled);
        }
    };
    let call = match opened {
        Ok(call) => call,
        Err(e) => {
            if let Err(close_err) = transport.close() {
                debug!("Failed to close transport after open failure: error={}", close_err);
            }
            log_failure(tracker, ErrorKey::OpenStream, &*e, backoff);
            inner.record_error(MetricsErrorKind::OpenStream);
            return Err(StreamError::OpenStream(e));
        }
    };

    if tracker.consecutive_count() > 0 {
        info!(
            "Identity stream recovered after {} consecutive failures",
            tracker.consecutive_count()
        );
    }
    tracker.reset();

    let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
    debug!(
        "Connected to identity stream: endpoint={}, generation={}",
        inner.endpoint, generation
    );
    Ok(ManagedStream::new(call, transport, generation))
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, StreamError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StreamError::Cancelled),
        out = fut => Ok(out),
    }
}

fn log_failure(
    tracker: &mut ErrorTracker,
    kind: ErrorKey,
    error: &(dyn std::error::Error + Send + Sync),
    backoff: Duration,
) {
    let what = match kind {
        ErrorKey::Dial => "dial identity stream transport",
        _ => "open identity stream",
    };
    if tracker.record_error(kind) {
        warn!(
            "Failed to {}; retrying: error={}, backoff_ms={}",
            what,
            error,
            backoff.as_millis()
        );
    } else {
        debug!(
            "Failed to {} (repeated); retrying: error={}, backoff_ms={}, consecutive_failures={}",
            what,
            error,
            backoff.as_millis(),
            tracker.consecutive_count()
        );
    }
}
