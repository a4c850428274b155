#![allow(clippy::unwrap_used, clippy::expect_used)]

use parking_lot::Mutex;
use spiffe_agent::stream::{Closable, Connector, GrpcConnector, StreamError, StreamManager};
use spiffe_agent::{BoxError, Endpoint, MetricsErrorKind, MetricsRecorder};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const ENDPOINT: &str = "unix:///tmp/spiffe-agent-test/api.sock";

#[derive(Clone, Default)]
struct FakeConnector {
    state: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    dial_failures: AtomicUsize,
    open_failures: AtomicUsize,
    fail_close: AtomicBool,
    dials: Mutex<Vec<Instant>>,
    closed: Mutex<Vec<String>>,
}

impl FakeConnector {
    fn failing_dials(n: usize) -> Self {
        let connector = Self::default();
        connector.state.dial_failures.store(n, Ordering::SeqCst);
        connector
    }

    fn dial_times(&self) -> Vec<Instant> {
        self.state.dials.lock().clone()
    }

    fn closed(&self) -> Vec<String> {
        self.state.closed.lock().clone()
    }
}

struct FakeTransport {
    id: usize,
    state: Arc<FakeState>,
}

struct FakeCall {
    id: usize,
    state: Arc<FakeState>,
}

fn close_part(state: &FakeState, name: String) -> Result<(), BoxError> {
    state.closed.lock().push(name.clone());
    if state.fail_close.load(Ordering::SeqCst) {
        return Err(io::Error::other(format!("{name} refused to close")).into());
    }
    Ok(())
}

impl Closable for FakeTransport {
    fn close(&mut self) -> Result<(), BoxError> {
        close_part(&self.state, format!("transport-{}", self.id))
    }
}

impl Closable for FakeCall {
    fn close(&mut self) -> Result<(), BoxError> {
        close_part(&self.state, format!("call-{}", self.id))
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;
    type Call = FakeCall;

    async fn dial(&self, _endpoint: &Endpoint) -> Result<FakeTransport, BoxError> {
        let id = {
            let mut dials = self.state.dials.lock();
            dials.push(Instant::now());
            dials.len()
        };
        if take_failure(&self.state.dial_failures) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "agent down").into());
        }
        Ok(FakeTransport {
            id,
            state: Arc::clone(&self.state),
        })
    }

    async fn open_stream(&self, transport: &FakeTransport) -> Result<FakeCall, BoxError> {
        if take_failure(&self.state.open_failures) {
            return Err(io::Error::other("stream rejected").into());
        }
        Ok(FakeCall {
            id: transport.id,
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Default)]
struct Recorder {
    reconnects: AtomicUsize,
    errors: Mutex<Vec<MetricsErrorKind>>,
}

impl MetricsRecorder for Recorder {
    fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn record_rotation(&self) {}

    fn record_error(&self, kind: MetricsErrorKind) {
        self.errors.lock().push(kind);
    }
}

#[tokio::test(start_paused = true)]
async fn start_publishes_first_handle() {
    let connector = FakeConnector::default();
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .build()
        .unwrap();

    assert!(!manager.is_running());
    manager.start().await.unwrap();
    assert!(manager.is_running());
    assert!(manager.is_connected());

    let handle = handles.recv().await.unwrap();
    assert_eq!(handle.generation(), 1);
    assert_eq!(handle.call().id, 1);
    assert_eq!(handle.transport().id, 1);

    assert!(matches!(
        manager.start().await,
        Err(StreamError::AlreadyStarted)
    ));
    assert_eq!(connector.dial_times().len(), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_between_failed_attempts() {
    let connector = FakeConnector::failing_dials(3);
    let metrics = Arc::new(Recorder::default());
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .reconnect_backoff(Duration::from_millis(100), Duration::from_secs(1))
        .metrics(metrics.clone())
        .build()
        .unwrap();

    manager.start().await.unwrap();
    assert_eq!(handles.recv().await.unwrap().generation(), 1);

    let dials = connector.dial_times();
    assert_eq!(dials.len(), 4);
    let gaps: Vec<Duration> = dials.windows(2).map(|w| w[1] - w[0]).collect();

    assert!(gaps[0] >= Duration::from_millis(100) && gaps[0] <= Duration::from_millis(101));
    assert!(gaps[1] >= Duration::from_millis(200) && gaps[1] <= Duration::from_millis(221));
    assert!(gaps[2] >= Duration::from_millis(400) && gaps[2] <= Duration::from_millis(485));

    assert_eq!(*metrics.errors.lock(), vec![MetricsErrorKind::Dial; 3]);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped_at_max() {
    let connector = FakeConnector::failing_dials(6);
    let (manager, _handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .reconnect_backoff(Duration::from_millis(100), Duration::from_millis(300))
        .build()
        .unwrap();

    manager.start().await.unwrap();

    let dials = connector.dial_times();
    for gap in dials.windows(2).map(|w| w[1] - w[0]) {
        assert!(gap <= Duration::from_millis(301), "gap {gap:?} exceeds max backoff");
    }
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_delivers_exactly_one_new_handle() {
    let connector = FakeConnector::default();
    let metrics = Arc::new(Recorder::default());
    let (tx, mut connectivity) = mpsc::unbounded_channel();
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .connectivity(tx)
        .metrics(metrics.clone())
        .build()
        .unwrap();

    manager.start().await.unwrap();
    let first = handles.recv().await.unwrap();

    // Both requests land before the loop runs; the second is absorbed.
    manager.reconnect();
    manager.reconnect();

    let second = handles.recv().await.unwrap();
    assert_eq!(second.generation(), 2);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(handles.try_recv().is_none());
    assert_eq!(connector.dial_times().len(), 2);
    assert_eq!(metrics.reconnects.load(Ordering::SeqCst), 1);

    assert_eq!(connectivity.recv().await, Some(true));
    assert_eq!(connectivity.recv().await, Some(false));
    assert_eq!(connectivity.recv().await, Some(true));
    assert!(connectivity.try_recv().is_err());

    first.close().unwrap();
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unread_handle_is_closed_when_replaced() {
    let connector = FakeConnector::default();
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .build()
        .unwrap();

    manager.start().await.unwrap();
    manager.reconnect();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let current = handles.try_recv().unwrap();
    assert_eq!(current.generation(), 2);

    let closed = connector.closed();
    assert!(closed.contains(&"call-1".to_string()));
    assert!(closed.contains(&"transport-1".to_string()));
    assert!(!closed.iter().any(|c| c.ends_with("-2")));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_open_closes_transport_and_retries() {
    let connector = FakeConnector::default();
    connector.state.open_failures.store(1, Ordering::SeqCst);
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .build()
        .unwrap();

    manager.start().await.unwrap();

    let handle = handles.recv().await.unwrap();
    assert_eq!(handle.generation(), 1);
    assert_eq!(handle.transport().id, 2);
    assert_eq!(connector.closed(), vec!["transport-1".to_string()]);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn capped_start_fails_and_can_be_retried() {
    let connector = FakeConnector::failing_dials(usize::MAX);
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .max_initial_attempts(3)
        .build()
        .unwrap();

    let err = manager.start().await.unwrap_err();
    assert!(matches!(err, StreamError::Dial(_)), "{err:?}");
    assert_eq!(connector.dial_times().len(), 3);
    assert!(!manager.is_running());
    assert!(!manager.is_connected());

    // No loop is running, so this is a no-op.
    manager.reconnect();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.dial_times().len(), 3);

    connector.state.dial_failures.store(0, Ordering::SeqCst);
    manager.start().await.unwrap();
    assert_eq!(handles.recv().await.unwrap().generation(), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_stops_start() {
    let connector = FakeConnector::failing_dials(usize::MAX);
    let owner = CancellationToken::new();
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .reconnect_backoff(Duration::from_millis(100), Duration::from_secs(10))
        .cancellation_token(&owner)
        .build()
        .unwrap();

    let canceller = {
        let owner = owner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            owner.cancel();
        })
    };

    let started = Instant::now();
    assert!(matches!(manager.start().await, Err(StreamError::Cancelled)));
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(handles.recv().await.is_none());
    assert!(handles.is_closed());

    canceller.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_during_reconnect_backoff_stops_loop() {
    let connector = FakeConnector::default();
    let owner = CancellationToken::new();
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .reconnect_backoff(Duration::from_millis(100), Duration::from_secs(10))
        .cancellation_token(&owner)
        .build()
        .unwrap();

    manager.start().await.unwrap();
    let first = handles.recv().await.unwrap();

    connector.state.dial_failures.store(usize::MAX, Ordering::SeqCst);
    manager.reconnect();

    // Dials at 0ms, 100ms and ~300ms; cancel while sleeping before the fourth.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(manager.is_running());
    assert!(!manager.is_connected());
    owner.cancel();

    assert!(handles.recv().await.is_none());
    assert!(!manager.is_running());

    let dials = connector.dial_times().len();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.dial_times().len(), dials);
    assert!(handles.try_recv().is_none());

    first.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancelling_owner_stops_running_loop() {
    let connector = FakeConnector::default();
    let owner = CancellationToken::new();
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .cancellation_token(&owner)
        .build()
        .unwrap();

    manager.start().await.unwrap();
    owner.cancel();

    // The unread handle is closed when the loop exits.
    while !handles.is_closed() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!manager.is_running());
    assert!(!manager.is_connected());
    assert!(connector.closed().contains(&"call-1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_mailbox() {
    let connector = FakeConnector::default();
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector)
        .build()
        .unwrap();

    manager.start().await.unwrap();
    let handle = handles.recv().await.unwrap();

    manager.shutdown().await;
    assert!(!manager.is_running());
    assert!(handles.recv().await.is_none());

    manager.reconnect();
    handle.close().unwrap();
}

#[tokio::test]
async fn close_reports_both_failures() {
    let connector = FakeConnector::default();
    let (manager, handles) = StreamManager::builder(ENDPOINT, connector.clone())
        .build()
        .unwrap();
    manager.start().await.unwrap();
    let handle = handles.recv().await.unwrap();

    connector.state.fail_close.store(true, Ordering::SeqCst);
    let err = handle.close().unwrap_err();

    assert!(err.call.is_some());
    assert!(err.transport.is_some());
    let msg = err.to_string();
    assert!(msg.contains("call-1 refused to close"), "{msg}");
    assert!(msg.contains("transport-1 refused to close"), "{msg}");
    assert_eq!(connector.closed(), vec!["call-1", "transport-1"]);

    connector.state.fail_close.store(false, Ordering::SeqCst);
    manager.shutdown().await;
}

#[test]
fn build_rejects_remote_and_malformed_endpoints() {
    let err = StreamManager::builder("tcp://10.0.0.1:8081", FakeConnector::default())
        .build()
        .unwrap_err();
    assert!(matches!(err, StreamError::NotLocal { .. }), "{err:?}");

    let err = StreamManager::builder("http://localhost/agent", FakeConnector::default())
        .build()
        .unwrap_err();
    assert!(matches!(err, StreamError::Configuration(_)), "{err:?}");

    let (manager, _handles) =
        StreamManager::builder("tcp://127.0.0.1:8081", FakeConnector::default())
            .build()
            .unwrap();
    assert_eq!(manager.endpoint().to_string(), "tcp://127.0.0.1:8081");
}

#[cfg(unix)]
#[tokio::test]
async fn grpc_connector_reports_dial_failure() {
    let path = std::env::temp_dir().join(format!("spiffe-agent-missing-{}.sock", fastrand::u64(..)));
    let (manager, _handles) =
        StreamManager::builder(format!("unix://{}", path.display()), GrpcConnector)
            .max_initial_attempts(1)
            .build()
            .unwrap();

    let err = manager.start().await.unwrap_err();
    assert!(matches!(err, StreamError::Dial(_)), "{err:?}");
    assert!(!manager.is_running());
}
