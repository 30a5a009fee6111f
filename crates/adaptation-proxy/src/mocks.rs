//! Mock implementations for unit testing without a real NATS server.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! adaptation-proxy = { path = "...", features = ["test-support"] }
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use adaptation_nats::{ConnectionStatus, ConnectionWatch};
use bytes::Bytes;
use futures::channel::mpsc;
use tokio::sync::watch;

use crate::envelope::Metadata;
use crate::identity::RequestIdentity;
use crate::stager::{StagedInput, StagingError};
use crate::traits::{BrokerConnection, BrokerConnector, FileStager, ReplyDelivery};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const POLL_LIMIT: Duration = Duration::from_secs(5);

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(POLL_LIMIT, async {
        while !done() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

// ── MockBroker ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct MockBrokerError(pub String);

/// A request captured by [`MockBroker`].
#[derive(Debug, Clone)]
pub struct PublishedRequest {
    pub metadata: Metadata,
    pub payload: Vec<u8>,
}

type Responder = Box<dyn Fn(&Metadata) -> Option<Metadata> + Send + Sync>;
type DeliverySender = mpsc::UnboundedSender<Result<MockDelivery, MockBrokerError>>;
type Deliveries = mpsc::UnboundedReceiver<Result<MockDelivery, MockBrokerError>>;

struct BrokerState {
    published: Mutex<Vec<PublishedRequest>>,
    replies_tx: Mutex<Option<DeliverySender>>,
    replies_rx: Mutex<Option<Deliveries>>,
    responder: Mutex<Option<Responder>>,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    connects: AtomicUsize,
    acks: Arc<AtomicUsize>,
    status: watch::Sender<ConnectionStatus>,
    watch: ConnectionWatch,
}

/// In-process broker. Acts as both connector and connection.
///
/// Replies are queued with [`inject`](Self::inject) or produced by a
/// [`respond_with`](Self::respond_with) closure as each request is published.
#[derive(Clone)]
pub struct MockBroker {
    state: Arc<BrokerState>,
}

impl Default for MockBroker {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded();
        let (status, watch) = ConnectionWatch::channel();
        Self {
            state: Arc::new(BrokerState {
                published: Mutex::new(Vec::new()),
                replies_tx: Mutex::new(Some(tx)),
                replies_rx: Mutex::new(Some(rx)),
                responder: Mutex::new(None),
                fail_connect: AtomicBool::new(false),
                fail_publish: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                acks: Arc::new(AtomicUsize::new(0)),
                status,
                watch,
            }),
        }
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers each published request with the closure's reply, if any.
    pub fn respond_with(
        &self,
        responder: impl Fn(&Metadata) -> Option<Metadata> + Send + Sync + 'static,
    ) {
        *self.state.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// Queues a reply carried in headers.
    pub fn inject(&self, headers: Metadata) {
        self.inject_raw(Some(headers), Vec::new());
    }

    pub fn inject_raw(&self, headers: Option<Metadata>, payload: Vec<u8>) {
        let delivery = MockDelivery {
            headers,
            payload,
            acks: Arc::clone(&self.state.acks),
        };
        if let Some(tx) = self.state.replies_tx.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(Ok(delivery));
        }
    }

    pub fn inject_error(&self, message: &str) {
        if let Some(tx) = self.state.replies_tx.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(Err(MockBrokerError(message.to_string())));
        }
    }

    pub fn published(&self) -> Vec<PublishedRequest> {
        self.state.published.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.state.published.lock().unwrap().len()
    }

    pub fn acks(&self) -> usize {
        self.state.acks.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn fail_next_connect(&self) {
        self.state.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_publish(&self) {
        self.state.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn lose_connection(&self) {
        self.state.status.send_replace(ConnectionStatus::Disconnected);
    }

    /// Closes the reply stream.
    pub fn end_replies(&self) {
        self.state.replies_tx.lock().unwrap().take();
    }

    pub async fn wait_for_acks(&self, count: usize) {
        wait_until("acks", || self.acks() >= count).await;
    }

    pub async fn wait_for_published(&self, count: usize) {
        wait_until("published requests", || self.publish_count() >= count).await;
    }
}

impl BrokerConnector for MockBroker {
    type Connection = MockBroker;
    type Error = MockBrokerError;

    async fn connect(&self) -> Result<MockBroker, MockBrokerError> {
        if self.state.fail_connect.swap(false, Ordering::SeqCst) {
            return Err(MockBrokerError("connection refused".to_string()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }
}

impl BrokerConnection for MockBroker {
    type Error = MockBrokerError;
    type Delivery = MockDelivery;
    type Deliveries = Deliveries;

    async fn publish(&self, metadata: &Metadata, payload: Bytes) -> Result<(), MockBrokerError> {
        if self.state.fail_publish.swap(false, Ordering::SeqCst) {
            return Err(MockBrokerError("publish rejected".to_string()));
        }
        self.state.published.lock().unwrap().push(PublishedRequest {
            metadata: metadata.clone(),
            payload: payload.to_vec(),
        });

        let reply = self
            .state
            .responder
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|respond| respond(metadata));
        if let Some(reply) = reply {
            self.inject(reply);
        }
        Ok(())
    }

    async fn replies(&self) -> Result<Deliveries, MockBrokerError> {
        self.state
            .replies_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| MockBrokerError("reply stream already taken".to_string()))
    }

    fn lost(&self) -> impl Future<Output = ()> + Send {
        let watch = self.state.watch.clone();
        async move { watch.lost().await }
    }
}

pub struct MockDelivery {
    headers: Option<Metadata>,
    payload: Vec<u8>,
    acks: Arc<AtomicUsize>,
}

impl ReplyDelivery for MockDelivery {
    type AckError = Infallible;

    fn metadata(&self) -> Option<Metadata> {
        self.headers.clone()
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(self) -> Result<(), Infallible> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── MockStager ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StagerState {
    staged: Vec<(RequestIdentity, PathBuf)>,
    materialized: Vec<(String, PathBuf)>,
    fail_stage: bool,
    fail_materialize: bool,
}

/// Records staging calls. Locations look like `mock://original/{id}` and
/// `mock://rebuilt/{id}`.
#[derive(Clone, Default)]
pub struct MockStager {
    state: Arc<Mutex<StagerState>>,
}

impl MockStager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuilt_location(identity: &RequestIdentity) -> String {
        format!("mock://rebuilt/{identity}")
    }

    pub fn staged(&self) -> Vec<(RequestIdentity, PathBuf)> {
        self.state.lock().unwrap().staged.clone()
    }

    pub fn materialized(&self) -> Vec<(String, PathBuf)> {
        self.state.lock().unwrap().materialized.clone()
    }

    pub fn fail_stage(&self) {
        self.state.lock().unwrap().fail_stage = true;
    }

    pub fn fail_materialize(&self) {
        self.state.lock().unwrap().fail_materialize = true;
    }
}

fn mock_io_failure(operation: &'static str, path: &Path) -> StagingError {
    StagingError::Io {
        operation,
        path: path.to_path_buf(),
        source: io::Error::other("mock failure"),
    }
}

impl FileStager for MockStager {
    async fn stage_input(
        &self,
        identity: &RequestIdentity,
        source: &Path,
    ) -> Result<StagedInput, StagingError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_stage {
            return Err(mock_io_failure("stage input", source));
        }
        state.staged.push((identity.clone(), source.to_path_buf()));
        Ok(StagedInput {
            source_location: format!("mock://original/{identity}"),
            rebuilt_location: Self::rebuilt_location(identity),
        })
    }

    async fn materialize_output(
        &self,
        result_location: &str,
        destination: &Path,
    ) -> Result<(), StagingError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_materialize {
            return Err(mock_io_failure("copy rebuilt file to", destination));
        }
        state
            .materialized
            .push((result_location.to_string(), destination.to_path_buf()));
        Ok(())
    }
}
