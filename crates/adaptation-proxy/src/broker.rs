//! Owns the broker connection and its reply listener.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlator::{ReplyCorrelator, WaitError};
use crate::envelope::{ReplyEnvelope, RequestEnvelope};
use crate::identity::RequestIdentity;
use crate::traits::{BrokerConnection, BrokerConnector, ReplyDelivery};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker client is already connected")]
    AlreadyConnected,
    #[error("broker client is not connected")]
    NotConnected,
    #[error("failed to connect to broker: {0}")]
    Connect(String),
    #[error("failed to start reply consumer: {0}")]
    Subscribe(String),
    #[error("failed to encode request {file_id}: {source}")]
    Encode {
        file_id: RequestIdentity,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to publish request {file_id}: {error}")]
    Publish {
        file_id: RequestIdentity,
        error: String,
    },
}

enum State<T> {
    Idle,
    Connected {
        connection: Arc<T>,
        listener: JoinHandle<()>,
    },
    Closed,
}

/// Publishes requests and feeds every reply on this connection's reply
/// channel to the shared [`ReplyCorrelator`].
///
/// [`connect`](Self::connect) succeeds at most once per client. Dropping the
/// client stops the listener and fails every outstanding wait.
pub struct BrokerClient<C: BrokerConnector> {
    connector: C,
    correlator: Arc<ReplyCorrelator>,
    state: State<C::Connection>,
}

impl<C: BrokerConnector> BrokerClient<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            correlator: Arc::new(ReplyCorrelator::new()),
            state: State::Idle,
        }
    }

    pub fn correlator(&self) -> &Arc<ReplyCorrelator> {
        &self.correlator
    }

    /// The open connection, for collaborators that share it.
    pub fn connection(&self) -> Result<&C::Connection, BrokerError> {
        match &self.state {
            State::Connected { connection, .. } => Ok(connection),
            _ => Err(BrokerError::NotConnected),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(&self.state, State::Connected { listener, .. } if !listener.is_finished())
            && !self.correlator.is_closed()
    }

    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        if !matches!(self.state, State::Idle) {
            return Err(BrokerError::AlreadyConnected);
        }

        let connection = self
            .connector
            .connect()
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        let deliveries = connection
            .replies()
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let connection = Arc::new(connection);
        let listener = tokio::spawn(listen(
            Arc::clone(&connection),
            deliveries,
            Arc::clone(&self.correlator),
        ));
        self.state = State::Connected {
            connection,
            listener,
        };
        info!("Broker client connected");
        Ok(())
    }

    /// Returns once the broker has accepted the request; never waits for a reply.
    pub async fn publish(&self, envelope: &RequestEnvelope) -> Result<(), BrokerError> {
        let State::Connected {
            connection,
            listener,
        } = &self.state
        else {
            return Err(BrokerError::NotConnected);
        };
        if listener.is_finished() || self.correlator.is_closed() {
            return Err(BrokerError::NotConnected);
        }

        let file_id = envelope.identity().clone();
        let metadata = envelope.to_metadata();
        let payload = serde_json::to_vec(&metadata).map_err(|source| BrokerError::Encode {
            file_id: file_id.clone(),
            source,
        })?;

        connection
            .publish(&metadata, payload.into())
            .await
            .map_err(|e| BrokerError::Publish {
                file_id: file_id.clone(),
                error: e.to_string(),
            })?;
        debug!(file_id = %file_id, "Published adaptation request");
        Ok(())
    }

    /// Stops the listener and fails every outstanding wait. Idempotent.
    pub fn shutdown(&mut self) {
        if let State::Connected { listener, .. } = std::mem::replace(&mut self.state, State::Closed)
        {
            listener.abort();
            info!("Broker client shut down");
        }
        let failed = self.correlator.fail_all(WaitError::Shutdown);
        if failed > 0 {
            warn!(failed, "Failed outstanding waits on shutdown");
        }
    }
}

impl<C: BrokerConnector> Drop for BrokerClient<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn listen<T: BrokerConnection>(
    connection: Arc<T>,
    mut deliveries: T::Deliveries,
    correlator: Arc<ReplyCorrelator>,
) {
    debug!("Reply listener started");
    loop {
        tokio::select! {
            biased;
            _ = connection.lost() => {
                warn!("Broker connection lost");
                break;
            }
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => handle_delivery(delivery, &correlator).await,
                Some(Err(e)) => warn!(error = %e, "Error receiving reply"),
                None => {
                    warn!("Reply stream ended");
                    break;
                }
            },
        }
    }

    let failed = correlator.fail_all(WaitError::ConnectionLost);
    if failed > 0 {
        warn!(failed, "Failed outstanding waits after losing the reply channel");
    }
}

/// Acks only after routing, so a crash mid-route leads to redelivery.
async fn handle_delivery<D: ReplyDelivery>(delivery: D, correlator: &ReplyCorrelator) {
    let metadata = delivery.metadata();
    match ReplyEnvelope::parse(metadata.as_ref(), delivery.payload()) {
        Ok(reply) => {
            correlator.route(reply);
        }
        Err(e) => warn!(error = %e, "Dropping malformed reply"),
    }

    if let Err(e) = delivery.ack().await {
        warn!(error = %e, "Failed to acknowledge reply");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::envelope::{FILE_ID, FILE_OUTCOME, Metadata};
    use crate::mocks::MockBroker;
    use crate::stager::StagedInput;

    const LONG: Duration = Duration::from_secs(5);

    fn envelope(id: &RequestIdentity) -> RequestEnvelope {
        RequestEnvelope::new(
            id.clone(),
            &StagedInput {
                source_location: format!("/var/source/{id}"),
                rebuilt_location: format!("/var/target/{id}"),
            },
        )
    }

    fn reply(id: &RequestIdentity, outcome: &str) -> Metadata {
        Metadata::from([
            (FILE_ID.to_string(), id.to_string()),
            (FILE_OUTCOME.to_string(), outcome.to_string()),
        ])
    }

    #[tokio::test]
    async fn publish_before_connect_is_rejected() {
        let client = BrokerClient::new(MockBroker::new());
        let err = client.publish(&envelope(&RequestIdentity::mint())).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotConnected));
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let broker = MockBroker::new();
        let mut client = BrokerClient::new(broker.clone());
        client.connect().await.unwrap();

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, BrokerError::AlreadyConnected));
        assert_eq!(broker.connect_count(), 1);
    }

    #[tokio::test]
    async fn failed_connect_can_be_retried() {
        let broker = MockBroker::new();
        broker.fail_next_connect();
        let mut client = BrokerClient::new(broker.clone());

        assert!(matches!(client.connect().await, Err(BrokerError::Connect(_))));
        client.connect().await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn publish_sends_metadata_as_headers_and_body() {
        let broker = MockBroker::new();
        let mut client = BrokerClient::new(broker.clone());
        client.connect().await.unwrap();

        let id = RequestIdentity::mint();
        client.publish(&envelope(&id)).await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].metadata[FILE_ID], id.as_str());
        let body: Metadata = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body, published[0].metadata);
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let broker = MockBroker::new();
        broker.fail_next_publish();
        let mut client = BrokerClient::new(broker.clone());
        client.connect().await.unwrap();

        let id = RequestIdentity::mint();
        let err = client.publish(&envelope(&id)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Publish { file_id, .. } if file_id == id));
    }

    #[tokio::test]
    async fn listener_routes_replies_and_acks_them() {
        let broker = MockBroker::new();
        let mut client = BrokerClient::new(broker.clone());
        client.connect().await.unwrap();

        let id = RequestIdentity::mint();
        let wait = client.correlator().register(id.clone()).unwrap();
        broker.inject(reply(&id, "unmodified"));

        assert_eq!(wait.wait(LONG).await.unwrap().outcome, "unmodified");
        broker.wait_for_acks(1).await;
    }

    #[tokio::test]
    async fn malformed_and_unmatched_replies_are_acked_and_dropped() {
        let broker = MockBroker::new();
        let mut client = BrokerClient::new(broker.clone());
        client.connect().await.unwrap();

        let id = RequestIdentity::mint();
        let wait = client.correlator().register(id.clone()).unwrap();
        broker.inject_raw(None, b"not json".to_vec());
        broker.inject(reply(&RequestIdentity::mint(), "replace"));
        broker.inject(reply(&id, "failed"));

        assert_eq!(wait.wait(LONG).await.unwrap().outcome, "failed");
        broker.wait_for_acks(3).await;
        assert_eq!(client.correlator().pending(), 0);
    }

    #[tokio::test]
    async fn connection_loss_fails_waits_and_blocks_publish() {
        let broker = MockBroker::new();
        let mut client = BrokerClient::new(broker.clone());
        client.connect().await.unwrap();

        let wait = client.correlator().register(RequestIdentity::mint()).unwrap();
        broker.lose_connection();

        assert_eq!(wait.wait(LONG).await.unwrap_err(), WaitError::ConnectionLost);
        tokio::time::timeout(LONG, async {
            while client.is_connected() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let err = client.publish(&envelope(&RequestIdentity::mint())).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotConnected));
    }

    #[tokio::test]
    async fn receive_error_keeps_the_listener_running() {
        let broker = MockBroker::new();
        let mut client = BrokerClient::new(broker.clone());
        client.connect().await.unwrap();

        let id = RequestIdentity::mint();
        let wait = client.correlator().register(id.clone()).unwrap();
        broker.inject_error("consumer heartbeat missed");
        broker.inject(reply(&id, "replace"));

        assert_eq!(wait.wait(LONG).await.unwrap().outcome, "replace");
        broker.wait_for_acks(1).await;
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn waits_after_loss_fail_without_waiting_for_the_deadline() {
        let broker = MockBroker::new();
        let mut client = BrokerClient::new(broker.clone());
        client.connect().await.unwrap();

        broker.lose_connection();
        tokio::time::timeout(LONG, async {
            while !client.correlator().is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(!client.is_connected());
        let wait = client.correlator().register(RequestIdentity::mint()).unwrap();
        let started = tokio::time::Instant::now();
        assert_eq!(wait.wait(LONG).await.unwrap_err(), WaitError::ConnectionLost);
        assert!(started.elapsed() < LONG);

        let err = client.publish(&envelope(&RequestIdentity::mint())).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotConnected));
    }

    #[tokio::test]
    async fn reply_stream_end_fails_waits() {
        let broker = MockBroker::new();
        let mut client = BrokerClient::new(broker.clone());
        client.connect().await.unwrap();

        let wait = client.correlator().register(RequestIdentity::mint()).unwrap();
        broker.end_replies();

        assert_eq!(wait.wait(LONG).await.unwrap_err(), WaitError::ConnectionLost);
    }

    #[tokio::test]
    async fn shutdown_fails_waits_and_closes() {
        let broker = MockBroker::new();
        let mut client = BrokerClient::new(broker.clone());
        client.connect().await.unwrap();

        let wait = client.correlator().register(RequestIdentity::mint()).unwrap();
        client.shutdown();

        assert_eq!(wait.wait(LONG).await.unwrap_err(), WaitError::Shutdown);
        assert!(matches!(client.connect().await, Err(BrokerError::AlreadyConnected)));
        assert!(matches!(
            client.publish(&envelope(&RequestIdentity::mint())).await,
            Err(BrokerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn dropping_the_client_fails_waits() {
        let broker = MockBroker::new();
        let mut client = BrokerClient::new(broker);
        client.connect().await.unwrap();

        let wait = client.correlator().register(RequestIdentity::mint()).unwrap();
        drop(client);

        assert_eq!(wait.wait(LONG).await.unwrap_err(), WaitError::Shutdown);
    }
}
