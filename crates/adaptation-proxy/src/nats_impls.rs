use std::future::Future;
use std::time::Duration;

use adaptation_nats::{ConnectError, ConnectionWatch, NatsConfig, headers_with_trace_context};
use async_nats::jetstream::{self, consumer::AckPolicy, consumer::pull};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::info;
use uuid::Uuid;

use crate::envelope::{Metadata, REPLY_KEYS, REPLY_TO};
use crate::traits::{BrokerConnection, BrokerConnector, ReplyDelivery};
use crate::{stream, subjects};

/// An abandoned reply consumer is removed by the server after this long.
const REPLY_CONSUMER_INACTIVE_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum NatsBrokerError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("failed to provision stream: {0}")]
    Stream(String),
    #[error("failed to create reply consumer: {0}")]
    Consumer(String),
    #[error("failed to publish request: {0}")]
    Publish(String),
    #[error("failed to receive reply: {0}")]
    Receive(String),
    #[error("failed to ack reply: {0}")]
    Ack(String),
}

/// Connects to NATS and provisions the adaptation streams.
#[derive(Debug, Clone)]
pub struct NatsConnector {
    nats: NatsConfig,
    prefix: String,
    connect_timeout: Duration,
}

impl NatsConnector {
    pub fn new(nats: NatsConfig, prefix: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            nats,
            prefix: prefix.into(),
            connect_timeout,
        }
    }
}

impl BrokerConnector for NatsConnector {
    type Connection = NatsConnection;
    type Error = NatsBrokerError;

    async fn connect(&self) -> Result<NatsConnection, NatsBrokerError> {
        let (client, watch) = adaptation_nats::connect(&self.nats, self.connect_timeout).await?;
        let jetstream = jetstream::new(client);

        let request_subject = subjects::request(&self.prefix);
        stream::ensure_request_stream(&jetstream, &request_subject)
            .await
            .map_err(|e| NatsBrokerError::Stream(e.to_string()))?;
        let outcomes = stream::ensure_outcome_stream(&jetstream, &subjects::outcomes(&self.prefix))
            .await
            .map_err(|e| NatsBrokerError::Stream(e.to_string()))?;

        let instance = Uuid::new_v4().simple().to_string();
        let reply_subject = subjects::outcome(&self.prefix, &instance);
        info!(
            request_subject = %request_subject,
            reply_subject = %reply_subject,
            "Adaptation streams ready"
        );

        Ok(NatsConnection {
            jetstream,
            outcomes,
            request_subject,
            reply_subject,
            watch,
        })
    }
}

/// JetStream-backed connection with its own reply subject.
pub struct NatsConnection {
    jetstream: jetstream::Context,
    outcomes: jetstream::stream::Stream,
    request_subject: String,
    reply_subject: String,
    watch: ConnectionWatch,
}

impl NatsConnection {
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub fn reply_subject(&self) -> &str {
        &self.reply_subject
    }
}

impl BrokerConnection for NatsConnection {
    type Error = NatsBrokerError;
    type Delivery = NatsDelivery;
    type Deliveries = BoxStream<'static, Result<NatsDelivery, NatsBrokerError>>;

    async fn publish(&self, metadata: &Metadata, payload: Bytes) -> Result<(), NatsBrokerError> {
        let mut headers = headers_with_trace_context();
        for (key, value) in metadata {
            headers.insert(key.as_str(), value.as_str());
        }
        headers.insert(REPLY_TO, self.reply_subject.as_str());

        let ack = self
            .jetstream
            .publish_with_headers(self.request_subject.clone(), headers, payload)
            .await
            .map_err(|e| NatsBrokerError::Publish(e.to_string()))?;
        ack.await
            .map_err(|e| NatsBrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn replies(&self) -> Result<Self::Deliveries, NatsBrokerError> {
        let consumer = self
            .outcomes
            .create_consumer(pull::Config {
                filter_subject: self.reply_subject.clone(),
                ack_policy: AckPolicy::Explicit,
                inactive_threshold: REPLY_CONSUMER_INACTIVE_THRESHOLD,
                ..Default::default()
            })
            .await
            .map_err(|e| NatsBrokerError::Consumer(e.to_string()))?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| NatsBrokerError::Consumer(e.to_string()))?;

        Ok(messages
            .map(|message| {
                message
                    .map(NatsDelivery)
                    .map_err(|e| NatsBrokerError::Receive(e.to_string()))
            })
            .boxed())
    }

    fn lost(&self) -> impl Future<Output = ()> + Send {
        let watch = self.watch.clone();
        async move { watch.lost().await }
    }
}

pub struct NatsDelivery(jetstream::Message);

impl ReplyDelivery for NatsDelivery {
    type AckError = NatsBrokerError;

    fn metadata(&self) -> Option<Metadata> {
        let headers = self.0.message.headers.as_ref()?;
        Some(
            REPLY_KEYS
                .iter()
                .filter_map(|key| {
                    headers
                        .get(*key)
                        .map(|value| (key.to_string(), value.as_str().to_string()))
                })
                .collect(),
        )
    }

    fn payload(&self) -> &[u8] {
        &self.0.message.payload
    }

    async fn ack(self) -> Result<(), NatsBrokerError> {
        self.0
            .ack()
            .await
            .map_err(|e| NatsBrokerError::Ack(e.to_string()))
    }
}
