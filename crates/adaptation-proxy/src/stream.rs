//! JetStream stream provisioning for adaptation traffic.

use async_nats::jetstream::stream::{RetentionPolicy, StorageType};
use async_nats::jetstream::{self, context::CreateStreamError, stream::Config as StreamConfig};

pub const REQUEST_STREAM: &str = "ADAPTATION_REQUESTS";
pub const OUTCOME_STREAM: &str = "ADAPTATION_OUTCOMES";

/// Ensure the `ADAPTATION_REQUESTS` stream exists.
///
/// Idempotent. Work-queue retention removes a request once the service acks it.
pub async fn ensure_request_stream(
    jetstream: &jetstream::Context,
    request_subject: &str,
) -> Result<jetstream::stream::Stream, CreateStreamError> {
    jetstream
        .get_or_create_stream(StreamConfig {
            name: REQUEST_STREAM.to_string(),
            subjects: vec![request_subject.to_string()],
            retention: RetentionPolicy::WorkQueue,
            storage: StorageType::File,
            ..Default::default()
        })
        .await
}

/// Ensure the `ADAPTATION_OUTCOMES` stream exists.
///
/// Each proxy connection consumes only its own subject under the wildcard,
/// so the work-queue consumers never overlap.
pub async fn ensure_outcome_stream(
    jetstream: &jetstream::Context,
    outcomes_subject: &str,
) -> Result<jetstream::stream::Stream, CreateStreamError> {
    jetstream
        .get_or_create_stream(StreamConfig {
            name: OUTCOME_STREAM.to_string(),
            subjects: vec![outcomes_subject.to_string()],
            retention: RetentionPolicy::WorkQueue,
            storage: StorageType::Memory,
            ..Default::default()
        })
        .await
}
