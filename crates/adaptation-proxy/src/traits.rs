use std::future::Future;
use std::path::Path;

use bytes::Bytes;
use futures::Stream;

use crate::envelope::Metadata;
use crate::identity::RequestIdentity;
use crate::stager::{StagedInput, StagingError};

/// Opens a broker connection. Called once per [`crate::BrokerClient`].
pub trait BrokerConnector: Send + Sync + 'static {
    type Connection: BrokerConnection;
    type Error: std::error::Error + Send + Sync + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// Both sides of an open broker connection.
///
/// Replies arrive on a channel exclusive to this connection; `publish`
/// advertises it to the service.
pub trait BrokerConnection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;
    type Delivery: ReplyDelivery;
    type Deliveries: Stream<Item = Result<Self::Delivery, Self::Error>> + Send + Unpin + 'static;

    /// Resolves once the broker has accepted the request.
    fn publish(
        &self,
        metadata: &Metadata,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Starts consuming the reply channel.
    fn replies(&self) -> impl Future<Output = Result<Self::Deliveries, Self::Error>> + Send;

    /// Resolves when the connection is gone for good.
    fn lost(&self) -> impl Future<Output = ()> + Send;
}

/// One inbound reply awaiting acknowledgement.
pub trait ReplyDelivery: Send + 'static {
    type AckError: std::error::Error + Send + Sync + 'static;

    /// Reply fields found in the message headers, if it has any.
    fn metadata(&self) -> Option<Metadata>;

    fn payload(&self) -> &[u8];

    fn ack(self) -> impl Future<Output = Result<(), Self::AckError>> + Send;
}

/// Moves file bytes into and out of the location the service works on.
pub trait FileStager: Send + Sync {
    fn stage_input(
        &self,
        identity: &RequestIdentity,
        source: &Path,
    ) -> impl Future<Output = Result<StagedInput, StagingError>> + Send;

    fn materialize_output(
        &self,
        result_location: &str,
        destination: &Path,
    ) -> impl Future<Output = Result<(), StagingError>> + Send;
}
