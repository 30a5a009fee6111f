//! # adaptation-proxy
//!
//! Submits a file for adaptation through a message broker and blocks until
//! the correlated outcome arrives or the processing deadline passes.
//!
//! [`RequestOrchestrator`] runs one request: the [`FileStager`] places the
//! input, a wait is registered with the [`ReplyCorrelator`], the request is
//! published through the [`BrokerClient`], and the reply's outcome token is
//! mapped onto [`Outcome`]. A rebuilt result is copied to the destination.
//!
//! The broker and stager sit behind traits ([`traits`]); [`nats_impls`]
//! provides the JetStream implementation and `mocks` (feature
//! `test-support`) in-process doubles.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::time::Duration;
//!
//! use adaptation_nats::NatsConfig;
//! use adaptation_proxy::{BrokerClient, LocalFileStager, NatsConnector, RequestOrchestrator};
//! use adaptation_std::SystemFs;
//!
//! # async fn run() -> Result<(), adaptation_proxy::BrokerError> {
//! let connector = NatsConnector::new(
//!     NatsConfig::from_url("localhost:4222"),
//!     "adaptation",
//!     Duration::from_secs(10),
//! );
//! let mut broker = BrokerClient::new(connector);
//! broker.connect().await?;
//!
//! let stager = LocalFileStager::new(SystemFs, "/var/source", "/var/target");
//! let outcome = RequestOrchestrator::new(&broker, &stager)
//!     .run(Path::new("in.pdf"), Path::new("out.pdf"))
//!     .await;
//! std::process::exit(outcome.exit_code().into());
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod correlator;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod nats_impls;
pub mod orchestrator;
pub mod outcome;
pub mod stager;
pub mod stream;
pub mod subjects;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use broker::{BrokerClient, BrokerError};
pub use correlator::{DuplicateRegistration, PendingWait, ReplyCorrelator, Routed, WaitError};
pub use envelope::{Metadata, ReplyEnvelope, RequestEnvelope};
pub use error::{AdaptationError, ProtocolError};
pub use identity::RequestIdentity;
pub use nats_impls::{NatsConnection, NatsConnector};
pub use orchestrator::{RequestOrchestrator, RequestState};
pub use outcome::{Outcome, UnrecognizedOutcome};
pub use stager::{LocalFileStager, ObjectStoreStager, StagedInput, StagingError};
pub use traits::{BrokerConnection, BrokerConnector, FileStager, ReplyDelivery};
