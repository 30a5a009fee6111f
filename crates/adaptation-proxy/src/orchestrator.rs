//! The file adaptation use case: stage, register, publish, await, map, materialize.

use std::path::Path;
use std::time::Duration;

use tracing::{Instrument, debug, error, info, info_span};

use crate::broker::BrokerClient;
use crate::correlator::WaitError;
use crate::envelope::RequestEnvelope;
use crate::error::{AdaptationError, ProtocolError};
use crate::identity::RequestIdentity;
use crate::outcome::Outcome;
use crate::traits::{BrokerConnector, FileStager};

pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a request stands. [`RequestOrchestrator::state`] reports the last one reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Staged,
    Published,
    Awaiting,
    Resolved,
    TimedOut,
    Failed,
}

/// Drives a single adaptation request.
pub struct RequestOrchestrator<'a, C: BrokerConnector, S> {
    broker: &'a BrokerClient<C>,
    stager: &'a S,
    deadline: Duration,
    state: RequestState,
}

impl<'a, C: BrokerConnector, S: FileStager> RequestOrchestrator<'a, C, S> {
    pub fn new(broker: &'a BrokerClient<C>, stager: &'a S) -> Self {
        Self {
            broker,
            stager,
            deadline: DEFAULT_PROCESSING_TIMEOUT,
            state: RequestState::Idle,
        }
    }

    /// Override how long to wait for the service's reply.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Every failure is logged and reported as [`Outcome::Error`].
    pub async fn run(mut self, input: &Path, output: &Path) -> Outcome {
        self.try_run(input, output).await.unwrap_or(Outcome::Error)
    }

    pub async fn try_run(&mut self, input: &Path, output: &Path) -> Result<Outcome, AdaptationError> {
        let identity = RequestIdentity::mint();
        let span = info_span!("adaptation", file_id = %identity);

        async {
            let result = self.execute(&identity, input, output).await;
            match &result {
                Ok(outcome) => info!(outcome = %outcome, "Adaptation finished"),
                Err(err) => {
                    if self.state != RequestState::TimedOut {
                        self.advance(RequestState::Failed);
                    }
                    error!(kind = err.kind(), error = %err, "Adaptation failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    fn advance(&mut self, next: RequestState) {
        debug!(from = ?self.state, to = ?next, "Request state changed");
        self.state = next;
    }

    async fn execute(
        &mut self,
        identity: &RequestIdentity,
        input: &Path,
        output: &Path,
    ) -> Result<Outcome, AdaptationError> {
        let staged = self.stager.stage_input(identity, input).await?;
        self.advance(RequestState::Staged);

        // Registered before publishing so a fast reply cannot be missed.
        let wait = self.broker.correlator().register(identity.clone())?;
        let envelope = RequestEnvelope::new(identity.clone(), &staged);
        if let Err(err) = self.broker.publish(&envelope).await {
            wait.cancel();
            return Err(err.into());
        }
        self.advance(RequestState::Published);

        self.advance(RequestState::Awaiting);
        let reply = match wait.wait(self.deadline).await {
            Ok(reply) => reply,
            Err(WaitError::TimedOut(after)) => {
                self.advance(RequestState::TimedOut);
                return Err(AdaptationError::Timeout {
                    file_id: identity.clone(),
                    after,
                });
            }
            Err(err) => return Err(ProtocolError::Wait(err).into()),
        };
        self.advance(RequestState::Resolved);

        let outcome = Outcome::from_token(&reply.outcome).map_err(ProtocolError::from)?;
        if outcome == Outcome::Rebuilt {
            let location = reply
                .result_location
                .as_deref()
                .ok_or_else(|| ProtocolError::MissingResultLocation(identity.clone()))?;
            self.stager.materialize_output(location, output).await?;
        }
        Ok(outcome)
    }
}
