use std::time::Duration;

use crate::broker::BrokerError;
use crate::correlator::{DuplicateRegistration, WaitError};
use crate::identity::RequestIdentity;
use crate::outcome::UnrecognizedOutcome;
use crate::stager::StagingError;

/// The service or transport broke the request/reply contract.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    UnrecognizedOutcome(#[from] UnrecognizedOutcome),
    #[error("rebuilt reply for {0} carries no result location")]
    MissingResultLocation(RequestIdentity),
    #[error(transparent)]
    Wait(WaitError),
}

/// Every way a request can end without a service-reported outcome.
///
/// All of these are reported as [`crate::Outcome::Error`]; the variant is
/// only logged.
#[derive(Debug, thiserror::Error)]
pub enum AdaptationError {
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("no outcome for {file_id} within {}s", after.as_secs_f64())]
    Timeout {
        file_id: RequestIdentity,
        after: Duration,
    },
    #[error(transparent)]
    DuplicateRegistration(#[from] DuplicateRegistration),
}

impl From<BrokerError> for AdaptationError {
    fn from(err: BrokerError) -> Self {
        Self::Protocol(err.into())
    }
}

impl AdaptationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Staging(_) => "staging",
            Self::Protocol(_) => "protocol",
            Self::Timeout { .. } => "timeout",
            Self::DuplicateRegistration(_) => "duplicate_registration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_are_protocol_errors() {
        let err = AdaptationError::from(BrokerError::NotConnected);
        assert_eq!(err.kind(), "protocol");
        assert_eq!(err.to_string(), "broker client is not connected");
    }

    #[test]
    fn timeout_names_the_request() {
        let err = AdaptationError::Timeout {
            file_id: RequestIdentity::from_wire("abc").unwrap(),
            after: Duration::from_secs(60),
        };
        assert_eq!(err.kind(), "timeout");
        assert_eq!(err.to_string(), "no outcome for abc within 60s");
    }
}
