//! Mapping from the adaptation service's outcome vocabulary onto [`Outcome`].

use std::fmt;
use std::process::ExitCode;

/// Final result of one adaptation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The service left the file untouched.
    Unprocessed,
    /// A rebuilt file was produced and copied to the destination.
    Rebuilt,
    /// The service could not rebuild the file.
    Failed,
    /// Anything else: bad input, protocol violation, timeout, transport loss.
    Error,
}

/// Both service revisions' tokens. Matched case-insensitively.
const VOCABULARY: [(&str, Outcome); 7] = [
    ("unmodified", Outcome::Unprocessed),
    ("unmanaged", Outcome::Unprocessed),
    ("replace", Outcome::Rebuilt),
    ("rebuilt", Outcome::Rebuilt),
    ("failed", Outcome::Failed),
    ("error", Outcome::Error),
    ("unknown", Outcome::Error),
];

/// A reply carried an outcome token outside the known vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized outcome token '{token}'")]
pub struct UnrecognizedOutcome {
    pub token: String,
}

impl Outcome {
    pub fn from_token(token: &str) -> Result<Self, UnrecognizedOutcome> {
        VOCABULARY
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(token))
            .map(|(_, outcome)| *outcome)
            .ok_or_else(|| UnrecognizedOutcome {
                token: token.to_string(),
            })
    }

    /// Process exit status reported for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Rebuilt => 0,
            Self::Unprocessed => 1,
            Self::Failed => 2,
            Self::Error => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Rebuilt => "rebuilt",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        ExitCode::from(outcome.exit_code())
    }
}
