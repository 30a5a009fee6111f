use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Correlation key minted once per submission.
///
/// Rendered as a lowercase hyphenated UUID v4. Replies are matched by exact,
/// case-sensitive string equality, so a value read off the wire is kept
/// verbatim and never normalised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestIdentity(Arc<str>);

impl RequestIdentity {
    pub fn mint() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string().into())
    }

    /// Wraps an identity received in a reply. Empty values are rejected.
    pub fn from_wire(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw.into()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
