//! NATS subject helpers for adaptation traffic.

/// JetStream subject the adaptation service consumes requests from.
pub fn request(prefix: &str) -> String {
    format!("{}.adaptation.request", prefix)
}

/// Wildcard covering every proxy instance's reply subject.
pub fn outcomes(prefix: &str) -> String {
    format!("{}.adaptation.outcome.>", prefix)
}

/// Reply subject exclusive to one proxy connection.
pub fn outcome(prefix: &str, instance: &str) -> String {
    format!("{}.adaptation.outcome.{}", prefix, instance)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPrefix {
    #[error("subject prefix must not be empty")]
    Empty,
    #[error("subject prefix contains invalid character {0:?}")]
    InvalidCharacter(char),
    #[error("subject prefix has empty tokens")]
    EmptyToken,
}

/// Accepts dot-separated tokens free of wildcards and whitespace.
pub fn validate_prefix(prefix: &str) -> Result<(), InvalidPrefix> {
    if prefix.is_empty() {
        return Err(InvalidPrefix::Empty);
    }
    if let Some(ch) = prefix
        .chars()
        .find(|ch| *ch == '*' || *ch == '>' || ch.is_whitespace())
    {
        return Err(InvalidPrefix::InvalidCharacter(ch));
    }
    if prefix.contains("..") || prefix.starts_with('.') || prefix.ends_with('.') {
        return Err(InvalidPrefix::EmptyToken);
    }
    Ok(())
}
