//! Request and reply metadata as carried on the wire.
//!
//! Both directions use a flat string-keyed map. Requests send it as message
//! headers with the JSON of the same map as the body. Replies are read from
//! headers, falling back to a JSON object body when a reply carries none.

use std::collections::BTreeMap;

use crate::identity::RequestIdentity;
use crate::stager::StagedInput;

pub type Metadata = BTreeMap<String, String>;

pub const FILE_ID: &str = "file-id";
pub const REQUEST_MODE: &str = "request-mode";
pub const SOURCE_FILE_LOCATION: &str = "source-file-location";
pub const REBUILT_FILE_LOCATION: &str = "rebuilt-file-location";
pub const FILE_OUTCOME: &str = "file-outcome";
pub const REPLY_TO: &str = "reply-to";

pub const RESPMOD: &str = "respmod";

/// Keys a reply may carry.
pub const REPLY_KEYS: [&str; 3] = [FILE_ID, FILE_OUTCOME, REBUILT_FILE_LOCATION];

/// Body keys used by the older service revision.
const LEGACY_BODY_KEYS: [(&str, &str); 3] = [
    ("FileId", FILE_ID),
    ("FileOutcome", FILE_OUTCOME),
    ("RebuiltFileLocation", REBUILT_FILE_LOCATION),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    identity: RequestIdentity,
    source_location: String,
    destination_location: String,
}

impl RequestEnvelope {
    pub fn new(identity: RequestIdentity, staged: &StagedInput) -> Self {
        Self {
            identity,
            source_location: staged.source_location.clone(),
            destination_location: staged.rebuilt_location.clone(),
        }
    }

    pub fn identity(&self) -> &RequestIdentity {
        &self.identity
    }

    pub fn to_metadata(&self) -> Metadata {
        Metadata::from([
            (FILE_ID.to_string(), self.identity.to_string()),
            (REQUEST_MODE.to_string(), RESPMOD.to_string()),
            (SOURCE_FILE_LOCATION.to_string(), self.source_location.clone()),
            (
                REBUILT_FILE_LOCATION.to_string(),
                self.destination_location.clone(),
            ),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope {
    pub identity: RequestIdentity,
    /// Raw token; mapped by [`crate::Outcome::from_token`].
    pub outcome: String,
    pub result_location: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedReply {
    #[error("reply is missing '{0}'")]
    MissingField(&'static str),
    #[error("reply carries neither headers nor a body")]
    Empty,
    #[error("reply body is not a JSON object: {0}")]
    Body(#[source] serde_json::Error),
}

impl ReplyEnvelope {
    pub fn from_metadata(metadata: &Metadata) -> Result<Self, MalformedReply> {
        let identity = metadata
            .get(FILE_ID)
            .and_then(|raw| RequestIdentity::from_wire(raw))
            .ok_or(MalformedReply::MissingField(FILE_ID))?;
        let outcome = metadata
            .get(FILE_OUTCOME)
            .filter(|token| !token.is_empty())
            .ok_or(MalformedReply::MissingField(FILE_OUTCOME))?
            .clone();
        let result_location = metadata
            .get(REBUILT_FILE_LOCATION)
            .filter(|location| !location.is_empty())
            .cloned();

        Ok(Self {
            identity,
            outcome,
            result_location,
        })
    }

    /// Headers win when they carry a `file-id`; otherwise the body is tried.
    pub fn parse(headers: Option<&Metadata>, payload: &[u8]) -> Result<Self, MalformedReply> {
        if let Some(headers) = headers.filter(|h| h.contains_key(FILE_ID)) {
            return Self::from_metadata(headers);
        }
        if payload.is_empty() {
            return Err(match headers {
                Some(_) => MalformedReply::MissingField(FILE_ID),
                None => MalformedReply::Empty,
            });
        }
        Self::from_metadata(&body_metadata(payload)?)
    }
}

fn body_metadata(payload: &[u8]) -> Result<Metadata, MalformedReply> {
    let body: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(payload).map_err(MalformedReply::Body)?;

    let mut metadata = Metadata::new();
    for (key, value) in body {
        let Some(value) = value.as_str() else {
            continue;
        };
        let key = LEGACY_BODY_KEYS
            .iter()
            .find(|(legacy, _)| *legacy == key)
            .map_or(key.as_str(), |(_, current)| *current)
            .to_string();
        metadata.insert(key, value.to_string());
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged() -> StagedInput {
        StagedInput {
            source_location: "/var/source/abc".to_string(),
            rebuilt_location: "/var/target/abc".to_string(),
        }
    }

    fn reply_headers(id: &str, outcome: &str) -> Metadata {
        Metadata::from([
            (FILE_ID.to_string(), id.to_string()),
            (FILE_OUTCOME.to_string(), outcome.to_string()),
        ])
    }

    #[test]
    fn request_metadata_carries_all_fields() {
        let id = RequestIdentity::from_wire("abc").unwrap();
        let metadata = RequestEnvelope::new(id, &staged()).to_metadata();

        assert_eq!(metadata.len(), 4);
        assert_eq!(metadata[FILE_ID], "abc");
        assert_eq!(metadata[REQUEST_MODE], "respmod");
        assert_eq!(metadata[SOURCE_FILE_LOCATION], "/var/source/abc");
        assert_eq!(metadata[REBUILT_FILE_LOCATION], "/var/target/abc");
    }

    #[test]
    fn reply_from_headers() {
        let mut headers = reply_headers("abc", "replace");
        headers.insert(REBUILT_FILE_LOCATION.to_string(), "/var/target/abc".to_string());

        let reply = ReplyEnvelope::parse(Some(&headers), b"").unwrap();
        assert_eq!(reply.identity.as_str(), "abc");
        assert_eq!(reply.outcome, "replace");
        assert_eq!(reply.result_location.as_deref(), Some("/var/target/abc"));
    }

    #[test]
    fn empty_result_location_is_absent() {
        let mut headers = reply_headers("abc", "replace");
        headers.insert(REBUILT_FILE_LOCATION.to_string(), String::new());

        let reply = ReplyEnvelope::parse(Some(&headers), b"").unwrap();
        assert_eq!(reply.result_location, None);
    }

    #[test]
    fn headers_take_precedence_over_body() {
        let headers = reply_headers("from-headers", "failed");
        let body = br#"{"file-id":"from-body","file-outcome":"replace"}"#;

        let reply = ReplyEnvelope::parse(Some(&headers), body).unwrap();
        assert_eq!(reply.identity.as_str(), "from-headers");
        assert_eq!(reply.outcome, "failed");
    }

    #[test]
    fn reply_from_body_when_headers_are_absent() {
        let body = br#"{"file-id":"abc","file-outcome":"unmodified"}"#;
        let reply = ReplyEnvelope::parse(None, body).unwrap();
        assert_eq!(reply.identity.as_str(), "abc");
        assert_eq!(reply.outcome, "unmodified");
    }

    #[test]
    fn reply_from_body_when_headers_lack_identity() {
        let headers = Metadata::from([("traceparent".to_string(), "00-x".to_string())]);
        let body = br#"{"file-id":"abc","file-outcome":"failed"}"#;
        let reply = ReplyEnvelope::parse(Some(&headers), body).unwrap();
        assert_eq!(reply.identity.as_str(), "abc");
    }

    #[test]
    fn legacy_body_keys_are_accepted() {
        let body = br#"{"FileId":"abc","FileOutcome":"Replace","RebuiltFileLocation":"/t/abc"}"#;
        let reply = ReplyEnvelope::parse(None, body).unwrap();
        assert_eq!(reply.identity.as_str(), "abc");
        assert_eq!(reply.outcome, "Replace");
        assert_eq!(reply.result_location.as_deref(), Some("/t/abc"));
    }

    #[test]
    fn missing_identity_is_malformed() {
        let headers = Metadata::from([(FILE_OUTCOME.to_string(), "replace".to_string())]);
        let err = ReplyEnvelope::parse(Some(&headers), b"").unwrap_err();
        assert!(matches!(err, MalformedReply::MissingField(FILE_ID)));
    }

    #[test]
    fn empty_identity_is_malformed() {
        let headers = reply_headers("", "replace");
        let err = ReplyEnvelope::parse(Some(&headers), b"").unwrap_err();
        assert!(matches!(err, MalformedReply::MissingField(FILE_ID)));
    }

    #[test]
    fn missing_outcome_is_malformed() {
        let headers = Metadata::from([(FILE_ID.to_string(), "abc".to_string())]);
        let err = ReplyEnvelope::parse(Some(&headers), b"").unwrap_err();
        assert!(matches!(err, MalformedReply::MissingField(FILE_OUTCOME)));
    }

    #[test]
    fn no_headers_and_no_body_is_malformed() {
        let err = ReplyEnvelope::parse(None, b"").unwrap_err();
        assert!(matches!(err, MalformedReply::Empty));
    }

    #[test]
    fn non_object_body_is_malformed() {
        let err = ReplyEnvelope::parse(None, b"[1,2,3]").unwrap_err();
        assert!(matches!(err, MalformedReply::Body(_)));

        let err = ReplyEnvelope::parse(None, b"not json").unwrap_err();
        assert!(matches!(err, MalformedReply::Body(_)));
    }

    #[test]
    fn non_string_body_values_are_ignored() {
        let body = br#"{"file-id":"abc","file-outcome":7}"#;
        let err = ReplyEnvelope::parse(None, body).unwrap_err();
        assert!(matches!(err, MalformedReply::MissingField(FILE_OUTCOME)));
    }
}
