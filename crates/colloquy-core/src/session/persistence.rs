//! Persisted session format
//!
//! Sessions are stored as a JSON array under [`SESSIONS_STORAGE_KEY`] in
//! workspace scope. The format is tolerant on the way in: older writers
//! stored a response as one plain string rather than a fragment list, and a
//! corrupt blob must never take down restore, so parsing degrades to an
//! empty table instead of failing.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::error;

use crate::error::Result;
use crate::session::types::{
    Followup, InvocationLocation, InvocationResult, ParsedMessage, RequestId, ResolvedVariable,
    ResponseFragment, SessionId, WelcomeContent,
};

/// Workspace-scope key holding the serialized session table
pub const SESSIONS_STORAGE_KEY: &str = "chat.sessions";

/// One persisted session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedSession {
    pub session_id: SessionId,
    pub creation_date_ms: i64,
    #[serde(default)]
    pub initial_location: InvocationLocation,
    #[serde(default)]
    pub is_imported: bool,
    /// Set when the session was pushed to history by an explicit clear
    /// rather than a shutdown save
    #[serde(default)]
    pub is_new: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome: Option<WelcomeContent>,
    #[serde(default)]
    pub requests: Vec<SerializedRequest>,
}

impl SerializedSession {
    /// Only sessions that hold at least one request are worth persisting
    pub fn has_content(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Title for history listings: the first request's text, shortened
    pub fn title(&self) -> Option<String> {
        let first = self.requests.first()?;
        let text = first.message.text.trim();
        if text.is_empty() {
            return None;
        }
        Some(text.chars().take(50).collect())
    }
}

/// One persisted request/response pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedRequest {
    pub id: RequestId,
    pub message: ParsedMessage,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub variables: Vec<ResolvedVariable>,
    #[serde(default, deserialize_with = "deserialize_response")]
    pub response: Option<Vec<ResponseFragment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<InvocationResult>,
    #[serde(default)]
    pub followups: Vec<Followup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Older writers stored the response as one plain markdown string; fold that
/// into a single-fragment list on the way in.
fn deserialize_response<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Vec<ResponseFragment>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Parts(Vec<ResponseFragment>),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Text(text)) => Some(vec![ResponseFragment::markdown(text)]),
        Some(Raw::Parts(parts)) => Some(parts),
    })
}

/// Parse the persisted table, tolerating garbage: a blob that fails to parse
/// is logged and treated as empty so startup always succeeds.
pub fn parse_sessions(raw: &str) -> Vec<SerializedSession> {
    match serde_json::from_str::<Vec<SerializedSession>>(raw) {
        Ok(sessions) => sessions,
        Err(err) => {
            error!("Failed to parse persisted chat sessions, starting empty: {}", err);
            Vec::new()
        }
    }
}

pub fn encode_sessions(sessions: &[SerializedSession]) -> Result<String> {
    Ok(serde_json::to_string(sessions)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SerializedSession {
        SerializedSession {
            session_id: "s1".to_string(),
            creation_date_ms: 1_700_000_000_000,
            initial_location: InvocationLocation::Panel,
            is_imported: false,
            is_new: false,
            welcome: None,
            requests: vec![SerializedRequest {
                id: "r1".to_string(),
                message: ParsedMessage::plain("hello there"),
                attempt: 0,
                variables: Vec::new(),
                response: Some(vec![ResponseFragment::markdown("hi")]),
                result: None,
                followups: Vec::new(),
                agent_id: Some("workspace".to_string()),
                command: None,
            }],
        }
    }

    #[test]
    fn test_round_trip() {
        let encoded = encode_sessions(&[sample()]).expect("encode");
        let parsed = parse_sessions(&encoded);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].session_id, "s1");
        assert_eq!(parsed[0].requests.len(), 1);
        assert_eq!(
            parsed[0].requests[0].response.as_ref().map(|p| p.len()),
            Some(1)
        );
    }

    #[test]
    fn test_plain_string_response_normalized() {
        let raw = r#"[{
            "session_id": "s1",
            "creation_date_ms": 1,
            "requests": [{
                "id": "r1",
                "message": { "text": "q", "parts": [] },
                "response": "plain old text"
            }]
        }]"#;
        let parsed = parse_sessions(raw);
        assert_eq!(parsed.len(), 1);
        let response = parsed[0].requests[0].response.as_ref().expect("response");
        assert_eq!(response.len(), 1);
        assert!(matches!(
            &response[0],
            ResponseFragment::Markdown { content } if content == "plain old text"
        ));
    }

    #[test]
    fn test_missing_optional_fields_tolerated() {
        let raw = r#"[{
            "session_id": "s1",
            "creation_date_ms": 1,
            "requests": [{ "id": "r1", "message": { "text": "q", "parts": [] } }]
        }]"#;
        let parsed = parse_sessions(raw);
        assert_eq!(parsed.len(), 1);
        let req = &parsed[0].requests[0];
        assert_eq!(req.attempt, 0);
        assert!(req.variables.is_empty());
        assert!(req.response.is_none());
        assert!(req.followups.is_empty());
        assert_eq!(parsed[0].initial_location, InvocationLocation::Panel);
    }

    #[test]
    fn test_corrupt_blob_degrades_to_empty() {
        assert!(parse_sessions("{ not json").is_empty());
        assert!(parse_sessions("42").is_empty());
    }

    #[test]
    fn test_has_content_requires_requests() {
        let mut session = sample();
        assert!(session.has_content());
        session.requests.clear();
        assert!(!session.has_content());
    }

    #[test]
    fn test_title_from_first_request() {
        let session = sample();
        assert_eq!(session.title().as_deref(), Some("hello there"));
    }
}
