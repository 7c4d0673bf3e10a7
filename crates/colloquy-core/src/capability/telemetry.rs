//! Usage metrics capability
//!
//! The dispatcher emits exactly one [`UsageEvent`] per dispatched request,
//! whatever the outcome. Sinks are fire-and-forget: recording must not block
//! or fail the pipeline.

use serde::{Deserialize, Serialize};

use crate::events::UserActionEvent;
use crate::session::types::{InvocationLocation, SessionId};

/// How a dispatched request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestOutcome {
    Success,
    /// The invocation failed before producing any output
    Error,
    /// The invocation failed after streaming at least one fragment
    ErrorWithOutput,
    /// The provider rejected the response for content-filter reasons
    Filtered,
    Cancelled,
}

/// What kind of request was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Free text routed to an agent
    Text,
    /// An explicit `/command`
    SlashCommand,
}

/// One request's worth of usage metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub outcome: RequestOutcome,
    pub kind: RequestKind,
    /// Empty on the slash-command path
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub extension_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub session_id: SessionId,
    pub location: InvocationLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_first_fragment_ms: Option<u64>,
    pub total_ms: u64,
    /// Number of code citations attached to the response
    pub citations: usize,
    /// Number of complete fenced code blocks in the response text
    pub code_blocks: usize,
}

pub trait TelemetrySink: Send + Sync {
    fn record_usage(&self, event: UsageEvent);

    fn record_action(&self, event: &UserActionEvent);
}

/// Sink that drops everything
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn record_usage(&self, _event: UsageEvent) {}

    fn record_action(&self, _event: &UserActionEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization_names() {
        let json = serde_json::to_string(&RequestOutcome::ErrorWithOutput).expect("serialize");
        assert_eq!(json, "\"errorWithOutput\"");
        let json = serde_json::to_string(&RequestOutcome::Cancelled).expect("serialize");
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_usage_event_serialization() {
        let event = UsageEvent {
            outcome: RequestOutcome::Success,
            kind: RequestKind::Text,
            agent_id: "workspace".to_string(),
            extension_id: "vendor.chat".to_string(),
            command: None,
            session_id: "s1".to_string(),
            location: InvocationLocation::Panel,
            time_to_first_fragment_ms: Some(12),
            total_ms: 180,
            citations: 1,
            code_blocks: 2,
        };
        let json = serde_json::to_string(&event).expect("Serialization failed");
        assert!(json.contains("\"outcome\":\"success\""));
        assert!(json.contains("\"code_blocks\":2"));
    }
}
