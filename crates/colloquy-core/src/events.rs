//! Events published by the orchestrator
//!
//! The core never renders anything; it publishes on a broadcast channel and
//! the surrounding application layer decides what to do with each event.
//! Subscribe through [`ChatOrchestrator::subscribe`](crate::orchestrator::ChatOrchestrator::subscribe).

use serde::{Deserialize, Serialize};

use crate::session::types::{RequestId, SessionId};

/// Capacity of the orchestrator's broadcast channel. Slow subscribers that
/// fall further behind than this lose the oldest events.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Why a live session was disposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposeReason {
    /// Cleared by the host; panel sessions move into persisted history
    Cleared,
    /// Background initialization failed; the session never became usable
    InitializationFailed,
}

/// An action the user took on a session or response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserAction {
    Vote { up: bool },
    CopyCode { code_block_index: usize },
    InsertCode { code_block_index: usize },
    RunFollowup { message: String },
}

/// A user action together with where it happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActionEvent {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    pub action: UserAction,
}

/// Everything the orchestrator publishes
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A live session left the live map
    Disposed {
        session_id: SessionId,
        reason: DisposeReason,
    },
    /// Forwarded from [`notify_user_action`](crate::orchestrator::ChatOrchestrator::notify_user_action)
    UserAction(UserActionEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_action_serialization() {
        let event = UserActionEvent {
            session_id: "s1".to_string(),
            request_id: Some("r1".to_string()),
            action: UserAction::Vote { up: true },
        };
        let json = serde_json::to_string(&event).expect("Serialization failed");
        assert!(json.contains("\"kind\":\"vote\""));

        let back: UserActionEvent = serde_json::from_str(&json).expect("Deserialization failed");
        assert_eq!(back, event);
    }

    #[test]
    fn test_dispose_reason_serialization() {
        let json = serde_json::to_string(&DisposeReason::InitializationFailed).expect("serialize");
        assert_eq!(json, "\"initialization_failed\"");
    }
}
