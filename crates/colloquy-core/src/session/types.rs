//! Shared value types for sessions, requests, and responses
//!
//! These are the wire-level shapes: parsed message parts, streamed response
//! fragments, follow-up suggestions, and invocation results. Live session
//! objects build on them in `model`, persisted snapshots in `persistence`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a session
pub type SessionId = String;

/// Unique identifier for a request within a session
pub type RequestId = String;

/// Where a session was initially invoked from.
///
/// `Panel` is the default, persistent surface; sessions started elsewhere are
/// not written into the session history table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationLocation {
    #[default]
    Panel,
    Editor,
    Terminal,
    Notebook,
}

/// One structural piece of a parsed user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    /// Plain text
    Text { text: String },
    /// Explicit `@agent` mention
    AgentMention { agent_id: String },
    /// Agent subcommand following a mention, e.g. `@agent /explain`
    Subcommand { name: String },
    /// Standalone `/command` handled by the command registry
    SlashCommand { name: String },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn agent_mention(agent_id: impl Into<String>) -> Self {
        Self::AgentMention {
            agent_id: agent_id.into(),
        }
    }

    pub fn subcommand(name: impl Into<String>) -> Self {
        Self::Subcommand { name: name.into() }
    }

    pub fn slash_command(name: impl Into<String>) -> Self {
        Self::SlashCommand { name: name.into() }
    }
}

/// A user message after parsing: the original text plus its structural parts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub text: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl ParsedMessage {
    /// A message with no structure beyond a single text part
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        let parts = vec![MessagePart::text(text.clone())];
        Self { text, parts }
    }

    /// The explicit `@agent` mention, if the message carries one
    pub fn agent_mention(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            MessagePart::AgentMention { agent_id } => Some(agent_id.as_str()),
            _ => None,
        })
    }

    /// The agent subcommand, if the message carries one
    pub fn subcommand(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            MessagePart::Subcommand { name } => Some(name.as_str()),
            _ => None,
        })
    }

    /// The standalone slash command, if the message carries one
    pub fn slash_command(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            MessagePart::SlashCommand { name } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// One streamed fragment of an in-progress response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseFragment {
    /// Markdown content appended to the response body
    Markdown { content: String },
    /// A citation for code reproduced from a licensed source
    CodeCitation {
        url: String,
        license: String,
        snippet: String,
    },
    /// Transient status text shown while the response is being produced
    ProgressMessage { message: String },
}

impl ResponseFragment {
    pub fn markdown(content: impl Into<String>) -> Self {
        Self::Markdown {
            content: content.into(),
        }
    }

    pub fn code_citation(
        url: impl Into<String>,
        license: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self::CodeCitation {
            url: url.into(),
            license: license.into(),
            snippet: snippet.into(),
        }
    }

    pub fn progress_message(message: impl Into<String>) -> Self {
        Self::ProgressMessage {
            message: message.into(),
        }
    }
}

/// A suggested next user input, computed after a response completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Followup {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Followup {
    pub fn reply(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            title: None,
            agent_id: None,
            command: None,
        }
    }
}

/// A request-attached variable after resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVariable {
    pub name: String,
    pub value: Value,
}

/// Welcome content an agent can contribute to a fresh session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WelcomeContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_questions: Vec<Followup>,
}

/// Error details reported by an agent or command invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationError {
    pub message: String,
    /// Set when the provider rejected the response for content-filter reasons
    #[serde(default)]
    pub response_is_filtered: bool,
}

/// Timing facts recorded for a finished invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationTimings {
    /// Milliseconds from dispatch start to the first streamed fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_fragment_ms: Option<u64>,
    /// Total milliseconds from dispatch start to finalization
    #[serde(default)]
    pub total_ms: u64,
}

/// The terminal result of an invocation, error or not
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<InvocationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timings: Option<InvocationTimings>,
    /// Opaque provider metadata carried through persistence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl InvocationResult {
    /// A result carrying only an error message
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(InvocationError {
                message: message.into(),
                response_is_filtered: false,
            }),
            timings: None,
            metadata: None,
        }
    }

    /// A result flagged as rejected by the provider's content filter
    pub fn filtered(message: impl Into<String>) -> Self {
        Self {
            error: Some(InvocationError {
                message: message.into(),
                response_is_filtered: true,
            }),
            timings: None,
            metadata: None,
        }
    }
}

/// Why a request was removed from its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestRemovalReason {
    /// Removed on user request
    Removal,
    /// Removed so the same content can be dispatched again
    Resend,
    /// Moved into another session
    Adoption,
}
