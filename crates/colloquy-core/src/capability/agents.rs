//! Agent registry capability
//!
//! Agents are the pluggable backends that actually produce responses. The
//! orchestrator resolves a descriptor, activates the contributing extension,
//! then calls [`AgentRegistry::invoke`] with a progress sender that streams
//! [`ResponseFragment`]s back into the session while the invocation runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::capability::ProgressSender;
use crate::error::Result;
use crate::session::types::{
    Followup, InvocationLocation, InvocationResult, RequestId, ResolvedVariable, ResponseFragment,
    SessionId, WelcomeContent,
};

/// A registered agent, as the orchestrator sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    /// Identity of the extension contributing this agent, for usage metrics
    #[serde(default)]
    pub extension_id: String,
    /// Locations this agent serves. Empty means every location.
    #[serde(default)]
    pub locations: Vec<InvocationLocation>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extension_id: String::new(),
            locations: Vec::new(),
        }
    }

    pub fn with_extension_id(mut self, extension_id: impl Into<String>) -> Self {
        self.extension_id = extension_id.into();
        self
    }

    pub fn with_locations(mut self, locations: Vec<InvocationLocation>) -> Self {
        self.locations = locations;
        self
    }

    pub fn supports_location(&self, location: InvocationLocation) -> bool {
        self.locations.is_empty() || self.locations.contains(&location)
    }
}

/// The prepared request handed to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInvocation {
    pub session_id: SessionId,
    pub request_id: RequestId,
    pub agent_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub variables: Vec<ResolvedVariable>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub location: InvocationLocation,
    #[serde(default)]
    pub enable_command_detection: bool,
}

/// One completed exchange from earlier in the session, scoped to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHistoryEntry {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub response: Vec<ResponseFragment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<InvocationResult>,
}

/// What the detection capability inferred from an implicit request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedTarget {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Registry of agents available to the orchestrator.
///
/// `default_agent` and `agent` answer from what is currently contributed and
/// registered; activation of the backing extension goes through the
/// [`ExtensionHost`](crate::capability::ExtensionHost) capability first.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// The default agent for a location, if one is contributed
    fn default_agent(&self, location: InvocationLocation) -> Option<AgentDescriptor>;

    /// Look up a registered (activated) agent by id
    fn agent(&self, agent_id: &str) -> Option<AgentDescriptor>;

    /// Invoke an agent, streaming fragments through `progress` until done
    async fn invoke(
        &self,
        invocation: AgentInvocation,
        history: Vec<AgentHistoryEntry>,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<InvocationResult>;

    /// Compute follow-up suggestions for a finished exchange
    async fn followups(
        &self,
        _invocation: &AgentInvocation,
        _result: &InvocationResult,
        _history: Vec<AgentHistoryEntry>,
        _cancel: CancellationToken,
    ) -> Result<Vec<Followup>> {
        Ok(Vec::new())
    }

    /// Welcome content for a fresh session, if the agent provides any
    async fn welcome_content(
        &self,
        _agent_id: &str,
        _location: InvocationLocation,
    ) -> Result<Option<WelcomeContent>> {
        Ok(None)
    }

    /// Whether [`detect`](Self::detect) is backed by a real capability
    fn supports_detection(&self) -> bool {
        false
    }

    /// Infer a better-suited agent or command for an implicit request
    async fn detect(
        &self,
        _invocation: &AgentInvocation,
        _history: &[AgentHistoryEntry],
        _location: InvocationLocation,
        _cancel: CancellationToken,
    ) -> Result<Option<DetectedTarget>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_location_support() {
        let anywhere = AgentDescriptor::new("a");
        assert!(anywhere.supports_location(InvocationLocation::Panel));
        assert!(anywhere.supports_location(InvocationLocation::Terminal));

        let panel_only =
            AgentDescriptor::new("b").with_locations(vec![InvocationLocation::Panel]);
        assert!(panel_only.supports_location(InvocationLocation::Panel));
        assert!(!panel_only.supports_location(InvocationLocation::Editor));
    }

    #[test]
    fn test_descriptor_builder() {
        let descriptor = AgentDescriptor::new("workspace").with_extension_id("vendor.chat");
        assert_eq!(descriptor.id, "workspace");
        assert_eq!(descriptor.extension_id, "vendor.chat");
    }
}
