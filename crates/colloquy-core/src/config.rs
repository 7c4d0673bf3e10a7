//! Orchestrator configuration
//!
//! Hosts embed this struct in their own configuration files; every field has
//! a serde default so a partial (or empty) table is valid.

use serde::{Deserialize, Serialize};

use crate::session::types::InvocationLocation;

/// Configuration for a [`ChatOrchestrator`](crate::orchestrator::ChatOrchestrator)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Identity of the workspace this process serves. Empty for a process
    /// without a workspace; transfer records are only consumed when set.
    #[serde(default)]
    pub workspace_id: String,
    /// Set when several windows without a workspace share one application-wide
    /// session store; switches persistence to the merge-on-save path.
    #[serde(default)]
    pub empty_window: bool,
    /// The invocation location whose sessions are persisted into history
    #[serde(default)]
    pub primary_location: InvocationLocation,
    /// Maximum number of sessions kept in the persisted history table
    #[serde(default = "defaults::history_cap")]
    pub history_cap: usize,
    /// How long a transfer record stays consumable, in milliseconds
    #[serde(default = "defaults::transfer_expiry_ms")]
    pub transfer_expiry_ms: i64,
    /// Whether agent/command detection runs for implicit requests when the
    /// registry supports it. Callers can still disable it per request.
    #[serde(default = "defaults::command_detection")]
    pub command_detection: bool,
}

/// Default values, exposed for hosts that build configs programmatically
pub mod defaults {
    pub fn history_cap() -> usize {
        25
    }

    pub fn transfer_expiry_ms() -> i64 {
        60_000
    }

    pub fn command_detection() -> bool {
        true
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace_id: String::new(),
            empty_window: false,
            primary_location: InvocationLocation::default(),
            history_cap: defaults::history_cap(),
            transfer_expiry_ms: defaults::transfer_expiry_ms(),
            command_detection: defaults::command_detection(),
        }
    }
}

impl OrchestratorConfig {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            ..Self::default()
        }
    }

    pub fn with_empty_window(mut self, empty_window: bool) -> Self {
        self.empty_window = empty_window;
        self
    }

    pub fn with_primary_location(mut self, location: InvocationLocation) -> Self {
        self.primary_location = location;
        self
    }

    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap;
        self
    }

    pub fn with_transfer_expiry_ms(mut self, expiry_ms: i64) -> Self {
        self.transfer_expiry_ms = expiry_ms;
        self
    }

    pub fn with_command_detection(mut self, enabled: bool) -> Self {
        self.command_detection = enabled;
        self
    }
}
