//! Capabilities the orchestrator consumes
//!
//! Everything the core needs from its surroundings comes in through the traits
//! here: storage, agents, slash commands, variable resolution, extension
//! activation, usage metrics, and request parsing. A [`CapabilitySet`] bundles
//! one implementation of each; only storage and agents are mandatory, the
//! rest default to inert reference implementations.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::session::types::ResponseFragment;

mod agents;
mod commands;
mod extensions;
mod parser;
mod storage;
mod telemetry;
mod variables;

pub use agents::{
    AgentDescriptor, AgentHistoryEntry, AgentInvocation, AgentRegistry, DetectedTarget,
};
pub use commands::{CommandRegistry, CommandTurn, NoCommands, TurnRole};
pub use extensions::{ExtensionHost, ReadyExtensionHost, agent_contribution};
pub use parser::{PlainTextParser, RequestParser};
pub use storage::{FileStorage, MemoryStorage, PersistenceTarget, StorageBackend, StorageScope};
pub use telemetry::{NullTelemetry, RequestKind, RequestOutcome, TelemetrySink, UsageEvent};
pub use variables::{NoVariables, VariableResolver};

/// Sender half of a per-request progress stream. Fragments arrive at the
/// session in send order; the receiver stops accepting once the request's
/// cancellation token fires.
pub type ProgressSender = mpsc::UnboundedSender<ResponseFragment>;

/// One implementation of every consumed capability
#[derive(Clone)]
pub struct CapabilitySet {
    pub storage: Arc<dyn StorageBackend>,
    pub agents: Arc<dyn AgentRegistry>,
    pub commands: Arc<dyn CommandRegistry>,
    pub variables: Arc<dyn VariableResolver>,
    pub extensions: Arc<dyn ExtensionHost>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub parser: Arc<dyn RequestParser>,
}

impl CapabilitySet {
    /// Build a set from the two mandatory capabilities; the rest start as
    /// inert defaults and can be swapped in with the `with_*` methods.
    pub fn new(storage: Arc<dyn StorageBackend>, agents: Arc<dyn AgentRegistry>) -> Self {
        Self {
            storage,
            agents,
            commands: Arc::new(NoCommands),
            variables: Arc::new(NoVariables),
            extensions: Arc::new(ReadyExtensionHost),
            telemetry: Arc::new(NullTelemetry),
            parser: Arc::new(PlainTextParser),
        }
    }

    pub fn with_commands(mut self, commands: Arc<dyn CommandRegistry>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_variables(mut self, variables: Arc<dyn VariableResolver>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_extensions(mut self, extensions: Arc<dyn ExtensionHost>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn RequestParser>) -> Self {
        self.parser = parser;
        self
    }
}
