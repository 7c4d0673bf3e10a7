//! Colloquy Core - Session orchestration for conversational assistants
//!
//! This crate provides the request-handling core of a chat surface:
//! - Session lifecycle: create, restore, import, clear, dispose
//! - Request dispatch with streaming progress and cancellation
//! - Agent and slash-command routing with target detection
//! - Persisted history shared across processes, with merge-on-save
//! - Cross-workspace session transfer
//!
//! The host supplies its surroundings through [`capability`] traits (storage,
//! agents, commands, variables, extensions, telemetry, parsing) and drives
//! everything through a [`ChatOrchestrator`].

pub mod capability;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod markdown;
pub mod orchestrator;
pub mod pending;
pub mod session;

pub use config::{OrchestratorConfig, defaults};
pub use error::{Error, Result};

// Capability exports
pub use capability::{
    AgentDescriptor, AgentHistoryEntry, AgentInvocation, AgentRegistry, CapabilitySet,
    CommandRegistry, CommandTurn, DetectedTarget, ExtensionHost, FileStorage, MemoryStorage,
    NoCommands, NoVariables, NullTelemetry, PersistenceTarget, PlainTextParser, ProgressSender,
    ReadyExtensionHost, RequestKind, RequestOutcome, RequestParser, StorageBackend, StorageScope,
    TelemetrySink, TurnRole, UsageEvent, VariableResolver,
};

// Orchestration exports
pub use dispatch::{DispatchHandles, RequestOptions};
pub use events::{DisposeReason, SessionEvent, UserAction, UserActionEvent};
pub use orchestrator::{ChatOrchestrator, CompleteResponse};
pub use pending::{DispatchTicket, PendingRequest, PendingRequestRegistry};

// Session exports
pub use session::types::{
    Followup, InvocationError, InvocationLocation, InvocationResult, InvocationTimings,
    MessagePart, ParsedMessage, RequestId, RequestRemovalReason, ResolvedVariable,
    ResponseFragment, SessionId, WelcomeContent,
};
pub use session::{
    ChatRequest, ChatResponse, ChatSession, HistoryEntry, InitState, SerializedRequest,
    SerializedSession, SessionTransferBroker, TransferRecord, TransferredSessionData,
};
