//! Error types for Colloquy Core

use thiserror::Error;

use crate::session::types::InvocationLocation;

/// Result type alias using Colloquy Error
pub type Result<T> = std::result::Result<T, Error>;

/// Colloquy error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Unknown request {request_id} in session {session_id}")]
    UnknownRequest {
        session_id: String,
        request_id: String,
    },

    #[error("No default agent contributed for location {0:?}")]
    NoDefaultAgent(InvocationLocation),

    #[error("Agent not registered: {0}")]
    UnknownAgent(String),

    #[error("Session {session_id} failed to initialize: {message}")]
    SessionInitFailed {
        session_id: String,
        message: String,
    },

    #[error("No agent or command can handle this request")]
    Unroutable,

    #[error("Invocation error: {0}")]
    Invocation(String),

    #[error("Activation error: {0}")]
    Activation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
