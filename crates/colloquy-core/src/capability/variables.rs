//! Variable resolution capability
//!
//! Hosts can attach variables (`#selection`, open files, pinned context) to a
//! request; this capability resolves them to concrete values before the agent
//! is invoked. Resolution may stream reference fragments into the response.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::capability::ProgressSender;
use crate::error::Result;
use crate::session::types::{ParsedMessage, ResolvedVariable};

#[async_trait]
pub trait VariableResolver: Send + Sync {
    async fn resolve(
        &self,
        message: &ParsedMessage,
        session_id: &str,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<Vec<ResolvedVariable>>;
}

/// Resolver for hosts without variable support
pub struct NoVariables;

#[async_trait]
impl VariableResolver for NoVariables {
    async fn resolve(
        &self,
        _message: &ParsedMessage,
        _session_id: &str,
        _progress: ProgressSender,
        _cancel: CancellationToken,
    ) -> Result<Vec<ResolvedVariable>> {
        Ok(Vec::new())
    }
}
