//! Slash-command registry capability
//!
//! Slash commands are named handlers invoked with `/name` syntax and no agent
//! involvement. They receive the conversation so far as flat role-tagged text
//! turns rather than structured agent history.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::capability::ProgressSender;
use crate::error::{Error, Result};
use crate::session::types::Followup;

/// Who produced a history turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One text turn of conversation history, as handed to command handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandTurn {
    pub role: TurnRole,
    pub text: String,
}

impl CommandTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }
}

/// Registry of slash commands
#[async_trait]
pub trait CommandRegistry: Send + Sync {
    fn has_command(&self, name: &str) -> bool;

    /// Run a command with the message text after the `/name` prefix, streaming
    /// progress fragments; may return follow-up suggestions.
    async fn execute(
        &self,
        name: &str,
        argument: &str,
        progress: ProgressSender,
        history: Vec<CommandTurn>,
        cancel: CancellationToken,
    ) -> Result<Option<Vec<Followup>>>;
}

/// A registry with no commands; every message routes to an agent
pub struct NoCommands;

#[async_trait]
impl CommandRegistry for NoCommands {
    fn has_command(&self, _name: &str) -> bool {
        false
    }

    async fn execute(
        &self,
        _name: &str,
        _argument: &str,
        _progress: ProgressSender,
        _history: Vec<CommandTurn>,
        _cancel: CancellationToken,
    ) -> Result<Option<Vec<Followup>>> {
        Err(Error::Unroutable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_constructors() {
        let user = CommandTurn::user("hi");
        assert_eq!(user.role, TurnRole::User);
        assert_eq!(user.text, "hi");

        let assistant = CommandTurn::assistant("hello");
        assert_eq!(assistant.role, TurnRole::Assistant);
    }

    #[test]
    fn test_turn_serialization() {
        let turn = CommandTurn::user("question");
        let json = serde_json::to_string(&turn).expect("Serialization failed");
        assert!(json.contains("\"role\":\"user\""));
    }

    #[tokio::test]
    async fn test_no_commands_has_nothing() {
        assert!(!NoCommands.has_command("clear"));
    }
}
