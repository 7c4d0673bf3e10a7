//! Extension host capability
//!
//! Agents are contributed by extensions that may not be loaded yet when a
//! session starts. Initialization waits for registration to finish and then
//! activates the contribution point backing the agent it needs.

use async_trait::async_trait;

use crate::error::Result;

/// The contribution point that activates an agent's extension
pub fn agent_contribution(agent_id: &str) -> String {
    format!("onAgent:{agent_id}")
}

#[async_trait]
pub trait ExtensionHost: Send + Sync {
    /// Resolves once every installed extension has registered its contributions
    async fn when_registered(&self);

    /// Activate the extension behind a contribution point
    async fn activate(&self, contribution: &str) -> Result<()>;
}

/// Host whose extensions are always registered and active (tests, embedding)
pub struct ReadyExtensionHost;

#[async_trait]
impl ExtensionHost for ReadyExtensionHost {
    async fn when_registered(&self) {}

    async fn activate(&self, _contribution: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_contribution_format() {
        assert_eq!(agent_contribution("workspace"), "onAgent:workspace");
    }
}
