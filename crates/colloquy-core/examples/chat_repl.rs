//! Minimal REPL driving the orchestrator with a toy echoing agent
//!
//! Run with:
//! cargo run -p colloquy-core --example chat_repl
//!
//! Set RUST_LOG=debug to watch the dispatch pipeline work.

use std::io::{self, Write};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use colloquy_core::{
    AgentDescriptor, AgentHistoryEntry, AgentInvocation, AgentRegistry, CapabilitySet,
    ChatOrchestrator, Followup, InvocationLocation, InvocationResult, MemoryStorage,
    OrchestratorConfig, ProgressSender, RequestOptions, ResponseFragment, Result,
};

/// Repeats the user's message back, one word at a time
struct ParrotAgent;

#[async_trait]
impl AgentRegistry for ParrotAgent {
    fn default_agent(&self, _location: InvocationLocation) -> Option<AgentDescriptor> {
        Some(AgentDescriptor::new("parrot").with_extension_id("example.parrot"))
    }

    fn agent(&self, agent_id: &str) -> Option<AgentDescriptor> {
        (agent_id == "parrot").then(|| AgentDescriptor::new("parrot"))
    }

    async fn invoke(
        &self,
        invocation: AgentInvocation,
        history: Vec<AgentHistoryEntry>,
        progress: ProgressSender,
        _cancel: CancellationToken,
    ) -> Result<InvocationResult> {
        let _ = progress.send(ResponseFragment::markdown("You said:"));
        for word in invocation.message.split_whitespace() {
            let _ = progress.send(ResponseFragment::markdown(format!(" {word}")));
        }
        let _ = progress.send(ResponseFragment::markdown(format!(
            " ({} earlier exchanges)",
            history.len()
        )));
        Ok(InvocationResult::default())
    }

    async fn followups(
        &self,
        _invocation: &AgentInvocation,
        _result: &InvocationResult,
        _history: Vec<AgentHistoryEntry>,
        _cancel: CancellationToken,
    ) -> Result<Vec<Followup>> {
        Ok(vec![Followup::reply("Say that again")])
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let capabilities = CapabilitySet::new(Arc::new(MemoryStorage::new()), Arc::new(ParrotAgent));
    let orchestrator = ChatOrchestrator::new(OrchestratorConfig::default(), capabilities).await?;

    let session = orchestrator.start_session(InvocationLocation::Panel);
    session.initialized().await?;

    println!("=== Colloquy REPL ===");
    println!("Type 'quit' or 'exit' to quit");
    println!();

    loop {
        print!("You: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == "quit" || input == "exit" {
            break;
        }

        let Some(handles) = orchestrator
            .send_request(session.id(), input, RequestOptions::default())
            .await?
        else {
            continue;
        };
        let request_id = handles.response_created.await?;
        handles.response_complete.await?;

        if let Some(response) = session.request(&request_id).and_then(|r| r.response) {
            println!("Parrot: {}", response.text());
            for followup in &response.followups {
                println!("  suggested: {}", followup.message);
            }
        }
    }

    orchestrator.save_state().await?;
    Ok(())
}
