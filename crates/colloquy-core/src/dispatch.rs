//! Request dispatch pipeline
//!
//! One dispatch turns a parsed message into a finished exchange:
//!
//! ```text
//!   classify ──► claim slot ──► add request ──► resolve variables
//!        │                                            │
//!        │                                     detect agent/command
//!        │                                            │
//!        ▼                                            ▼
//!   /command path ◄──────────────────────► activate + invoke agent
//!        │                                            │
//!        └────────────► stream progress ◄─────────────┘
//!                              │
//!                    finalize + usage event
//!                              │
//!                release slot, then follow-ups
//! ```
//!
//! The pipeline runs on its own task; callers get back two one-shot signals,
//! one for "a response exists" and one for "the exchange, follow-ups
//! included, is done". Errors inside the pipeline never reach the caller:
//! they are folded into the response so the session stays usable.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::capability::{
    AgentDescriptor, AgentHistoryEntry, AgentInvocation, CapabilitySet, CommandTurn,
    ProgressSender, RequestKind, RequestOutcome, UsageEvent, agent_contribution,
};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::markdown;
use crate::pending::{DispatchTicket, PendingRequestRegistry};
use crate::session::types::{
    Followup, InvocationLocation, InvocationResult, ParsedMessage, RequestId, ResolvedVariable,
    ResponseFragment,
};
use crate::session::{ChatSession, SessionStore};

/// Per-request options callers may pass alongside the message
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the session's initial location for this request
    pub location: Option<InvocationLocation>,
    /// Retry counter carried into the invocation
    pub attempt: u32,
    /// Per-request override of the configured detection toggle
    pub command_detection: Option<bool>,
    /// Opaque host data stored on the request and carried through a resend
    pub context: Option<Value>,
}

/// Acceptance signals for one dispatch.
///
/// `response_created` resolves with the request id once the response has
/// started (first streamed fragment) or reached a terminal state; it only
/// stays unresolved when the pipeline failed before a request existed.
/// `response_complete` resolves when the exchange, including follow-up
/// computation, is done.
#[derive(Debug)]
pub struct DispatchHandles {
    pub response_created: oneshot::Receiver<RequestId>,
    pub response_complete: oneshot::Receiver<()>,
}

/// Routes parsed requests to agents or slash commands and runs the exchange
pub struct RequestDispatcher {
    config: OrchestratorConfig,
    capabilities: CapabilitySet,
    pending: Arc<PendingRequestRegistry>,
    store: Arc<SessionStore>,
}

#[derive(Debug)]
enum Route {
    Agent {
        agent: AgentDescriptor,
        explicit: bool,
        command: Option<String>,
    },
    Command {
        name: String,
    },
}

impl RequestDispatcher {
    pub fn new(
        config: OrchestratorConfig,
        capabilities: CapabilitySet,
        pending: Arc<PendingRequestRegistry>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self {
            config,
            capabilities,
            pending,
            store,
        }
    }

    /// Dispatch one parsed request on its own task. `Ok(None)` means the
    /// session already has a request in flight and this one was rejected.
    pub fn dispatch(
        &self,
        session: &ChatSession,
        message: ParsedMessage,
        options: RequestOptions,
    ) -> Result<Option<DispatchHandles>> {
        let location = options.location.unwrap_or_else(|| session.location());
        let route = self.classify(&message, location)?;

        let Some((ticket, cancel)) = self.pending.try_claim(session.id()) else {
            debug!(
                "Session {} already has a request in flight, rejecting dispatch",
                session.id()
            );
            return Ok(None);
        };

        let (created_tx, created_rx) = oneshot::channel();
        let (complete_tx, complete_rx) = oneshot::channel();

        let task = DispatchTask {
            capabilities: self.capabilities.clone(),
            pending: Arc::clone(&self.pending),
            store: Arc::clone(&self.store),
            session: session.clone(),
            target: Mutex::new(session.clone()),
            message,
            location,
            attempt: options.attempt,
            context: options.context,
            detection_enabled: options
                .command_detection
                .unwrap_or(self.config.command_detection),
            ticket,
            cancel,
        };
        tokio::spawn(task.run(route, created_tx, complete_tx));

        Ok(Some(DispatchHandles {
            response_created: created_rx,
            response_complete: complete_rx,
        }))
    }

    /// An explicit `@agent` mention wins; an explicit `/command` known to the
    /// registry comes next; everything else is implicit and goes to the
    /// default agent for the location.
    fn classify(&self, message: &ParsedMessage, location: InvocationLocation) -> Result<Route> {
        if let Some(agent_id) = message.agent_mention() {
            let agent = self
                .capabilities
                .agents
                .agent(agent_id)
                .ok_or_else(|| Error::UnknownAgent(agent_id.to_string()))?;
            return Ok(Route::Agent {
                agent,
                explicit: true,
                command: message.subcommand().map(str::to_string),
            });
        }

        if let Some(name) = message.slash_command() {
            if self.capabilities.commands.has_command(name) {
                return Ok(Route::Command {
                    name: name.to_string(),
                });
            }
        }

        let agents = &self.capabilities.agents;
        let agent = agents
            .default_agent(location)
            .or_else(|| agents.default_agent(self.config.primary_location))
            .ok_or(Error::NoDefaultAgent(location))?;
        Ok(Route::Agent {
            agent,
            explicit: false,
            command: message.subcommand().map(str::to_string),
        })
    }
}

/// What one finished exchange reports to telemetry
struct ExchangeMeta {
    kind: RequestKind,
    agent: Option<AgentDescriptor>,
    command: Option<String>,
}

struct Exchange {
    meta: ExchangeMeta,
    ended: Ended,
}

enum Ended {
    Done {
        result: InvocationResult,
        followups: FollowupWork,
    },
    Cancelled,
}

enum FollowupWork {
    /// Ask the agent registry once the response is finalized
    FromAgent {
        invocation: AgentInvocation,
        history: Vec<AgentHistoryEntry>,
    },
    /// The command handler returned them inline
    Ready(Vec<Followup>),
}

struct FollowupJob {
    request_id: RequestId,
    work: FollowupWork,
    result: InvocationResult,
}

enum InvokeEnd<T> {
    Done(T),
    Cancelled,
}

/// Book-keeping spanning one dispatch: the request it created, whether any
/// progress arrived, and the unsent created-signal
struct ResponseTrace {
    request_id: Option<RequestId>,
    got_progress: bool,
    first_fragment_ms: Option<u64>,
    started: Instant,
    created: Option<oneshot::Sender<RequestId>>,
}

impl ResponseTrace {
    fn new(created: oneshot::Sender<RequestId>) -> Self {
        Self {
            request_id: None,
            got_progress: false,
            first_fragment_ms: None,
            started: Instant::now(),
            created: Some(created),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn note_fragment(&mut self, request_id: &str) {
        if !self.got_progress {
            self.got_progress = true;
            self.first_fragment_ms = Some(self.elapsed_ms());
            self.fire_created(request_id);
        }
    }

    /// Idempotent; also called on terminal paths so the signal cannot hang
    fn fire_created(&mut self, request_id: &str) {
        if let Some(sender) = self.created.take() {
            let _ = sender.send(request_id.to_string());
        }
    }
}

struct DispatchTask {
    capabilities: CapabilitySet,
    pending: Arc<PendingRequestRegistry>,
    store: Arc<SessionStore>,
    /// The session this dispatch started in; history and attribution stay here
    session: ChatSession,
    /// The session currently holding the request; adoption moves it
    target: Mutex<ChatSession>,
    message: ParsedMessage,
    location: InvocationLocation,
    attempt: u32,
    context: Option<Value>,
    detection_enabled: bool,
    ticket: DispatchTicket,
    cancel: CancellationToken,
}

impl DispatchTask {
    async fn run(
        self,
        route: Route,
        created: oneshot::Sender<RequestId>,
        complete: oneshot::Sender<()>,
    ) {
        // A fresh dispatch supersedes any follow-up computation still running
        // for the previous request in this session
        let followup_token = self.session.refresh_followup_token();
        let mut trace = ResponseTrace::new(created);

        let (provisional, outcome) = match route {
            Route::Agent {
                agent,
                explicit,
                command,
            } => {
                let provisional = ExchangeMeta {
                    kind: RequestKind::Text,
                    agent: Some(agent.clone()),
                    command: command.clone(),
                };
                let outcome = self.run_agent(agent, explicit, command, &mut trace).await;
                (provisional, outcome)
            }
            Route::Command { name } => {
                let provisional = ExchangeMeta {
                    kind: RequestKind::SlashCommand,
                    agent: None,
                    command: Some(name.clone()),
                };
                let outcome = self.run_command(name, &mut trace).await;
                (provisional, outcome)
            }
        };

        let job = match outcome {
            Ok(exchange) => self.finalize_exchange(exchange, &mut trace),
            Err(err) => {
                self.finalize_error(provisional, err, &mut trace);
                None
            }
        };

        // The single-flight slot opens before follow-ups run; a newer
        // dispatch supersedes them through the session's follow-up token
        self.pending.finish(self.ticket);

        if let Some(job) = job {
            self.attach_followups(job, followup_token).await;
        }
        let _ = complete.send(());
    }

    async fn run_agent(
        &self,
        mut agent: AgentDescriptor,
        explicit: bool,
        mut command: Option<String>,
        trace: &mut ResponseTrace,
    ) -> Result<Exchange> {
        let request_id = self.session.add_request(
            self.message.clone(),
            self.attempt,
            self.context.clone(),
            Some(agent.id.clone()),
            command.clone(),
        );
        self.pending.assign_request_id(self.ticket, &request_id);
        trace.request_id = Some(request_id.clone());

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let variables = self
            .capabilities
            .variables
            .resolve(
                &self.message,
                self.session.id(),
                progress_tx.clone(),
                self.cancel.clone(),
            )
            .await?;
        self.session
            .set_request_variables(&request_id, variables.clone());

        // Detection only applies to implicit requests with no explicit command
        if !explicit
            && command.is_none()
            && self.detection_enabled
            && self.capabilities.agents.supports_detection()
        {
            let invocation = self.build_invocation(&request_id, &agent, &command, &variables);
            let history = agent_history(&self.session, &agent.id, &request_id);
            match self
                .capabilities
                .agents
                .detect(&invocation, &history, self.location, self.cancel.clone())
                .await
            {
                Ok(Some(detected)) => match self.capabilities.agents.agent(&detected.agent_id) {
                    Some(target) if target.supports_location(self.location) => {
                        debug!(
                            "Detection routed request {} to agent {} ({:?})",
                            request_id, target.id, detected.command
                        );
                        agent = target;
                        command = detected.command;
                        self.session.set_request_target(
                            &request_id,
                            Some(agent.id.clone()),
                            command.clone(),
                        );
                    }
                    _ => {
                        warn!(
                            "Detection returned unknown or unsupported agent {}",
                            detected.agent_id
                        );
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    warn!("Agent detection failed, continuing with default: {}", err);
                }
            }
        }

        self.capabilities
            .extensions
            .activate(&agent_contribution(&agent.id))
            .await?;

        let history = agent_history(&self.session, &agent.id, &request_id);
        let invocation = self.build_invocation(&request_id, &agent, &command, &variables);

        let end = self
            .pump_invocation(
                self.capabilities.agents.invoke(
                    invocation.clone(),
                    history.clone(),
                    progress_tx.clone(),
                    self.cancel.clone(),
                ),
                progress_rx,
                progress_tx,
                &request_id,
                trace,
            )
            .await;

        let meta = ExchangeMeta {
            kind: RequestKind::Text,
            agent: Some(agent),
            command,
        };
        match end {
            InvokeEnd::Cancelled => Ok(Exchange {
                meta,
                ended: Ended::Cancelled,
            }),
            InvokeEnd::Done(result) => Ok(Exchange {
                meta,
                ended: Ended::Done {
                    result: result?,
                    followups: FollowupWork::FromAgent {
                        invocation,
                        history,
                    },
                },
            }),
        }
    }

    async fn run_command(&self, name: String, trace: &mut ResponseTrace) -> Result<Exchange> {
        // History is rebuilt as plain role-tagged turns from the exchanges
        // completed before this request was added
        let history = command_history(&self.session);

        let request_id = self.session.add_request(
            self.message.clone(),
            self.attempt,
            self.context.clone(),
            None,
            Some(name.clone()),
        );
        self.pending.assign_request_id(self.ticket, &request_id);
        trace.request_id = Some(request_id.clone());

        let argument = command_argument(&self.message.text, &name);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let end = self
            .pump_invocation(
                self.capabilities.commands.execute(
                    &name,
                    &argument,
                    progress_tx.clone(),
                    history,
                    self.cancel.clone(),
                ),
                progress_rx,
                progress_tx,
                &request_id,
                trace,
            )
            .await;

        let meta = ExchangeMeta {
            kind: RequestKind::SlashCommand,
            agent: None,
            command: Some(name),
        };
        match end {
            InvokeEnd::Cancelled => Ok(Exchange {
                meta,
                ended: Ended::Cancelled,
            }),
            InvokeEnd::Done(result) => Ok(Exchange {
                meta,
                ended: Ended::Done {
                    result: InvocationResult::default(),
                    followups: FollowupWork::Ready(result?.unwrap_or_default()),
                },
            }),
        }
    }

    /// Drive the invocation while forwarding streamed fragments into the
    /// session. Fragments stop being accepted the moment the cancellation
    /// token fires, whatever the invocation does afterwards.
    async fn pump_invocation<T, F>(
        &self,
        invoke: F,
        mut progress_rx: mpsc::UnboundedReceiver<ResponseFragment>,
        progress_tx: ProgressSender,
        request_id: &str,
        trace: &mut ResponseTrace,
    ) -> InvokeEnd<T>
    where
        F: Future<Output = T>,
    {
        tokio::pin!(invoke);

        let result = loop {
            tokio::select! {
                result = &mut invoke => break result,
                // Our own sender keeps the channel open, so recv never ends
                Some(fragment) = progress_rx.recv() => {
                    self.accept_fragment(request_id, fragment, trace);
                }
                _ = self.cancel.cancelled() => {
                    debug!(
                        "Request {} for session {} was cancelled",
                        request_id,
                        self.session.id()
                    );
                    return InvokeEnd::Cancelled;
                }
            }
        };

        // Fragments emitted just before the invocation returned may still be
        // buffered
        drop(progress_tx);
        while let Ok(fragment) = progress_rx.try_recv() {
            self.accept_fragment(request_id, fragment, trace);
        }

        if self.cancel.is_cancelled() {
            return InvokeEnd::Cancelled;
        }
        InvokeEnd::Done(result)
    }

    /// The session currently holding the request. Adoption may have moved it
    /// mid-flight; progress and finalization follow it to its new session.
    fn owner(&self, request_id: &str) -> ChatSession {
        let cached = self.target.lock().clone();
        if cached.has_request(request_id) {
            return cached;
        }
        match self.store.find_session_with_request(request_id) {
            Some(found) => {
                debug!(
                    "Request {} now lives in session {}",
                    request_id,
                    found.id()
                );
                *self.target.lock() = found.clone();
                found
            }
            None => cached,
        }
    }

    fn accept_fragment(
        &self,
        request_id: &str,
        fragment: ResponseFragment,
        trace: &mut ResponseTrace,
    ) {
        if self.cancel.is_cancelled() {
            return;
        }
        trace.note_fragment(request_id);
        self.owner(request_id).accept_progress(request_id, fragment);
    }

    fn finalize_exchange(
        &self,
        exchange: Exchange,
        trace: &mut ResponseTrace,
    ) -> Option<FollowupJob> {
        let Exchange { meta, ended } = exchange;
        match ended {
            Ended::Done { result, followups } => {
                let outcome = classify_outcome(&result, trace.got_progress);
                let request_id = trace.request_id.clone();
                if let Some(request_id) = &request_id {
                    let owner = self.owner(request_id);
                    owner.set_result(request_id, result.clone());
                    trace.fire_created(request_id);
                    owner.complete_response(request_id);
                }
                self.record_usage(outcome, &meta, &result, trace);
                request_id.map(|request_id| FollowupJob {
                    request_id,
                    work: followups,
                    result,
                })
            }
            Ended::Cancelled => {
                if let Some(request_id) = trace.request_id.clone() {
                    self.owner(&request_id).cancel_request(&request_id);
                    trace.fire_created(&request_id);
                }
                self.record_usage(
                    RequestOutcome::Cancelled,
                    &meta,
                    &InvocationResult::default(),
                    trace,
                );
                None
            }
        }
    }

    fn finalize_error(&self, meta: ExchangeMeta, err: Error, trace: &mut ResponseTrace) {
        error!(
            "Error while handling request for session {}: {}",
            self.session.id(),
            err
        );
        if let Some(request_id) = trace.request_id.clone() {
            let owner = self.owner(&request_id);
            owner.set_result(&request_id, InvocationResult::from_error(err.to_string()));
            trace.fire_created(&request_id);
            owner.complete_response(&request_id);
        }
        let outcome = if trace.got_progress {
            RequestOutcome::ErrorWithOutput
        } else {
            RequestOutcome::Error
        };
        self.record_usage(outcome, &meta, &InvocationResult::default(), trace);
    }

    async fn attach_followups(&self, job: FollowupJob, token: CancellationToken) {
        let followups = match job.work {
            FollowupWork::Ready(followups) => followups,
            FollowupWork::FromAgent {
                invocation,
                history,
            } => {
                match self
                    .capabilities
                    .agents
                    .followups(&invocation, &job.result, history, token.clone())
                    .await
                {
                    Ok(followups) => followups,
                    Err(err) => {
                        warn!(
                            "Follow-up computation failed for request {}: {}",
                            job.request_id, err
                        );
                        return;
                    }
                }
            }
        };
        if token.is_cancelled() {
            return;
        }
        self.owner(&job.request_id)
            .set_followups(&job.request_id, followups);
    }

    fn record_usage(
        &self,
        outcome: RequestOutcome,
        meta: &ExchangeMeta,
        result: &InvocationResult,
        trace: &ResponseTrace,
    ) {
        let response = trace
            .request_id
            .as_deref()
            .and_then(|id| self.owner(id).request(id))
            .and_then(|request| request.response);
        let (citations, code_blocks) = match &response {
            Some(response) => (
                response.citation_count(),
                markdown::code_blocks(&response.text()).len(),
            ),
            None => (0, 0),
        };
        let timings = result.timings.clone().unwrap_or_default();
        self.capabilities.telemetry.record_usage(UsageEvent {
            outcome,
            kind: meta.kind,
            agent_id: meta
                .agent
                .as_ref()
                .map(|a| a.id.clone())
                .unwrap_or_default(),
            extension_id: meta
                .agent
                .as_ref()
                .map(|a| a.extension_id.clone())
                .unwrap_or_default(),
            command: meta.command.clone(),
            session_id: self.session.id().to_string(),
            location: self.location,
            time_to_first_fragment_ms: timings.first_fragment_ms.or(trace.first_fragment_ms),
            total_ms: if timings.total_ms > 0 {
                timings.total_ms
            } else {
                trace.elapsed_ms()
            },
            citations,
            code_blocks,
        });
    }

    fn build_invocation(
        &self,
        request_id: &str,
        agent: &AgentDescriptor,
        command: &Option<String>,
        variables: &[ResolvedVariable],
    ) -> AgentInvocation {
        AgentInvocation {
            session_id: self.session.id().to_string(),
            request_id: request_id.to_string(),
            agent_id: agent.id.clone(),
            message: self.message.text.clone(),
            command: command.clone(),
            variables: variables.to_vec(),
            attempt: self.attempt,
            location: self.location,
            enable_command_detection: self.detection_enabled,
        }
    }
}

fn classify_outcome(result: &InvocationResult, got_progress: bool) -> RequestOutcome {
    match &result.error {
        Some(error) if error.response_is_filtered => RequestOutcome::Filtered,
        Some(_) if got_progress => RequestOutcome::ErrorWithOutput,
        Some(_) => RequestOutcome::Error,
        None => RequestOutcome::Success,
    }
}

/// Completed exchanges handled by `agent_id`, excluding the in-flight request
fn agent_history(
    session: &ChatSession,
    agent_id: &str,
    exclude_request: &str,
) -> Vec<AgentHistoryEntry> {
    session
        .requests()
        .iter()
        .filter(|request| request.id != exclude_request)
        .filter_map(|request| {
            let response = request.response.as_ref()?;
            if !response.complete || response.agent_id.as_deref() != Some(agent_id) {
                return None;
            }
            Some(AgentHistoryEntry {
                message: request.message.text.clone(),
                command: response.command.clone(),
                response: response.parts.clone(),
                result: response.result.clone(),
            })
        })
        .collect()
}

/// Completed exchanges as flat role-tagged turns for command handlers
fn command_history(session: &ChatSession) -> Vec<CommandTurn> {
    let mut turns = Vec::new();
    for request in session.requests() {
        let Some(response) = request.response else {
            continue;
        };
        if !response.complete {
            continue;
        }
        turns.push(CommandTurn::user(request.message.text.clone()));
        turns.push(CommandTurn::assistant(response.text()));
    }
    turns
}

/// The message text with the leading `/name` stripped
fn command_argument(text: &str, name: &str) -> String {
    let trimmed = text.trim_start();
    match trimmed
        .strip_prefix('/')
        .and_then(|rest| rest.strip_prefix(name))
    {
        Some(rest) => rest.trim_start().to_string(),
        None => trimmed.to_string(),
    }
}
