//! Live session objects
//!
//! A [`ChatSession`] is a cheaply cloneable handle over shared state: the
//! ordered request list, optional welcome content, the initialization state
//! machine, and the follow-up cancellation slot. The store owns which
//! sessions are live; everything here is safe to call from any task.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::session::persistence::{SerializedRequest, SerializedSession};
use crate::session::types::{
    Followup, InvocationLocation, InvocationResult, ParsedMessage, RequestId,
    RequestRemovalReason, ResolvedVariable, ResponseFragment, SessionId, WelcomeContent,
};

/// Where a session is in its background initialization
#[derive(Debug, Clone, PartialEq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
    /// Terminal; the session has been removed from the live map
    Failed(String),
}

/// One user turn and its (possibly in-progress) response
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub id: RequestId,
    pub message: ParsedMessage,
    pub attempt: u32,
    pub variables: Vec<ResolvedVariable>,
    /// Opaque host context carried through resend
    pub context: Option<Value>,
    pub response: Option<ChatResponse>,
}

/// The assistant's answer to one request, built incrementally
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub parts: Vec<ResponseFragment>,
    pub complete: bool,
    pub canceled: bool,
    pub result: Option<InvocationResult>,
    pub followups: Vec<Followup>,
    pub agent_id: Option<String>,
    pub command: Option<String>,
}

impl ChatResponse {
    /// The markdown body accumulated so far
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ResponseFragment::Markdown { content } = part {
                out.push_str(content);
            }
        }
        out
    }

    pub fn citation_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, ResponseFragment::CodeCitation { .. }))
            .count()
    }
}

struct SessionState {
    requests: Vec<ChatRequest>,
    welcome: Option<WelcomeContent>,
}

struct SessionShared {
    id: SessionId,
    location: InvocationLocation,
    created_at_ms: i64,
    imported: bool,
    state: RwLock<SessionState>,
    init: watch::Sender<InitState>,
    followup_cancel: Mutex<CancellationToken>,
}

/// Handle to one live session
#[derive(Clone)]
pub struct ChatSession {
    shared: Arc<SessionShared>,
}

impl ChatSession {
    pub fn new(location: InvocationLocation) -> Self {
        Self::build(
            Uuid::new_v4().to_string(),
            location,
            Utc::now().timestamp_millis(),
            false,
            Vec::new(),
            None,
        )
    }

    /// Revive a session from a persisted snapshot. Restored responses are
    /// complete by construction. `mark_imported` forces the imported flag on
    /// top of whatever the snapshot carries (the import path sets it).
    pub fn from_snapshot(snapshot: &SerializedSession, mark_imported: bool) -> Self {
        let requests = snapshot
            .requests
            .iter()
            .map(|req| ChatRequest {
                id: req.id.clone(),
                message: req.message.clone(),
                attempt: req.attempt,
                variables: req.variables.clone(),
                context: None,
                response: req.response.as_ref().map(|parts| ChatResponse {
                    parts: parts.clone(),
                    complete: true,
                    canceled: false,
                    result: req.result.clone(),
                    followups: req.followups.clone(),
                    agent_id: req.agent_id.clone(),
                    command: req.command.clone(),
                }),
            })
            .collect();

        Self::build(
            snapshot.session_id.clone(),
            snapshot.initial_location,
            snapshot.creation_date_ms,
            snapshot.is_imported || mark_imported,
            requests,
            snapshot.welcome.clone(),
        )
    }

    fn build(
        id: SessionId,
        location: InvocationLocation,
        created_at_ms: i64,
        imported: bool,
        requests: Vec<ChatRequest>,
        welcome: Option<WelcomeContent>,
    ) -> Self {
        let (init, _) = watch::channel(InitState::Uninitialized);
        Self {
            shared: Arc::new(SessionShared {
                id,
                location,
                created_at_ms,
                imported,
                state: RwLock::new(SessionState { requests, welcome }),
                init,
                followup_cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn location(&self) -> InvocationLocation {
        self.shared.location
    }

    pub fn created_at_ms(&self) -> i64 {
        self.shared.created_at_ms
    }

    pub fn is_imported(&self) -> bool {
        self.shared.imported
    }

    // ------------------------------------------------------------------
    // Initialization state machine
    // ------------------------------------------------------------------

    pub fn init_state(&self) -> InitState {
        self.shared.init.borrow().clone()
    }

    pub(crate) fn mark_initializing(&self) {
        self.shared.init.send_replace(InitState::Initializing);
    }

    /// Initialization finished; `welcome` replaces the session's welcome
    /// content when present (restored sessions keep what they had).
    pub(crate) fn mark_ready(&self, welcome: Option<WelcomeContent>) {
        if let Some(welcome) = welcome {
            self.shared.state.write().welcome = Some(welcome);
        }
        self.shared.init.send_replace(InitState::Ready);
    }

    pub(crate) fn mark_failed(&self, message: impl Into<String>) {
        self.shared.init.send_replace(InitState::Failed(message.into()));
    }

    /// Wait until initialization reaches a terminal state. Every operation
    /// that consumes the session awaits this first; a failed initialization
    /// rejects all waiters.
    pub async fn initialized(&self) -> Result<()> {
        let mut rx = self.shared.init.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                InitState::Ready => return Ok(()),
                InitState::Failed(message) => {
                    return Err(Error::SessionInitFailed {
                        session_id: self.shared.id.clone(),
                        message,
                    });
                }
                InitState::Uninitialized | InitState::Initializing => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::SessionInitFailed {
                    session_id: self.shared.id.clone(),
                    message: "initialization abandoned".to_string(),
                });
            }
        }
    }

    pub fn welcome(&self) -> Option<WelcomeContent> {
        self.shared.state.read().welcome.clone()
    }

    pub fn has_welcome(&self) -> bool {
        self.shared.state.read().welcome.is_some()
    }

    // ------------------------------------------------------------------
    // Follow-up supersession
    // ------------------------------------------------------------------

    /// Cancel any follow-up computation from a prior dispatch and hand out a
    /// fresh token for the next one.
    pub(crate) fn refresh_followup_token(&self) -> CancellationToken {
        let mut slot = self.shared.followup_cancel.lock();
        slot.cancel();
        *slot = CancellationToken::new();
        slot.clone()
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Append a new request with an empty in-progress response
    pub fn add_request(
        &self,
        message: ParsedMessage,
        attempt: u32,
        context: Option<Value>,
        agent_id: Option<String>,
        command: Option<String>,
    ) -> RequestId {
        let id = Uuid::new_v4().to_string();
        let request = ChatRequest {
            id: id.clone(),
            message,
            attempt,
            variables: Vec::new(),
            context,
            response: Some(ChatResponse {
                agent_id,
                command,
                ..Default::default()
            }),
        };
        self.shared.state.write().requests.push(request);
        id
    }

    /// Re-own a request taken from another session
    pub fn adopt_request(&self, request: ChatRequest) {
        self.shared.state.write().requests.push(request);
    }

    /// Remove a request, returning it for resend/adoption
    pub fn take_request(
        &self,
        request_id: &str,
        reason: RequestRemovalReason,
    ) -> Option<ChatRequest> {
        let mut state = self.shared.state.write();
        let index = state.requests.iter().position(|r| r.id == request_id)?;
        let request = state.requests.remove(index);
        debug!(
            "Removed request {} from session {} ({:?})",
            request_id, self.shared.id, reason
        );
        Some(request)
    }

    pub fn request(&self, request_id: &str) -> Option<ChatRequest> {
        self.shared
            .state
            .read()
            .requests
            .iter()
            .find(|r| r.id == request_id)
            .cloned()
    }

    pub fn has_request(&self, request_id: &str) -> bool {
        self.shared
            .state
            .read()
            .requests
            .iter()
            .any(|r| r.id == request_id)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.shared.state.read().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.shared.state.read().requests.len()
    }

    pub fn set_request_variables(
        &self,
        request_id: &str,
        variables: Vec<ResolvedVariable>,
    ) -> bool {
        self.with_request(request_id, |request| request.variables = variables)
    }

    /// Record the agent/command this request ended up targeting (detection
    /// may change it after the request was created)
    pub fn set_request_target(
        &self,
        request_id: &str,
        agent_id: Option<String>,
        command: Option<String>,
    ) -> bool {
        self.with_response(request_id, |response| {
            response.agent_id = agent_id;
            response.command = command;
        })
    }

    /// Append a streamed fragment. Returns false (and does nothing) once the
    /// response is complete or cancelled, or when the request is unknown.
    pub fn accept_progress(&self, request_id: &str, fragment: ResponseFragment) -> bool {
        let mut state = self.shared.state.write();
        let Some(request) = state.requests.iter_mut().find(|r| r.id == request_id) else {
            warn!(
                "Dropping progress for unknown request {} in session {}",
                request_id, self.shared.id
            );
            return false;
        };
        match request.response.as_mut() {
            Some(response) if !response.complete && !response.canceled => {
                response.parts.push(fragment);
                true
            }
            _ => false,
        }
    }

    pub fn set_result(&self, request_id: &str, result: InvocationResult) -> bool {
        self.with_response(request_id, |response| response.result = Some(result))
    }

    pub fn complete_response(&self, request_id: &str) -> bool {
        self.with_response(request_id, |response| response.complete = true)
    }

    /// Mark the request cancelled; the response is terminal afterwards
    pub fn cancel_request(&self, request_id: &str) -> bool {
        self.with_response(request_id, |response| {
            response.canceled = true;
            response.complete = true;
        })
    }

    pub fn set_followups(&self, request_id: &str, followups: Vec<Followup>) -> bool {
        self.with_response(request_id, |response| response.followups = followups)
    }

    fn with_request(&self, request_id: &str, apply: impl FnOnce(&mut ChatRequest)) -> bool {
        let mut state = self.shared.state.write();
        match state.requests.iter_mut().find(|r| r.id == request_id) {
            Some(request) => {
                apply(request);
                true
            }
            None => false,
        }
    }

    fn with_response(&self, request_id: &str, apply: impl FnOnce(&mut ChatResponse)) -> bool {
        let mut state = self.shared.state.write();
        match state
            .requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .and_then(|r| r.response.as_mut())
        {
            Some(response) => {
                apply(response);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Title shown in history listings: the first request's text, shortened
    pub fn default_title(&self) -> Option<String> {
        let state = self.shared.state.read();
        let first = state.requests.first()?;
        let text = first.message.text.trim();
        if text.is_empty() {
            return None;
        }
        Some(text.chars().take(50).collect())
    }

    /// Serialize the current state for the persisted table
    pub fn to_snapshot(&self, is_new: bool) -> SerializedSession {
        let state = self.shared.state.read();
        SerializedSession {
            session_id: self.shared.id.clone(),
            creation_date_ms: self.shared.created_at_ms,
            initial_location: self.shared.location,
            is_imported: self.shared.imported,
            is_new,
            welcome: state.welcome.clone(),
            requests: state
                .requests
                .iter()
                .map(|request| SerializedRequest {
                    id: request.id.clone(),
                    message: request.message.clone(),
                    attempt: request.attempt,
                    variables: request.variables.clone(),
                    response: request.response.as_ref().map(|r| r.parts.clone()),
                    result: request.response.as_ref().and_then(|r| r.result.clone()),
                    followups: request
                        .response
                        .as_ref()
                        .map(|r| r.followups.clone())
                        .unwrap_or_default(),
                    agent_id: request.response.as_ref().and_then(|r| r.agent_id.clone()),
                    command: request.response.as_ref().and_then(|r| r.command.clone()),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ChatSession {
        ChatSession::new(InvocationLocation::Panel)
    }

    #[test]
    fn test_add_request_creates_open_response() {
        let s = session();
        let id = s.add_request(
            ParsedMessage::plain("hello"),
            0,
            None,
            Some("workspace".to_string()),
            None,
        );
        assert_eq!(s.request_count(), 1);

        let request = s.request(&id).expect("request");
        let response = request.response.expect("response");
        assert!(!response.complete);
        assert_eq!(response.agent_id.as_deref(), Some("workspace"));
    }

    #[test]
    fn test_progress_accumulates_in_order() {
        let s = session();
        let id = s.add_request(ParsedMessage::plain("q"), 0, None, None, None);
        assert!(s.accept_progress(&id, ResponseFragment::markdown("one ")));
        assert!(s.accept_progress(&id, ResponseFragment::markdown("two")));
        assert!(s.accept_progress(&id, ResponseFragment::code_citation("u", "MIT", "x")));

        let response = s.request(&id).and_then(|r| r.response).expect("response");
        assert_eq!(response.text(), "one two");
        assert_eq!(response.citation_count(), 1);
    }

    #[test]
    fn test_complete_blocks_further_progress() {
        let s = session();
        let id = s.add_request(ParsedMessage::plain("q"), 0, None, None, None);
        assert!(s.complete_response(&id));
        assert!(!s.accept_progress(&id, ResponseFragment::markdown("late")));
    }

    #[test]
    fn test_cancel_marks_terminal() {
        let s = session();
        let id = s.add_request(ParsedMessage::plain("q"), 0, None, None, None);
        assert!(s.accept_progress(&id, ResponseFragment::markdown("partial")));
        assert!(s.cancel_request(&id));

        let response = s.request(&id).and_then(|r| r.response).expect("response");
        assert!(response.canceled);
        assert!(response.complete);
        assert!(!s.accept_progress(&id, ResponseFragment::markdown("late")));
    }

    #[test]
    fn test_take_request_removes() {
        let s = session();
        let id = s.add_request(ParsedMessage::plain("q"), 0, None, None, None);
        let taken = s
            .take_request(&id, RequestRemovalReason::Resend)
            .expect("taken");
        assert_eq!(taken.id, id);
        assert_eq!(s.request_count(), 0);
        assert!(s.take_request(&id, RequestRemovalReason::Removal).is_none());
    }

    #[test]
    fn test_adopt_preserves_request_id() {
        let a = session();
        let b = session();
        let id = a.add_request(ParsedMessage::plain("q"), 0, None, None, None);
        let taken = a
            .take_request(&id, RequestRemovalReason::Adoption)
            .expect("taken");
        b.adopt_request(taken);
        assert_eq!(a.request_count(), 0);
        assert!(b.request(&id).is_some());
    }

    #[test]
    fn test_refresh_followup_token_cancels_previous() {
        let s = session();
        let first = s.refresh_followup_token();
        assert!(!first.is_cancelled());
        let second = s.refresh_followup_token();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_default_title_truncates() {
        let s = session();
        let long = "x".repeat(80);
        s.add_request(ParsedMessage::plain(long), 0, None, None, None);
        let title = s.default_title().expect("title");
        assert_eq!(title.len(), 50);
    }

    #[tokio::test]
    async fn test_initialized_resolves_on_ready() {
        let s = session();
        s.mark_initializing();
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.initialized().await })
        };
        s.mark_ready(None);
        waiter.await.expect("join").expect("init ok");
        assert_eq!(s.init_state(), InitState::Ready);
    }

    #[tokio::test]
    async fn test_initialized_rejects_on_failure() {
        let s = session();
        s.mark_initializing();
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.initialized().await })
        };
        s.mark_failed("no default agent");
        let err = waiter.await.expect("join").expect_err("should fail");
        assert!(err.to_string().contains("no default agent"));
    }

    #[test]
    fn test_snapshot_carries_responses() {
        let s = session();
        let id = s.add_request(
            ParsedMessage::plain("q"),
            0,
            None,
            Some("agent".to_string()),
            Some("explain".to_string()),
        );
        s.accept_progress(&id, ResponseFragment::markdown("answer"));
        s.set_result(&id, InvocationResult::default());
        s.complete_response(&id);

        let snapshot = s.to_snapshot(false);
        assert_eq!(snapshot.session_id, s.id());
        assert_eq!(snapshot.requests.len(), 1);
        let req = &snapshot.requests[0];
        assert_eq!(req.agent_id.as_deref(), Some("agent"));
        assert_eq!(req.command.as_deref(), Some("explain"));
        assert!(req.response.is_some());
    }
}
