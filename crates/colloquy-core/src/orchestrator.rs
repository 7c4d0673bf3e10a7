//! The orchestrator facade
//!
//! [`ChatOrchestrator`] is the one object hosts hold. It owns the session
//! store, the dispatch pipeline, the in-flight registry, and the transfer
//! broker, and exposes the operations a host surface needs: start and restore
//! sessions, send and manage requests, browse history, move a session to
//! another workspace.
//!
//! Construction restores persisted sessions and claims any transfer record
//! addressed to this workspace; the host later drives [`save_state`] from its
//! own before-persist hook.
//!
//! [`save_state`]: ChatOrchestrator::save_state

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::capability::{CapabilitySet, StorageScope};
use crate::config::OrchestratorConfig;
use crate::dispatch::{DispatchHandles, RequestDispatcher, RequestOptions};
use crate::error::{Error, Result};
use crate::events::{EVENT_CHANNEL_CAPACITY, SessionEvent, UserActionEvent};
use crate::pending::PendingRequestRegistry;
use crate::session::types::{
    Followup, InvocationLocation, InvocationResult, RequestId, RequestRemovalReason,
    ResolvedVariable, ResponseFragment,
};
use crate::session::{
    ChatSession, HistoryEntry, SESSIONS_STORAGE_KEY, SerializedSession, SessionStore,
    SessionTransferBroker, TransferRecord, TransferredSessionData, parse_sessions,
};

/// A finished exchange injected without going through dispatch, for hosts
/// that replay conversations produced elsewhere
#[derive(Debug, Clone, Default)]
pub struct CompleteResponse {
    pub fragments: Vec<ResponseFragment>,
    pub result: Option<InvocationResult>,
    pub followups: Vec<Followup>,
}

pub struct ChatOrchestrator {
    config: OrchestratorConfig,
    capabilities: CapabilitySet,
    store: Arc<SessionStore>,
    dispatcher: RequestDispatcher,
    pending: Arc<PendingRequestRegistry>,
    transfer: SessionTransferBroker,
    events: broadcast::Sender<SessionEvent>,
    /// Set when a transfer record was claimed at startup; cleared once the
    /// host restores that session
    transferred: Mutex<Option<TransferredSessionData>>,
}

impl ChatOrchestrator {
    /// Restore persisted state and assemble the pipeline. Workspace processes
    /// also claim a pending transfer record addressed to them, so the
    /// transferred session shows up as restorable history right away.
    pub async fn new(config: OrchestratorConfig, capabilities: CapabilitySet) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let scope = if config.empty_window {
            StorageScope::Application
        } else {
            StorageScope::Workspace
        };
        let raw = capabilities.storage.get(SESSIONS_STORAGE_KEY, scope).await?;
        let mut persisted = raw.as_deref().map(parse_sessions).unwrap_or_default();

        let transfer = SessionTransferBroker::new(
            Arc::clone(&capabilities.storage),
            config.transfer_expiry_ms,
        );
        let mut transferred = None;
        if !config.workspace_id.is_empty() {
            if let Some(record) = transfer.claim(&config.workspace_id).await? {
                info!(
                    "Claimed session {} transferred to this workspace",
                    record.session.session_id
                );
                persisted.retain(|s| s.session_id != record.session.session_id);
                transferred = Some(TransferredSessionData {
                    session_id: record.session.session_id.clone(),
                    input_value: record.input_value,
                });
                persisted.push(record.session);
            }
        }

        let pending = Arc::new(PendingRequestRegistry::new());
        let store = Arc::new(SessionStore::new(
            config.clone(),
            capabilities.clone(),
            events.clone(),
            persisted,
        ));
        let dispatcher = RequestDispatcher::new(
            config.clone(),
            capabilities.clone(),
            Arc::clone(&pending),
            Arc::clone(&store),
        );

        Ok(Self {
            config,
            capabilities,
            store,
            dispatcher,
            pending,
            transfer,
            events,
            transferred: Mutex::new(transferred),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Receiver for everything the orchestrator publishes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Create a fresh session; initialization runs in the background
    pub fn start_session(&self, location: InvocationLocation) -> ChatSession {
        self.store.start_session(location)
    }

    pub fn get_session(&self, session_id: &str) -> Option<ChatSession> {
        self.store.get_session(session_id)
    }

    /// Live session, or revive it from persisted history. Restoring the
    /// session named by a claimed transfer record consumes the marker.
    pub fn get_or_restore_session(&self, session_id: &str) -> Option<ChatSession> {
        let session = self.store.get_or_restore(session_id)?;
        let mut transferred = self.transferred.lock();
        if transferred
            .as_ref()
            .is_some_and(|t| t.session_id == session_id)
        {
            *transferred = None;
        }
        Some(session)
    }

    /// Import a session from external content as a live, non-persisted session
    pub fn load_session_from_content(&self, data: SerializedSession) -> ChatSession {
        self.store.load_session_from_content(data)
    }

    /// The transfer record claimed at startup, until its session is restored
    pub fn transferred_session_data(&self) -> Option<TransferredSessionData> {
        self.transferred.lock().clone()
    }

    /// Dispose a live session, cancelling its in-flight request. Sessions at
    /// the primary location move into persisted history.
    pub fn clear_session(&self, session_id: &str) -> Result<()> {
        self.pending.cancel_and_remove(session_id);
        self.store.clear_session(session_id)
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Dispatch a user message. `Ok(None)` means the request was not accepted:
    /// blank input, or the session already has a request in flight.
    pub async fn send_request(
        &self,
        session_id: &str,
        text: &str,
        options: RequestOptions,
    ) -> Result<Option<DispatchHandles>> {
        if text.trim().is_empty() {
            debug!("Ignoring empty request for session {}", session_id);
            return Ok(None);
        }
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        session.initialized().await?;

        let location = options.location.unwrap_or_else(|| session.location());
        let message = self.capabilities.parser.parse(session_id, text, location);
        self.dispatcher.dispatch(&session, message, options)
    }

    /// Remove a request and dispatch its message again, waiting for the new
    /// exchange to finish. An in-flight request for the session is cancelled
    /// first.
    pub async fn resend_request(
        &self,
        session_id: &str,
        request_id: &str,
        mut options: RequestOptions,
    ) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        session.initialized().await?;

        if self.pending.cancel_and_remove(session_id) {
            debug!(
                "Cancelled in-flight request of session {} before resend",
                session_id
            );
        }
        let request = session
            .take_request(request_id, RequestRemovalReason::Resend)
            .ok_or_else(|| Error::UnknownRequest {
                session_id: session_id.to_string(),
                request_id: request_id.to_string(),
            })?;
        if options.context.is_none() {
            options.context = request.context.clone();
        }

        match self
            .dispatcher
            .dispatch(&session, request.message.clone(), options)?
        {
            Some(handles) => {
                let _ = handles.response_complete.await;
                Ok(())
            }
            None => {
                // Another dispatch won the slot in between; put the removed
                // request back rather than losing it
                warn!(
                    "Resend of request {} lost the slot of session {}, restoring it",
                    request_id, session_id
                );
                session.adopt_request(request);
                Ok(())
            }
        }
    }

    /// Remove a request from its session, cancelling it first when it is the
    /// one in flight
    pub fn remove_request(&self, session_id: &str, request_id: &str) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;

        let in_flight = self
            .pending
            .get(session_id)
            .is_some_and(|p| p.request_id.as_deref() == Some(request_id));
        if in_flight {
            self.pending.cancel_and_remove(session_id);
        }
        session
            .take_request(request_id, RequestRemovalReason::Removal)
            .map(|_| ())
            .ok_or_else(|| Error::UnknownRequest {
                session_id: session_id.to_string(),
                request_id: request_id.to_string(),
            })
    }

    /// Move a request (and its in-flight state, if any) into `session_id`
    /// from whichever live session currently holds it. Progress still
    /// streaming keeps flowing, now into the adopting session's copy.
    pub async fn adopt_request(&self, session_id: &str, request_id: &str) -> Result<()> {
        let target = self
            .store
            .get_session(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        target.initialized().await?;

        let source = self
            .store
            .find_session_with_request(request_id)
            .ok_or_else(|| Error::UnknownRequest {
                session_id: session_id.to_string(),
                request_id: request_id.to_string(),
            })?;
        if source.id() == target.id() {
            return Ok(());
        }

        let request = source
            .take_request(request_id, RequestRemovalReason::Adoption)
            .ok_or_else(|| Error::UnknownRequest {
                session_id: source.id().to_string(),
                request_id: request_id.to_string(),
            })?;
        self.pending.adopt(source.id(), target.id(), request_id);
        target.adopt_request(request);
        debug!(
            "Request {} adopted from session {} into session {}",
            request_id,
            source.id(),
            session_id
        );
        Ok(())
    }

    /// Append an already-finished exchange without dispatching anything
    pub async fn add_complete_request(
        &self,
        session_id: &str,
        text: &str,
        variables: Vec<ResolvedVariable>,
        attempt: u32,
        response: CompleteResponse,
    ) -> Result<RequestId> {
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        session.initialized().await?;

        let message = self
            .capabilities
            .parser
            .parse(session_id, text, session.location());
        let request_id = session.add_request(message, attempt, None, None, None);
        if !variables.is_empty() {
            session.set_request_variables(&request_id, variables);
        }
        for fragment in response.fragments {
            session.accept_progress(&request_id, fragment);
        }
        session.set_result(&request_id, response.result.unwrap_or_default());
        if !response.followups.is_empty() {
            session.set_followups(&request_id, response.followups);
        }
        session.complete_response(&request_id);
        Ok(request_id)
    }

    /// Cancel the session's in-flight request and free its slot immediately.
    /// Returns whether anything was in flight.
    pub fn cancel_current_request(&self, session_id: &str) -> bool {
        let cancelled = self.pending.cancel_and_remove(session_id);
        if cancelled {
            debug!("Cancelled current request of session {}", session_id);
        }
        cancelled
    }

    // ------------------------------------------------------------------
    // History and persistence
    // ------------------------------------------------------------------

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.store.history()
    }

    pub fn has_history(&self) -> bool {
        self.store.has_history()
    }

    /// Delete one history entry and persist the deletion, so another process
    /// saving later cannot resurrect it
    pub async fn remove_history_entry(&self, session_id: &str) -> Result<()> {
        if self.store.remove_history_entry(session_id) {
            self.store.save_state().await?;
        }
        Ok(())
    }

    pub async fn clear_all_history(&self) -> Result<()> {
        self.store.clear_all_history_entries();
        self.store.save_state().await
    }

    /// Write the current session table to storage. Hosts call this from
    /// their own before-persist hook.
    pub async fn save_state(&self) -> Result<()> {
        self.store.save_state().await
    }

    // ------------------------------------------------------------------
    // Transfer
    // ------------------------------------------------------------------

    /// Park a live session for another workspace to claim when it starts,
    /// along with any unsubmitted input the user had typed
    pub async fn transfer_session(
        &self,
        session_id: &str,
        to_workspace: &str,
        input_value: Option<String>,
    ) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        self.transfer
            .deposit(TransferRecord {
                to_workspace: to_workspace.to_string(),
                timestamp_ms: Utc::now().timestamp_millis(),
                session: session.to_snapshot(false),
                input_value,
            })
            .await?;
        info!(
            "Transferred session {} to workspace {}",
            session_id, to_workspace
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    /// Record a user action against telemetry and republish it to subscribers
    pub fn notify_user_action(&self, event: UserActionEvent) {
        self.capabilities.telemetry.record_action(&event);
        let _ = self.events.send(SessionEvent::UserAction(event));
    }
}
