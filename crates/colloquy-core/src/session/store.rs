//! Live session registry and persisted history
//!
//! The store owns every live [`ChatSession`] plus the in-memory copy of the
//! persisted session table. Starting a session registers it live and kicks
//! off background initialization; a failed initialization removes the session
//! again and publishes a disposal event. `save_state` writes the table back
//! through the storage capability, either as a plain replacement (one
//! workspace owns its table) or through the merge path used when several
//! windows without a workspace share one application-scope table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::capability::{CapabilitySet, PersistenceTarget, StorageScope, agent_contribution};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::events::{DisposeReason, SessionEvent};
use crate::session::model::ChatSession;
use crate::session::persistence::{
    SESSIONS_STORAGE_KEY, SerializedSession, encode_sessions, parse_sessions,
};
use crate::session::types::{InvocationLocation, SessionId};

/// One row of the session history listing
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub session_id: SessionId,
    pub title: String,
}

pub struct SessionStore {
    config: OrchestratorConfig,
    capabilities: CapabilitySet,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<StoreState>,
}

struct StoreState {
    live: HashMap<SessionId, ChatSession>,
    persisted: HashMap<SessionId, SerializedSession>,
    /// History ids removed this save cycle; keeps a concurrent writer from
    /// resurrecting them in the next merge
    deleted_ids: HashSet<SessionId>,
}

impl SessionStore {
    pub fn new(
        config: OrchestratorConfig,
        capabilities: CapabilitySet,
        events: broadcast::Sender<SessionEvent>,
        persisted: Vec<SerializedSession>,
    ) -> Self {
        debug!("Restored {} persisted sessions", persisted.len());
        let persisted = persisted
            .into_iter()
            .map(|s| (s.session_id.clone(), s))
            .collect();
        Self {
            config,
            capabilities,
            events,
            state: Mutex::new(StoreState {
                live: HashMap::new(),
                persisted,
                deleted_ids: HashSet::new(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a fresh session, register it live, and initialize it in the
    /// background. Callers await [`ChatSession::initialized`] before using it.
    pub fn start_session(self: &Arc<Self>, location: InvocationLocation) -> ChatSession {
        let session = ChatSession::new(location);
        debug!("Starting session {} at {:?}", session.id(), location);
        self.state
            .lock()
            .live
            .insert(session.id().to_string(), session.clone());
        self.spawn_initialization(&session);
        session
    }

    pub fn get_session(&self, session_id: &str) -> Option<ChatSession> {
        self.state.lock().live.get(session_id).cloned()
    }

    /// The live session holding `request_id`, if any
    pub fn find_session_with_request(&self, request_id: &str) -> Option<ChatSession> {
        self.state
            .lock()
            .live
            .values()
            .find(|s| s.has_request(request_id))
            .cloned()
    }

    /// Return the live session, or promote it from the persisted table
    pub fn get_or_restore(self: &Arc<Self>, session_id: &str) -> Option<ChatSession> {
        let session = {
            let mut state = self.state.lock();
            if let Some(session) = state.live.get(session_id) {
                return Some(session.clone());
            }
            let snapshot = state.persisted.get(session_id)?.clone();
            debug!("Restoring session {} from history", session_id);
            let session = ChatSession::from_snapshot(&snapshot, false);
            state.live.insert(session.id().to_string(), session.clone());
            session
        };
        self.spawn_initialization(&session);
        Some(session)
    }

    /// Register a session built from externally supplied data (import and
    /// transfer paths). The session is flagged imported so it never shows up
    /// in this workspace's history listing.
    pub fn load_session_from_content(self: &Arc<Self>, data: SerializedSession) -> ChatSession {
        let session = ChatSession::from_snapshot(&data, true);
        debug!(
            "Loading session {} from external content ({} requests)",
            session.id(),
            session.request_count()
        );
        self.state
            .lock()
            .live
            .insert(session.id().to_string(), session.clone());
        self.spawn_initialization(&session);
        session
    }

    /// Remove a session from the live map. Sessions at the primary location
    /// move into the persisted table, flagged new so the next merge knows no
    /// other window has seen them yet.
    pub fn clear_session(&self, session_id: &str) -> Result<()> {
        {
            let mut state = self.state.lock();
            let session = state
                .live
                .remove(session_id)
                .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
            if session.location() == self.config.primary_location {
                let snapshot = session.to_snapshot(true);
                state.persisted.insert(session_id.to_string(), snapshot);
            }
        }
        debug!("Cleared session {}", session_id);
        let _ = self.events.send(SessionEvent::Disposed {
            session_id: session_id.to_string(),
            reason: DisposeReason::Cleared,
        });
        Ok(())
    }

    fn spawn_initialization(self: &Arc<Self>, session: &ChatSession) {
        let store = Arc::clone(self);
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(err) = store.initialize_session(&session).await {
                error!("Session {} failed to initialize: {}", session.id(), err);
                // Leave the live map before rejecting waiters, so nobody can
                // look the session up after seeing the failure
                store.state.lock().live.remove(session.id());
                session.mark_failed(err.to_string());
                let _ = store.events.send(SessionEvent::Disposed {
                    session_id: session.id().to_string(),
                    reason: DisposeReason::InitializationFailed,
                });
            }
        });
    }

    async fn initialize_session(&self, session: &ChatSession) -> Result<()> {
        session.mark_initializing();
        self.capabilities.extensions.when_registered().await;

        let agents = &self.capabilities.agents;
        let agent = agents
            .default_agent(session.location())
            .or_else(|| agents.default_agent(self.config.primary_location))
            .ok_or(Error::NoDefaultAgent(session.location()))?;

        self.capabilities
            .extensions
            .activate(&agent_contribution(&agent.id))
            .await?;

        // Welcome content only matters for a session with nothing in it yet
        let welcome = if session.request_count() == 0 {
            agents.welcome_content(&agent.id, session.location()).await?
        } else {
            None
        };
        session.mark_ready(welcome);
        debug!(
            "Session {} initialized with default agent {}",
            session.id(),
            agent.id
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Persisted sessions newest-first, excluding live and imported ones
    pub fn history(&self) -> Vec<HistoryEntry> {
        let state = self.state.lock();
        let mut sessions: Vec<&SerializedSession> = state
            .persisted
            .values()
            .filter(|s| s.has_content())
            .filter(|s| !state.live.contains_key(&s.session_id))
            .filter(|s| !s.is_imported)
            .collect();
        sessions.sort_by(|a, b| b.creation_date_ms.cmp(&a.creation_date_ms));
        sessions
            .into_iter()
            .map(|s| HistoryEntry {
                session_id: s.session_id.clone(),
                title: s.title().unwrap_or_else(|| s.session_id.clone()),
            })
            .collect()
    }

    pub fn has_history(&self) -> bool {
        !self.state.lock().persisted.is_empty()
    }

    /// Remove one entry from the persisted table. Returns whether it existed.
    pub fn remove_history_entry(&self, session_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.persisted.remove(session_id).is_some() {
            state.deleted_ids.insert(session_id.to_string());
            true
        } else {
            false
        }
    }

    pub fn clear_all_history_entries(&self) {
        let mut state = self.state.lock();
        let ids: Vec<SessionId> = state.persisted.keys().cloned().collect();
        state.deleted_ids.extend(ids);
        state.persisted.clear();
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write the session table back to storage. Hosts call this from their
    /// own before-persist hook and on shutdown.
    pub async fn save_state(&self) -> Result<()> {
        let (scope, payload) = if self.config.empty_window {
            let raw = self
                .capabilities
                .storage
                .get(SESSIONS_STORAGE_KEY, StorageScope::Application)
                .await?;
            let fresh = raw.as_deref().map(parse_sessions).unwrap_or_default();
            (StorageScope::Application, self.merge_shared_table(fresh))
        } else {
            (StorageScope::Workspace, self.collect_workspace_table())
        };

        if !payload.is_empty() {
            debug!("Persisting {} sessions", payload.len());
        }
        let raw = encode_sessions(&payload)?;
        self.capabilities
            .storage
            .store(SESSIONS_STORAGE_KEY, &raw, scope, PersistenceTarget::Machine)
            .await?;

        // The guard only protects the save cycle that observed the deletion
        self.state.lock().deleted_ids.clear();
        Ok(())
    }

    /// Single-workspace path: live sessions plus persisted entries that are
    /// not currently live, newest first, truncated to the cap.
    fn collect_workspace_table(&self) -> Vec<SerializedSession> {
        let mut sessions = {
            let state = self.state.lock();
            let mut sessions: Vec<SerializedSession> = state
                .live
                .values()
                .filter(|s| s.location() == self.config.primary_location)
                .map(|s| s.to_snapshot(false))
                .filter(|s| s.has_content())
                .collect();
            sessions.extend(
                state
                    .persisted
                    .values()
                    .filter(|s| !state.live.contains_key(&s.session_id))
                    .filter(|s| s.has_content())
                    .cloned(),
            );
            sessions
        };
        sort_and_cap(&mut sessions, self.config.history_cap);
        sessions
    }

    /// Shared-table path: several windows write the same application-scope
    /// table, so start from a fresh read and reconcile. The request-count
    /// comparison cannot tell a stale read from an explicit deletion; that
    /// race is accepted and the last full write wins.
    fn merge_shared_table(&self, fresh: Vec<SerializedSession>) -> Vec<SerializedSession> {
        let mut state = self.state.lock();
        let mut merged: HashMap<SessionId, SerializedSession> = fresh
            .into_iter()
            .filter(|s| !state.deleted_ids.contains(&s.session_id))
            .map(|s| (s.session_id.clone(), s))
            .collect();

        for (id, original) in state.persisted.iter() {
            match merged.get(id) {
                Some(stored) if original.requests.len() > stored.requests.len() => {
                    // Updated in this window after the other one wrote
                    let mut snapshot = original.clone();
                    snapshot.is_new = false;
                    merged.insert(id.clone(), snapshot);
                }
                Some(_) => {}
                None if original.is_new => {
                    // Created here, never written anywhere yet
                    let mut snapshot = original.clone();
                    snapshot.is_new = false;
                    merged.insert(id.clone(), snapshot);
                }
                None => {
                    debug!("Session {} was removed from history by another window", id);
                }
            }
        }

        for session in state.live.values() {
            if session.location() != self.config.primary_location {
                continue;
            }
            let snapshot = session.to_snapshot(false);
            if snapshot.has_content() {
                merged.insert(snapshot.session_id.clone(), snapshot);
            }
        }

        let mut sessions: Vec<SerializedSession> = merged.into_values().collect();
        sort_and_cap(&mut sessions, self.config.history_cap);

        // Adopt the reconciled table as the in-memory view, so sessions other
        // windows persisted are listable and restorable here without a restart
        state.persisted = sessions
            .iter()
            .map(|s| (s.session_id.clone(), s.clone()))
            .collect();
        sessions
    }
}

fn sort_and_cap(sessions: &mut Vec<SerializedSession>, cap: usize) {
    sessions.sort_by(|a, b| b.creation_date_ms.cmp(&a.creation_date_ms));
    sessions.truncate(cap);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use crate::capability::{
        AgentDescriptor, AgentHistoryEntry, AgentInvocation, AgentRegistry, MemoryStorage,
        ProgressSender, StorageBackend,
    };
    use crate::events::EVENT_CHANNEL_CAPACITY;
    use crate::session::persistence::SerializedRequest;
    use crate::session::types::{InvocationResult, ParsedMessage, ResponseFragment};

    struct EchoAgents;

    #[async_trait]
    impl AgentRegistry for EchoAgents {
        fn default_agent(&self, _location: InvocationLocation) -> Option<AgentDescriptor> {
            Some(AgentDescriptor::new("echo"))
        }

        fn agent(&self, agent_id: &str) -> Option<AgentDescriptor> {
            (agent_id == "echo").then(|| AgentDescriptor::new("echo"))
        }

        async fn invoke(
            &self,
            invocation: AgentInvocation,
            _history: Vec<AgentHistoryEntry>,
            progress: ProgressSender,
            _cancel: CancellationToken,
        ) -> Result<InvocationResult> {
            let _ = progress.send(ResponseFragment::markdown(format!(
                "echo: {}",
                invocation.message
            )));
            Ok(InvocationResult::default())
        }
    }

    /// Contributes a default agent for the editor location only
    struct EditorAgents;

    #[async_trait]
    impl AgentRegistry for EditorAgents {
        fn default_agent(&self, location: InvocationLocation) -> Option<AgentDescriptor> {
            (location == InvocationLocation::Editor).then(|| AgentDescriptor::new("editor"))
        }

        fn agent(&self, agent_id: &str) -> Option<AgentDescriptor> {
            (agent_id == "editor").then(|| AgentDescriptor::new("editor"))
        }

        async fn invoke(
            &self,
            _invocation: AgentInvocation,
            _history: Vec<AgentHistoryEntry>,
            _progress: ProgressSender,
            _cancel: CancellationToken,
        ) -> Result<InvocationResult> {
            Ok(InvocationResult::default())
        }
    }

    struct NoAgents;

    #[async_trait]
    impl AgentRegistry for NoAgents {
        fn default_agent(&self, _location: InvocationLocation) -> Option<AgentDescriptor> {
            None
        }

        fn agent(&self, _agent_id: &str) -> Option<AgentDescriptor> {
            None
        }

        async fn invoke(
            &self,
            _invocation: AgentInvocation,
            _history: Vec<AgentHistoryEntry>,
            _progress: ProgressSender,
            _cancel: CancellationToken,
        ) -> Result<InvocationResult> {
            Err(Error::Unroutable)
        }
    }

    fn build_store(
        config: OrchestratorConfig,
        agents: Arc<dyn AgentRegistry>,
        persisted: Vec<SerializedSession>,
    ) -> (Arc<SessionStore>, broadcast::Receiver<SessionEvent>, Arc<dyn StorageBackend>) {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let capabilities = CapabilitySet::new(Arc::clone(&storage), agents);
        let (events, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Arc::new(SessionStore::new(config, capabilities, events, persisted));
        (store, rx, storage)
    }

    fn snapshot(id: &str, creation_date_ms: i64, requests: usize) -> SerializedSession {
        SerializedSession {
            session_id: id.to_string(),
            creation_date_ms,
            initial_location: InvocationLocation::Panel,
            is_imported: false,
            is_new: false,
            welcome: None,
            requests: (0..requests)
                .map(|i| SerializedRequest {
                    id: format!("{id}-r{i}"),
                    message: ParsedMessage::plain(format!("question {i}")),
                    attempt: 0,
                    variables: Vec::new(),
                    response: Some(vec![ResponseFragment::markdown("answer")]),
                    result: None,
                    followups: Vec::new(),
                    agent_id: Some("echo".to_string()),
                    command: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_start_session_becomes_ready() {
        let (store, _rx, _storage) =
            build_store(OrchestratorConfig::default(), Arc::new(EchoAgents), Vec::new());
        let session = store.start_session(InvocationLocation::Panel);
        session.initialized().await.expect("init");
        assert!(store.get_session(session.id()).is_some());
    }

    #[tokio::test]
    async fn test_initialization_failure_disposes_session() {
        let (store, mut rx, _storage) =
            build_store(OrchestratorConfig::default(), Arc::new(NoAgents), Vec::new());
        let session = store.start_session(InvocationLocation::Panel);

        let err = session.initialized().await.expect_err("should fail");
        assert!(err.to_string().contains("failed to initialize"));

        let event = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timely")
            .expect("event");
        assert_eq!(
            event,
            SessionEvent::Disposed {
                session_id: session.id().to_string(),
                reason: DisposeReason::InitializationFailed,
            }
        );
        assert!(store.get_session(session.id()).is_none());
    }

    #[tokio::test]
    async fn test_initialization_falls_back_to_primary_location_agent() {
        let config =
            OrchestratorConfig::default().with_primary_location(InvocationLocation::Editor);
        let (store, _rx, _storage) = build_store(config, Arc::new(EditorAgents), Vec::new());

        // No terminal default contributed; the primary location's agent steps in
        let session = store.start_session(InvocationLocation::Terminal);
        session.initialized().await.expect("init");
        assert!(store.get_session(session.id()).is_some());
    }

    #[tokio::test]
    async fn test_clear_session_moves_panel_session_to_history() {
        let (store, mut rx, _storage) =
            build_store(OrchestratorConfig::default(), Arc::new(EchoAgents), Vec::new());
        let session = store.start_session(InvocationLocation::Panel);
        session.initialized().await.expect("init");
        let request_id = session.add_request(ParsedMessage::plain("keep me"), 0, None, None, None);
        session.complete_response(&request_id);

        store.clear_session(session.id()).expect("clear");
        assert!(store.get_session(session.id()).is_none());

        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].session_id, session.id());
        assert_eq!(history[0].title, "keep me");

        let event = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timely")
            .expect("event");
        assert_eq!(
            event,
            SessionEvent::Disposed {
                session_id: session.id().to_string(),
                reason: DisposeReason::Cleared,
            }
        );
    }

    #[tokio::test]
    async fn test_clear_session_discards_other_locations() {
        let (store, _rx, _storage) =
            build_store(OrchestratorConfig::default(), Arc::new(EchoAgents), Vec::new());
        let session = store.start_session(InvocationLocation::Terminal);
        session.initialized().await.expect("init");
        session.add_request(ParsedMessage::plain("ephemeral"), 0, None, None, None);

        store.clear_session(session.id()).expect("clear");
        assert!(store.history().is_empty());
        assert!(!store.has_history());
    }

    #[tokio::test]
    async fn test_clear_unknown_session_errors() {
        let (store, _rx, _storage) =
            build_store(OrchestratorConfig::default(), Arc::new(EchoAgents), Vec::new());
        let err = store.clear_session("nope").expect_err("should fail");
        assert!(matches!(err, Error::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_get_or_restore_promotes_persisted_session() {
        let (store, _rx, _storage) = build_store(
            OrchestratorConfig::default(),
            Arc::new(EchoAgents),
            vec![snapshot("old", 5, 2)],
        );

        assert!(store.get_session("old").is_none());
        let session = store.get_or_restore("old").expect("restored");
        session.initialized().await.expect("init");
        assert_eq!(session.request_count(), 2);
        assert!(store.get_session("old").is_some());

        // Live sessions drop out of the history listing
        assert!(store.history().is_empty());
        assert!(store.get_or_restore("missing").is_none());
    }

    #[tokio::test]
    async fn test_load_session_from_content_marks_imported() {
        let (store, _rx, _storage) =
            build_store(OrchestratorConfig::default(), Arc::new(EchoAgents), Vec::new());
        let session = store.load_session_from_content(snapshot("ext", 9, 1));
        session.initialized().await.expect("init");
        assert!(session.is_imported());
        assert_eq!(session.request_count(), 1);
    }

    #[tokio::test]
    async fn test_history_sorted_desc_and_excludes_imported() {
        let mut imported = snapshot("c", 30, 1);
        imported.is_imported = true;
        let (store, _rx, _storage) = build_store(
            OrchestratorConfig::default(),
            Arc::new(EchoAgents),
            vec![snapshot("a", 10, 1), snapshot("b", 20, 1), imported],
        );

        let history = store.history();
        let ids: Vec<&str> = history.iter().map(|h| h.session_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(store.has_history());
    }

    #[tokio::test]
    async fn test_save_state_caps_and_sorts_table() {
        let config = OrchestratorConfig::default().with_history_cap(2);
        let (store, _rx, storage) = build_store(
            config,
            Arc::new(EchoAgents),
            vec![snapshot("a", 10, 1), snapshot("b", 20, 1), snapshot("c", 30, 1)],
        );

        store.save_state().await.expect("save");

        let raw = storage
            .get(SESSIONS_STORAGE_KEY, StorageScope::Workspace)
            .await
            .expect("get")
            .expect("written");
        let written = parse_sessions(&raw);
        let ids: Vec<&str> = written.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_removed_history_entry_survives_concurrent_write() {
        let config = OrchestratorConfig::default().with_empty_window(true);
        let (store, _rx, storage) = build_store(
            config,
            Arc::new(EchoAgents),
            vec![snapshot("victim", 10, 1)],
        );

        assert!(store.remove_history_entry("victim"));

        // Another window writes the table still containing the entry
        let blob = encode_sessions(&[snapshot("victim", 10, 1)]).expect("encode");
        storage
            .store(
                SESSIONS_STORAGE_KEY,
                &blob,
                StorageScope::Application,
                PersistenceTarget::Machine,
            )
            .await
            .expect("store");

        store.save_state().await.expect("save");

        let raw = storage
            .get(SESSIONS_STORAGE_KEY, StorageScope::Application)
            .await
            .expect("get")
            .expect("written");
        assert!(parse_sessions(&raw).is_empty());
    }

    #[tokio::test]
    async fn test_shared_save_keeps_other_windows_sessions() {
        let config = OrchestratorConfig::default().with_empty_window(true);
        let (store, _rx, storage) =
            build_store(config, Arc::new(EchoAgents), Vec::new());

        let session = store.start_session(InvocationLocation::Panel);
        session.initialized().await.expect("init");
        let request_id = session.add_request(ParsedMessage::plain("mine"), 0, None, None, None);
        session.complete_response(&request_id);

        let blob = encode_sessions(&[snapshot("theirs", 40, 1)]).expect("encode");
        storage
            .store(
                SESSIONS_STORAGE_KEY,
                &blob,
                StorageScope::Application,
                PersistenceTarget::Machine,
            )
            .await
            .expect("store");

        store.save_state().await.expect("save");

        let raw = storage
            .get(SESSIONS_STORAGE_KEY, StorageScope::Application)
            .await
            .expect("get")
            .expect("written");
        let written = parse_sessions(&raw);
        let mut ids: Vec<&str> = written.iter().map(|s| s.session_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![session.id(), "theirs"]);
    }

    #[tokio::test]
    async fn test_shared_save_absorbs_other_windows_sessions() {
        let config = OrchestratorConfig::default().with_empty_window(true);
        let (store, _rx, storage) = build_store(config, Arc::new(EchoAgents), Vec::new());
        assert!(!store.has_history());

        let blob = encode_sessions(&[snapshot("theirs", 40, 2)]).expect("encode");
        storage
            .store(
                SESSIONS_STORAGE_KEY,
                &blob,
                StorageScope::Application,
                PersistenceTarget::Machine,
            )
            .await
            .expect("store");

        store.save_state().await.expect("save");

        // The other window's entry is part of this window's view right away,
        // not only after a restart
        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].session_id, "theirs");

        let revived = store.get_or_restore("theirs").expect("restored");
        revived.initialized().await.expect("init");
        assert_eq!(revived.request_count(), 2);
    }

    #[tokio::test]
    async fn test_shared_save_prefers_local_copy_with_more_requests() {
        let config = OrchestratorConfig::default().with_empty_window(true);
        let (store, _rx, storage) = build_store(
            config,
            Arc::new(EchoAgents),
            vec![snapshot("s1", 10, 3)],
        );

        // The stored copy is stale: it predates this window's last exchange
        let blob = encode_sessions(&[snapshot("s1", 10, 1)]).expect("encode");
        storage
            .store(
                SESSIONS_STORAGE_KEY,
                &blob,
                StorageScope::Application,
                PersistenceTarget::Machine,
            )
            .await
            .expect("store");

        store.save_state().await.expect("save");

        let raw = storage
            .get(SESSIONS_STORAGE_KEY, StorageScope::Application)
            .await
            .expect("get")
            .expect("written");
        let written = parse_sessions(&raw);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].requests.len(), 3);
    }

    #[tokio::test]
    async fn test_clear_all_history_entries() {
        let (store, _rx, _storage) = build_store(
            OrchestratorConfig::default(),
            Arc::new(EchoAgents),
            vec![snapshot("a", 10, 1), snapshot("b", 20, 1)],
        );
        assert!(store.has_history());
        store.clear_all_history_entries();
        assert!(!store.has_history());
        assert!(store.history().is_empty());
    }
}
