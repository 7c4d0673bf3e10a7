//! In-flight request tracking
//!
//! Each session may have at most one request in flight. The registry is the
//! single authority for that rule: a dispatch claims its session slot before
//! doing any work and releases it with the ticket it was given. Tickets are
//! monotonic per registry, so a finished dispatch can never release a slot
//! that a newer dispatch (after a resend) has since claimed, and adoption can
//! re-key an entry without orphaning it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::types::{RequestId, SessionId};

/// Identifies one dispatch for the registry's lifetime
pub type DispatchTicket = u64;

/// State of the single in-flight request for a session
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub ticket: DispatchTicket,
    /// Filled in once the request has been added to the session
    pub request_id: Option<RequestId>,
    pub cancel: CancellationToken,
}

/// Session-keyed table of in-flight requests
#[derive(Default)]
pub struct PendingRequestRegistry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_ticket: DispatchTicket,
    entries: HashMap<SessionId, PendingRequest>,
}

impl PendingRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the session's slot. Returns `None` when a request is already in
    /// flight for it.
    pub fn try_claim(&self, session_id: &str) -> Option<(DispatchTicket, CancellationToken)> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(session_id) {
            return None;
        }
        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        let cancel = CancellationToken::new();
        inner.entries.insert(
            session_id.to_string(),
            PendingRequest {
                ticket,
                request_id: None,
                cancel: cancel.clone(),
            },
        );
        Some((ticket, cancel))
    }

    pub fn get(&self, session_id: &str) -> Option<PendingRequest> {
        self.inner.lock().entries.get(session_id).cloned()
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.inner.lock().entries.contains_key(session_id)
    }

    /// Record which request the claimed dispatch ended up creating
    pub fn assign_request_id(&self, ticket: DispatchTicket, request_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.values_mut().find(|e| e.ticket == ticket) {
            entry.request_id = Some(request_id.to_string());
        }
    }

    /// Cancel the session's in-flight request, if any. The entry stays until
    /// its dispatch observes the token and finishes normally.
    pub fn cancel(&self, session_id: &str) -> Option<RequestId> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(session_id)?;
        entry.cancel.cancel();
        debug!(
            "Cancelled in-flight request {:?} for session {}",
            entry.request_id, session_id
        );
        entry.request_id.clone()
    }

    /// Cancel the session's in-flight request and free its slot immediately,
    /// so a follow-on dispatch can claim it without waiting for the cancelled
    /// one to unwind. The cancelled dispatch's own `finish` becomes a no-op.
    pub fn cancel_and_remove(&self, session_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(session_id) {
            Some(entry) => {
                entry.cancel.cancel();
                debug!(
                    "Cancelled and released in-flight request {:?} for session {}",
                    entry.request_id, session_id
                );
                true
            }
            None => false,
        }
    }

    /// Release the slot claimed under `ticket`. Scans every entry because
    /// adoption may have re-keyed it to another session. A stale ticket from
    /// a dispatch whose slot was already reclaimed is a no-op.
    pub fn finish(&self, ticket: DispatchTicket) -> bool {
        let mut inner = self.inner.lock();
        let key = inner
            .entries
            .iter()
            .find(|(_, e)| e.ticket == ticket)
            .map(|(k, _)| k.clone());
        match key {
            Some(key) => {
                inner.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Move the pending entry to another session when the in-flight request
    /// is adopted. Returns false when the entry is missing, tracks another
    /// request, or the destination is itself busy.
    pub fn adopt(&self, from_session: &str, to_session: &str, request_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(to_session) {
            return false;
        }
        let matches = inner
            .entries
            .get(from_session)
            .is_some_and(|e| e.request_id.as_deref() == Some(request_id));
        if !matches {
            return false;
        }
        if let Some(entry) = inner.entries.remove(from_session) {
            inner.entries.insert(to_session.to_string(), entry);
            return true;
        }
        false
    }

    pub fn cancel_all(&self) {
        let inner = self.inner.lock();
        for entry in inner.entries.values() {
            entry.cancel.cancel();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl Drop for PendingRequestRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
