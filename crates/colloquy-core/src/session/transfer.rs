//! Cross-workspace session hand-off
//!
//! Transferring a session to another workspace parks its snapshot in profile
//! scope, where every window of the same profile can see it. The destination
//! window claims records addressed to its workspace on startup; stale records
//! expire after [`crate::config::defaults::transfer_expiry_ms`] so an
//! abandoned hand-off does not resurrect weeks later.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::capability::{PersistenceTarget, StorageBackend, StorageScope};
use crate::error::Result;
use crate::session::persistence::SerializedSession;
use crate::session::types::SessionId;

/// Profile-scope key holding pending transfer records
pub const TRANSFER_STORAGE_KEY: &str = "chat.sessionsToTransfer";

/// One session parked for another workspace to pick up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub to_workspace: String,
    pub timestamp_ms: i64,
    pub session: SerializedSession,
    /// Unsubmitted input the user had typed when the transfer happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_value: Option<String>,
}

/// What the claiming window learns about an incoming transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferredSessionData {
    pub session_id: SessionId,
    pub input_value: Option<String>,
}

/// Reads and writes the shared transfer table
pub struct SessionTransferBroker {
    storage: Arc<dyn StorageBackend>,
    expiry_ms: i64,
}

impl SessionTransferBroker {
    pub fn new(storage: Arc<dyn StorageBackend>, expiry_ms: i64) -> Self {
        Self { storage, expiry_ms }
    }

    /// Park a session for `record.to_workspace`. Expired records are swept
    /// while the table is rewritten.
    pub async fn deposit(&self, record: TransferRecord) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut records = self.load().await?;
        records.retain(|r| self.is_fresh(r, now));
        debug!(
            "Depositing session {} for workspace {}",
            record.session.session_id, record.to_workspace
        );
        records.push(record);
        self.save(&records).await
    }

    /// Claim the record addressed to `workspace_id`, if a fresh one exists.
    /// Every record addressed here is removed from the table along with
    /// anything expired; records for other workspaces stay parked.
    pub async fn claim(&self, workspace_id: &str) -> Result<Option<TransferRecord>> {
        let now = Utc::now().timestamp_millis();
        let records = self.load().await?;
        if records.is_empty() {
            return Ok(None);
        }

        let claimed = records
            .iter()
            .find(|r| r.to_workspace == workspace_id && self.is_fresh(r, now))
            .cloned();
        let keep: Vec<TransferRecord> = records
            .into_iter()
            .filter(|r| r.to_workspace != workspace_id && self.is_fresh(r, now))
            .collect();
        self.save(&keep).await?;

        if let Some(record) = &claimed {
            debug!(
                "Claimed transferred session {} for workspace {}",
                record.session.session_id, workspace_id
            );
        }
        Ok(claimed)
    }

    fn is_fresh(&self, record: &TransferRecord, now: i64) -> bool {
        now - record.timestamp_ms < self.expiry_ms
    }

    async fn load(&self) -> Result<Vec<TransferRecord>> {
        let raw = self
            .storage
            .get(TRANSFER_STORAGE_KEY, StorageScope::Profile)
            .await?;
        Ok(match raw {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(records) => records,
                Err(err) => {
                    error!("Failed to parse session transfer table, dropping it: {}", err);
                    Vec::new()
                }
            },
        })
    }

    async fn save(&self, records: &[TransferRecord]) -> Result<()> {
        let raw = serde_json::to_string(records)?;
        self.storage
            .store(
                TRANSFER_STORAGE_KEY,
                &raw,
                StorageScope::Profile,
                PersistenceTarget::Machine,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MemoryStorage;
    use crate::session::types::InvocationLocation;

    fn snapshot(id: &str) -> SerializedSession {
        SerializedSession {
            session_id: id.to_string(),
            creation_date_ms: 1,
            initial_location: InvocationLocation::Panel,
            is_imported: false,
            is_new: false,
            welcome: None,
            requests: Vec::new(),
        }
    }

    fn record(session_id: &str, to_workspace: &str, timestamp_ms: i64) -> TransferRecord {
        TransferRecord {
            to_workspace: to_workspace.to_string(),
            timestamp_ms,
            session: snapshot(session_id),
            input_value: None,
        }
    }

    fn broker(storage: Arc<dyn StorageBackend>) -> SessionTransferBroker {
        SessionTransferBroker::new(storage, 60_000)
    }

    #[tokio::test]
    async fn test_claim_returns_record_for_workspace() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let broker = broker(storage);
        let now = Utc::now().timestamp_millis();

        broker
            .deposit(record("s1", "ws-b", now))
            .await
            .expect("deposit");

        let claimed = broker.claim("ws-b").await.expect("claim");
        assert_eq!(
            claimed.map(|r| r.session.session_id),
            Some("s1".to_string())
        );

        // Claiming consumed the record
        assert!(broker.claim("ws-b").await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn test_claim_ignores_other_workspaces() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let broker = broker(storage);
        let now = Utc::now().timestamp_millis();

        broker
            .deposit(record("s1", "ws-b", now))
            .await
            .expect("deposit");

        assert!(broker.claim("ws-c").await.expect("claim").is_none());
        // Still parked for its addressee
        assert!(broker.claim("ws-b").await.expect("claim").is_some());
    }

    #[tokio::test]
    async fn test_expired_record_is_not_claimable() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let broker = broker(storage);
        let stale = Utc::now().timestamp_millis() - 120_000;

        broker
            .deposit(record("s1", "ws-b", stale))
            .await
            .expect("deposit");

        assert!(broker.claim("ws-b").await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn test_deposit_sweeps_expired_records() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let now = Utc::now().timestamp_millis();

        {
            let broker = SessionTransferBroker::new(Arc::clone(&storage), 60_000);
            broker
                .deposit(record("old", "ws-b", now - 120_000))
                .await
                .expect("deposit");
            broker
                .deposit(record("fresh", "ws-b", now))
                .await
                .expect("deposit");
        }

        let raw = storage
            .get(TRANSFER_STORAGE_KEY, StorageScope::Profile)
            .await
            .expect("get")
            .expect("stored");
        let records: Vec<TransferRecord> = serde_json::from_str(&raw).expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session.session_id, "fresh");
    }

    #[tokio::test]
    async fn test_corrupt_table_degrades_to_empty() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        storage
            .store(
                TRANSFER_STORAGE_KEY,
                "garbage",
                StorageScope::Profile,
                PersistenceTarget::Machine,
            )
            .await
            .expect("store");

        let broker = SessionTransferBroker::new(storage, 60_000);
        assert!(broker.claim("ws-b").await.expect("claim").is_none());
    }
}
